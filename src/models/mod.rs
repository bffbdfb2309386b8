pub mod mlp;
pub mod pino;

use nalgebra::{DVector, Scalar};
use num_dual::DualNum;
use num_traits::Zero;

/// Pointwise field network: maps one feature vector (conditioning channels
/// followed by coordinates) to one output vector, generic over the AD scalar
/// so the same forward pass runs at plain `f64`, under coordinate duals, or
/// under nested parameter duals.
pub trait FieldNet {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;

    /// Forward pass at a single point.
    fn eval<T: DualNum<f64> + Scalar + Zero>(&self, x: &DVector<T>) -> DVector<T>;
}

/// A field network whose parameters live in one flat vector, so an external
/// optimizer can differentiate losses with respect to them.
pub trait TrainableFieldNet: FieldNet {
    fn param_count(&self) -> usize;

    /// Current parameters, flattened.
    fn params(&self) -> DVector<f64>;

    /// Replaces the parameters from a flat vector of matching length.
    fn set_params(&mut self, params: &DVector<f64>);

    /// Forward pass with a caller-supplied parameter vector standing in for
    /// the stored one. The parameter scalar type is the same as the input
    /// scalar type; callers lift constants/duals as needed before the call.
    fn eval_params<T: DualNum<f64> + Scalar + Zero>(
        &self,
        params: &DVector<T>,
        x: &DVector<T>,
    ) -> DVector<T>;
}
