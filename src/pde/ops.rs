use nalgebra::{DMatrix, DVector, Dyn, Scalar};
use num_dual::{Dual2Vec, DualNum};
use num_traits::Zero;

use crate::models::FieldNet;
use crate::pde::PdeError;

// Second-order dual seeded over the spatial coordinate block.
type CoordDual2 = Dual2Vec<f64, f64, Dyn>;

/// How much derivative information a forward pass should track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivLevel {
    /// Plain evaluation, no derivative tracking.
    Value,
    /// First spatial partials (Jacobian).
    Gradient,
    /// First and pure/mixed second spatial partials.
    Hessian,
}

/// Pointwise derivative bundle of a network output field.
///
/// `value` is the M-vector of output channels, `jacobian` the M×S matrix of
/// first spatial partials and `hessians` one S×S matrix of second partials
/// per output channel. The optional entries are `None` when the forward pass
/// that produced the bundle did not track that derivative order.
#[derive(Debug, Clone)]
pub struct FieldDerivs<T: Scalar> {
    pub value: DVector<T>,
    pub jacobian: Option<DMatrix<T>>,
    pub hessians: Option<Vec<DMatrix<T>>>,
}

impl<T: Scalar> FieldDerivs<T> {
    /// Number of output channels in the bundle.
    pub fn channels(&self) -> usize {
        self.value.len()
    }

    /// Number of differentiated spatial dimensions, when known.
    pub fn spatial_dim(&self) -> Option<usize> {
        self.jacobian.as_ref().map(|j| j.ncols())
    }

    /// Extracts the sub-bundle for a contiguous channel range.
    pub fn select(&self, start: usize, len: usize) -> FieldDerivs<T> {
        FieldDerivs {
            value: self.value.rows(start, len).into_owned(),
            jacobian: self.jacobian.as_ref().map(|j| j.rows(start, len).into_owned()),
            hessians: self
                .hessians
                .as_ref()
                .map(|h| h[start..start + len].to_vec()),
        }
    }
}

impl<T: DualNum<f64> + Scalar> FieldDerivs<T> {
    /// Re-embeds every entry as a constant, severing any gradient tracking
    /// the values carried. Evaluating at plain `f64` this is the identity.
    pub fn detach(&self) -> FieldDerivs<T> {
        let freeze = |v: &T| T::from(v.re());
        FieldDerivs {
            value: self.value.map(|v| freeze(&v)),
            jacobian: self.jacobian.as_ref().map(|j| j.map(|v| freeze(&v))),
            hessians: self
                .hessians
                .as_ref()
                .map(|h| h.iter().map(|m| m.map(|v| freeze(&v))).collect()),
        }
    }
}

/// Sum of pure second partials per output channel (trace of each Hessian).
pub fn laplacian_of<T: DualNum<f64> + Scalar + Zero>(
    field: &FieldDerivs<T>,
) -> Result<DVector<T>, PdeError> {
    let hessians = field
        .hessians
        .as_ref()
        .ok_or(PdeError::DerivativesNotTracked)?;
    let mut out = Vec::with_capacity(hessians.len());
    for hess in hessians {
        let mut acc = T::zero();
        for j in 0..hess.nrows() {
            acc = acc + hess[(j, j)].clone();
        }
        out.push(acc);
    }
    Ok(DVector::from_vec(out))
}

/// Trace contraction of the Jacobian. Requires as many output channels as
/// differentiated dimensions.
pub fn divergence_of<T: DualNum<f64> + Scalar + Zero>(
    field: &FieldDerivs<T>,
) -> Result<T, PdeError> {
    let jac = field
        .jacobian
        .as_ref()
        .ok_or(PdeError::DerivativesNotTracked)?;
    if jac.nrows() != jac.ncols() {
        return Err(PdeError::ComponentMismatch {
            expected: jac.ncols(),
            actual: jac.nrows(),
        });
    }
    let mut acc = T::zero();
    for i in 0..jac.nrows() {
        acc = acc + jac[(i, i)].clone();
    }
    Ok(acc)
}

/// Spatial gradient of a single-channel field.
pub fn gradient_of<T: DualNum<f64> + Scalar>(
    field: &FieldDerivs<T>,
) -> Result<DVector<T>, PdeError> {
    if field.channels() != 1 {
        return Err(PdeError::ScalarFieldExpected {
            channels: field.channels(),
        });
    }
    let jac = field
        .jacobian
        .as_ref()
        .ok_or(PdeError::DerivativesNotTracked)?;
    Ok(jac.row(0).transpose())
}

/// Symmetric strain tensor ½(J + Jᵀ) of a vector field.
pub fn strain_of<T: DualNum<f64> + Scalar>(
    field: &FieldDerivs<T>,
) -> Result<DMatrix<T>, PdeError> {
    let jac = field
        .jacobian
        .as_ref()
        .ok_or(PdeError::DerivativesNotTracked)?;
    if jac.nrows() != jac.ncols() {
        return Err(PdeError::ComponentMismatch {
            expected: jac.ncols(),
            actual: jac.nrows(),
        });
    }
    let n = jac.nrows();
    Ok(DMatrix::from_fn(n, n, |i, j| {
        (jac[(i, j)].clone() + jac[(j, i)].clone()) * 0.5
    }))
}

/// Evaluates `net` at one sample point with the requested derivative level.
///
/// `cond` holds conditioning features that are never differentiated; `x` is
/// the coordinate vector and `start_dim` the index of its first spatial
/// dimension. Coordinates in `x[..start_dim]` (e.g. the frequency channel)
/// are held fixed. Derivative tracking is seeded here, before the forward
/// pass runs.
pub fn sample_field<N: FieldNet>(
    net: &N,
    cond: &[f64],
    x: &[f64],
    start_dim: usize,
    level: DerivLevel,
) -> Result<FieldDerivs<f64>, PdeError> {
    let k = x.len();
    if start_dim >= k {
        return Err(PdeError::NoSpatialDims {
            start_dim,
            input_dim: k,
        });
    }
    if cond.len() + k != net.input_dim() {
        return Err(PdeError::InputDimMismatch {
            expected: net.input_dim(),
            actual: cond.len() + k,
        });
    }

    let m = net.output_dim();
    let mut head = Vec::with_capacity(cond.len() + start_dim);
    head.extend_from_slice(cond);
    head.extend_from_slice(&x[..start_dim]);
    let tail = DVector::from_column_slice(&x[start_dim..]);
    let s = tail.len();

    match level {
        DerivLevel::Value => {
            let mut feats = head.clone();
            feats.extend_from_slice(&x[start_dim..]);
            let value = net.eval(&DVector::from_vec(feats));
            Ok(FieldDerivs {
                value,
                jacobian: None,
                hessians: None,
            })
        }
        DerivLevel::Gradient => {
            let (value, jacobian) = num_dual::jacobian(
                |xs: DVector<num_dual::DualDVec64>| {
                    let mut feats = Vec::with_capacity(head.len() + s);
                    feats.extend(head.iter().map(|&c| num_dual::DualDVec64::from_re(c)));
                    feats.extend(xs.iter().cloned());
                    net.eval(&DVector::from_vec(feats))
                },
                tail,
            );
            Ok(FieldDerivs {
                value,
                jacobian: Some(jacobian),
                hessians: None,
            })
        }
        DerivLevel::Hessian => {
            let mut value = Vec::with_capacity(m);
            let mut jacobian = DMatrix::zeros(m, s);
            let mut hessians = Vec::with_capacity(m);
            for i in 0..m {
                let (v, grad, hess) = num_dual::hessian(
                    |xs: DVector<CoordDual2>| {
                        let mut feats = Vec::with_capacity(head.len() + s);
                        feats.extend(head.iter().map(|&c| CoordDual2::from_re(c)));
                        feats.extend(xs.iter().cloned());
                        net.eval(&DVector::from_vec(feats))[i].clone()
                    },
                    tail.clone(),
                );
                value.push(v);
                for j in 0..s {
                    jacobian[(i, j)] = grad[j];
                }
                hessians.push(hess);
            }
            Ok(FieldDerivs {
                value: DVector::from_vec(value),
                jacobian: Some(jacobian),
                hessians: Some(hessians),
            })
        }
    }
}

/// Laplacian of every output channel with respect to `x[start_dim..]`.
pub fn laplacian<N: FieldNet>(
    net: &N,
    cond: &[f64],
    x: &[f64],
    start_dim: usize,
) -> Result<DVector<f64>, PdeError> {
    let field = sample_field(net, cond, x, start_dim, DerivLevel::Hessian)?;
    laplacian_of(&field)
}
