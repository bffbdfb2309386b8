//! Loss gradients with respect to network parameters, for the external
//! optimizer. The parameter vector is lifted into first-order duals (the
//! same `num_dual::jacobian` shape the Newton layer of a finite-volume
//! solver would use on its unknowns); spatial derivatives inside the PDE
//! term are taken with second-order duals nested over the parameter duals.

use std::cell::RefCell;

use nalgebra::{DMatrix, DVector, Dyn};
use num_dual::{Dual2Vec, DualDVec64};

use crate::data::pipeline::{batch_losses, Batch, LossTerms};
use crate::models::TrainableFieldNet;
use crate::numerics::loss::MaskedLoss;
use crate::pde::ops::FieldDerivs;
use crate::pde::{OutputLayout, PdeError, WaveEquation};

type ParamDual = DualDVec64;
type CoordDual2 = Dual2Vec<ParamDual, f64, Dyn>;

/// Evaluates the loss triple and its 3×P Jacobian with respect to the
/// flattened parameter vector. Row order matches the loss order
/// (displacement, modulus, PDE); combining rows into an update is left to
/// the caller.
pub fn loss_jacobian<N, L>(
    net: &N,
    pde: &WaveEquation,
    layout: &OutputLayout,
    batch: &Batch,
    loss_fn: &L,
    mask_level: f64,
) -> Result<(LossTerms, DMatrix<f64>), PdeError>
where
    N: TrainableFieldNet,
    L: MaskedLoss,
{
    let theta0 = net.params();
    let failure: RefCell<Option<PdeError>> = RefCell::new(None);

    let (values, jacobian) = num_dual::jacobian(
        |theta: DVector<ParamDual>| {
            match tracked_losses(net, &theta, pde, layout, batch, loss_fn, mask_level) {
                Ok([u, mu, res]) => DVector::from_vec(vec![u, mu, res]),
                Err(e) => {
                    *failure.borrow_mut() = Some(e);
                    DVector::from_element(3, ParamDual::from_re(0.0))
                }
            }
        },
        theta0,
    );
    if let Some(e) = failure.into_inner() {
        return Err(e);
    }

    let losses = LossTerms {
        displacement: values[0],
        modulus: values[1],
        pde: values[2],
    };
    Ok((losses, jacobian))
}

fn tracked_losses<N, L>(
    net: &N,
    theta: &DVector<ParamDual>,
    pde: &WaveEquation,
    layout: &OutputLayout,
    batch: &Batch,
    loss_fn: &L,
    mask_level: f64,
) -> Result<[ParamDual; 3], PdeError>
where
    N: TrainableFieldNet,
    L: MaskedLoss,
{
    let (b, n, _) = batch.coords.dim();
    let mut outputs = Vec::with_capacity(b);
    for bi in 0..b {
        let mut points = Vec::with_capacity(n);
        for ni in 0..n {
            let cond: Vec<f64> = batch.wave_in.slice(ndarray::s![bi, ni, ..]).to_vec();
            let x: Vec<f64> = batch.coords.slice(ndarray::s![bi, ni, ..]).to_vec();
            let field = tracked_sample(net, theta, &cond, &x, 1)?;
            points.push(layout.split(&field)?);
        }
        outputs.push(points);
    }
    batch_losses(
        pde,
        layout.n_disp,
        &batch.targets,
        &batch.frequencies,
        &outputs,
        loss_fn,
        mask_level,
    )
}

/// Tracked twin of `pde::ops::sample_field`: same seeding discipline, but the
/// parameter vector rides along as the inner dual so every returned entry
/// carries ∂/∂θ.
fn tracked_sample<N: TrainableFieldNet>(
    net: &N,
    theta: &DVector<ParamDual>,
    cond: &[f64],
    x: &[f64],
    start_dim: usize,
) -> Result<FieldDerivs<ParamDual>, PdeError> {
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
    let s = k - start_dim;
    let mut head = cond.to_vec();
    head.extend_from_slice(&x[..start_dim]);
    let theta_lifted: DVector<CoordDual2> = theta.map(CoordDual2::from_re);
    let tail: DVector<ParamDual> =
        DVector::from_iterator(s, x[start_dim..].iter().map(|&c| ParamDual::from_re(c)));

    let mut value = Vec::with_capacity(m);
    let mut jacobian = DMatrix::zeros(m, s);
    let mut hessians = Vec::with_capacity(m);
    for i in 0..m {
        let (v, grad, hess) = num_dual::hessian(
            |xs: DVector<CoordDual2>| {
                let mut feats = Vec::with_capacity(head.len() + s);
                feats.extend(
                    head.iter()
                        .map(|&c| CoordDual2::from_re(ParamDual::from_re(c))),
                );
                feats.extend(xs.iter().cloned());
                net.eval_params(&theta_lifted, &DVector::from_vec(feats))[i].clone()
            },
            tail.clone(),
        );
        value.push(v);
        for j in 0..s {
            jacobian[(i, j)] = grad[j].clone();
        }
        hessians.push(hess);
    }

    Ok(FieldDerivs {
        value: DVector::from_vec(value),
        jacobian: Some(jacobian),
        hessians: Some(hessians),
    })
}
