//! Steady-state linear viscoelastic wave equation, in four functional forms
//! that trade physical fidelity for numerical stability. Each is a pure
//! function of pointwise derivative bundles and is zero at an exact solution.

use nalgebra::{DVector, Scalar};
use num_dual::DualNum;
use num_traits::Zero;

use crate::pde::ops::{divergence_of, gradient_of, laplacian_of, FieldDerivs};
use crate::pde::PdeError;

fn require_vector_field<T: Scalar>(u: &FieldDerivs<T>) -> Result<usize, PdeError> {
    let s = u.spatial_dim().ok_or(PdeError::DerivativesNotTracked)?;
    if u.channels() != s {
        return Err(PdeError::ComponentMismatch {
            expected: s,
            actual: u.channels(),
        });
    }
    Ok(s)
}

/// General form: ∇·[2μ·strain(u) + λ·tr(strain(u))·I] + ρω²u.
///
/// Differentiates the modulus fields directly, so `mu` and `lam` must carry
/// first-order derivatives and `u` second-order ones. `omega` is angular.
pub fn lvwe<T: DualNum<f64> + Scalar + Zero>(
    u: &FieldDerivs<T>,
    mu: &FieldDerivs<T>,
    lam: &FieldDerivs<T>,
    rho: f64,
    omega: f64,
) -> Result<DVector<T>, PdeError> {
    let s = require_vector_field(u)?;
    let jac = u.jacobian.as_ref().ok_or(PdeError::DerivativesNotTracked)?;
    let hess = u.hessians.as_ref().ok_or(PdeError::DerivativesNotTracked)?;
    let grad_mu = gradient_of(mu)?;
    let grad_lam = gradient_of(lam)?;
    let mu_v = mu.value[0].clone();
    let lam_v = lam.value[0].clone();
    let div_u = divergence_of(u)?;
    let inertia = rho * omega * omega;

    let mut residual = Vec::with_capacity(s);
    for i in 0..s {
        let mut acc = u.value[i].clone() * inertia;
        for j in 0..s {
            // ∂ⱼμ·(∂ᵢuⱼ + ∂ⱼuᵢ) + μ·(∂ᵢ∂ⱼuⱼ + ∂ⱼ∂ⱼuᵢ)
            let sym = jac[(j, i)].clone() + jac[(i, j)].clone();
            acc = acc + grad_mu[j].clone() * sym;
            let second = hess[j][(i, j)].clone() + hess[i][(j, j)].clone();
            acc = acc + mu_v.clone() * second;
        }
        // ∂ᵢλ·(∇·u) + λ·∂ᵢ(∇·u)
        acc = acc + grad_lam[i].clone() * div_u.clone();
        let mut grad_div = T::zero();
        for k in 0..s {
            grad_div = grad_div + hess[k][(i, k)].clone();
        }
        acc = acc + lam_v.clone() * grad_div;
        residual.push(acc);
    }
    Ok(DVector::from_vec(residual))
}

/// Spatially constant moduli: μ∇²u + (λ+μ)∇(∇·u) + ρω²u. Avoids
/// differentiating the modulus fields.
pub fn homogeneous_lvwe<T: DualNum<f64> + Scalar + Zero>(
    u: &FieldDerivs<T>,
    mu: &T,
    lam: &T,
    rho: f64,
    omega: f64,
) -> Result<DVector<T>, PdeError> {
    let s = require_vector_field(u)?;
    let hess = u.hessians.as_ref().ok_or(PdeError::DerivativesNotTracked)?;
    let lap_u = laplacian_of(u)?;
    let inertia = rho * omega * omega;

    let mut residual = Vec::with_capacity(s);
    for i in 0..s {
        let mut grad_div = T::zero();
        for j in 0..s {
            grad_div = grad_div + hess[j][(i, j)].clone();
        }
        let acc = mu.clone() * lap_u[i].clone()
            + (lam.clone() + mu.clone()) * grad_div
            + u.value[i].clone() * inertia;
        residual.push(acc);
    }
    Ok(DVector::from_vec(residual))
}

/// Homogeneous and incompressible: μ∇²u + ρω²u. Applies per channel, so
/// scalar wave fields are fine.
pub fn incompressible_homogeneous_lvwe<T: DualNum<f64> + Scalar + Zero>(
    u: &FieldDerivs<T>,
    mu: &T,
    rho: f64,
    omega: f64,
) -> Result<DVector<T>, PdeError> {
    let lap_u = laplacian_of(u)?;
    let inertia = rho * omega * omega;
    let mut residual = Vec::with_capacity(lap_u.len());
    for i in 0..lap_u.len() {
        residual.push(mu.clone() * lap_u[i].clone() + u.value[i].clone() * inertia);
    }
    Ok(DVector::from_vec(residual))
}

/// Homogeneous with an explicit pressure field replacing the λ∇·u term:
/// μ∇²u + ∇p + ρω²u.
pub fn pressure_homogeneous_lvwe<T: DualNum<f64> + Scalar + Zero>(
    u: &FieldDerivs<T>,
    mu: &T,
    pressure: &FieldDerivs<T>,
    rho: f64,
    omega: f64,
) -> Result<DVector<T>, PdeError> {
    let s = require_vector_field(u)?;
    let lap_u = laplacian_of(u)?;
    let grad_p = gradient_of(pressure)?;
    if grad_p.len() != s {
        return Err(PdeError::ComponentMismatch {
            expected: s,
            actual: grad_p.len(),
        });
    }
    let inertia = rho * omega * omega;
    let mut residual = Vec::with_capacity(s);
    for i in 0..s {
        residual.push(
            mu.clone() * lap_u[i].clone()
                + grad_p[i].clone()
                + u.value[i].clone() * inertia,
        );
    }
    Ok(DVector::from_vec(residual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn scalar_bundle(value: f64, grad: &[f64]) -> FieldDerivs<f64> {
        FieldDerivs {
            value: DVector::from_vec(vec![value]),
            jacobian: Some(DMatrix::from_fn(1, grad.len(), |_, j| grad[j])),
            hessians: None,
        }
    }

    fn zero_vector_bundle(s: usize) -> FieldDerivs<f64> {
        FieldDerivs {
            value: DVector::zeros(s),
            jacobian: Some(DMatrix::zeros(s, s)),
            hessians: Some(vec![DMatrix::zeros(s, s); s]),
        }
    }

    #[test]
    fn zero_displacement_gives_zero_residual_in_every_form() {
        let u = zero_vector_bundle(3);
        let mu = scalar_bundle(2.5e3, &[1.0, -2.0, 0.5]);
        let lam = scalar_bundle(1.0e4, &[0.0, 3.0, 0.0]);
        let p = scalar_bundle(0.7, &[0.2, 0.1, -0.4]);
        let (rho, omega) = (1000.0, 2.0 * std::f64::consts::PI * 60.0);

        let full = lvwe(&u, &mu, &lam, rho, omega).unwrap();
        let hom = homogeneous_lvwe(&u, &2.5e3, &1.0e4, rho, omega).unwrap();
        let inc = incompressible_homogeneous_lvwe(&u, &2.5e3, rho, omega).unwrap();
        let pre = pressure_homogeneous_lvwe(&u, &2.5e3, &p, rho, omega).unwrap();

        assert_eq!(full.amax(), 0.0);
        assert_eq!(hom.amax(), 0.0);
        assert_eq!(inc.amax(), 0.0);
        // Pressure gradient survives as the sole non-displacement term.
        assert!((pre[0] - 0.2).abs() < 1e-15);
        assert!((pre[1] - 0.1).abs() < 1e-15);
        assert!((pre[2] + 0.4).abs() < 1e-15);
    }

    #[test]
    fn constant_moduli_collapse_full_form_onto_homogeneous_form() {
        // Hand-built second-order bundle for u = (x², xy, 0).
        let (x, y) = (0.7, -0.3);
        let jac = DMatrix::from_row_slice(3, 3, &[
            2.0 * x, 0.0, 0.0, //
            y, x, 0.0, //
            0.0, 0.0, 0.0,
        ]);
        let mut hessians = vec![DMatrix::zeros(3, 3); 3];
        hessians[0][(0, 0)] = 2.0;
        hessians[1][(0, 1)] = 1.0;
        hessians[1][(1, 0)] = 1.0;
        let u = FieldDerivs {
            value: DVector::from_vec(vec![x * x, x * y, 0.0]),
            jacobian: Some(jac),
            hessians: Some(hessians),
        };
        let (mu_v, lam_v) = (1.5e3, 4.0e3);
        let mu = scalar_bundle(mu_v, &[0.0, 0.0, 0.0]);
        let lam = scalar_bundle(lam_v, &[0.0, 0.0, 0.0]);
        let (rho, omega) = (1000.0, 2.0 * std::f64::consts::PI * 80.0);

        let full = lvwe(&u, &mu, &lam, rho, omega).unwrap();
        let hom = homogeneous_lvwe(&u, &mu_v, &lam_v, rho, omega).unwrap();
        for i in 0..3 {
            assert!(
                (full[i] - hom[i]).abs() <= 1e-9 * hom[i].abs().max(1.0),
                "component {i}: {} vs {}",
                full[i],
                hom[i]
            );
        }
    }

    #[test]
    fn vector_forms_reject_scalar_displacement() {
        let u = FieldDerivs {
            value: DVector::from_vec(vec![1.0]),
            jacobian: Some(DMatrix::zeros(1, 3)),
            hessians: Some(vec![DMatrix::zeros(3, 3)]),
        };
        let mu = scalar_bundle(1.0, &[0.0, 0.0, 0.0]);
        let lam = scalar_bundle(1.0, &[0.0, 0.0, 0.0]);
        assert!(matches!(
            lvwe(&u, &mu, &lam, 1000.0, 1.0),
            Err(PdeError::ComponentMismatch { .. })
        ));
        // The incompressible reduction is defined per channel.
        assert!(incompressible_homogeneous_lvwe(&u, &1.0, 1000.0, 1.0).is_ok());
    }

    #[test]
    fn untracked_bundle_surfaces_a_differentiation_error() {
        let u = FieldDerivs::<f64> {
            value: DVector::zeros(3),
            jacobian: None,
            hessians: None,
        };
        assert!(matches!(
            incompressible_homogeneous_lvwe(&u, &1.0, 1000.0, 1.0),
            Err(PdeError::DerivativesNotTracked)
        ));
    }
}
