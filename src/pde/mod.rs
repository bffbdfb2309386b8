pub mod forms;
pub mod ops;

use std::f64::consts::PI;

use nalgebra::{DVector, Scalar};
use num_dual::DualNum;
use num_traits::Zero;
use thiserror::Error;

use crate::pde::ops::FieldDerivs;

#[derive(Debug, Error)]
pub enum PdeError {
    #[error("derivatives were not tracked through the forward pass that produced this field")]
    DerivativesNotTracked,
    #[error("start_dim {start_dim} leaves no differentiable dimensions (input has {input_dim})")]
    NoSpatialDims { start_dim: usize, input_dim: usize },
    #[error("network expects {expected} input features, got {actual}")]
    InputDimMismatch { expected: usize, actual: usize },
    #[error("network produces {actual} output channels, layout requires {expected}")]
    OutputDimMismatch { expected: usize, actual: usize },
    #[error("form requires {expected} displacement components, got {actual}")]
    ComponentMismatch { expected: usize, actual: usize },
    #[error("operator expects a single-channel field, got {channels} channels")]
    ScalarFieldExpected { channels: usize },
    #[error("residual form requires a {0} output channel")]
    MissingField(&'static str),
}

/// Physical-assumption mode of the wave-equation residual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualForm {
    /// Full isotropic form, differentiates the modulus fields.
    Full,
    /// Spatially constant Lamé parameters.
    Homogeneous,
    /// Constant moduli and incompressibility (Helmholtz-like).
    IncompressibleHomogeneous,
    /// Constant moduli with an explicit pressure channel.
    PressureHomogeneous,
}

impl ResidualForm {
    /// Whether the network must expose a second Lamé channel.
    pub fn needs_lambda(&self) -> bool {
        matches!(self, ResidualForm::Full | ResidualForm::Homogeneous)
    }

    /// Whether the network must expose a pressure channel.
    pub fn needs_pressure(&self) -> bool {
        matches!(self, ResidualForm::PressureHomogeneous)
    }
}

/// What the PDE loss is allowed to train.
///
/// `JointGradient` keeps parameter tracking on the displacement output and
/// its spatial derivatives, so the residual trains displacement and modulus
/// networks together. `ModulusOnlyGradient` freezes displacement and its
/// Laplacian when the residual is formed, conditioning modulus estimation on
/// a fixed displacement estimate. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientMode {
    JointGradient,
    ModulusOnlyGradient,
}

/// Channel layout of the network output: displacement components first, then
/// the shear modulus, then any auxiliary channels the residual form needs.
#[derive(Debug, Clone, Copy)]
pub struct OutputLayout {
    pub n_disp: usize,
    pub form: ResidualForm,
}

impl OutputLayout {
    pub fn channels(&self) -> usize {
        self.n_disp
            + 1
            + usize::from(self.form.needs_lambda())
            + usize::from(self.form.needs_pressure())
    }

    /// Splits a full-output derivative bundle into named per-field bundles.
    pub fn split<T: Scalar>(&self, all: &FieldDerivs<T>) -> Result<PointOutputs<T>, PdeError> {
        if all.channels() != self.channels() {
            return Err(PdeError::OutputDimMismatch {
                expected: self.channels(),
                actual: all.channels(),
            });
        }
        let u = all.select(0, self.n_disp);
        let mu = all.select(self.n_disp, 1);
        let mut next = self.n_disp + 1;
        let lam = if self.form.needs_lambda() {
            let f = all.select(next, 1);
            next += 1;
            Some(f)
        } else {
            None
        };
        let pressure = if self.form.needs_pressure() {
            Some(all.select(next, 1))
        } else {
            None
        };
        Ok(PointOutputs {
            u,
            mu,
            lam,
            pressure,
        })
    }
}

/// Network outputs at one sample point, split by field.
#[derive(Debug, Clone)]
pub struct PointOutputs<T: Scalar> {
    pub u: FieldDerivs<T>,
    pub mu: FieldDerivs<T>,
    pub lam: Option<FieldDerivs<T>>,
    pub pressure: Option<FieldDerivs<T>>,
}

/// Steady-state elastic wave residual used by the training pipeline.
///
/// Dispatches on the configured [`ResidualForm`]; the pipeline's frequency
/// channel is in Hz and is converted to angular frequency here, so the
/// inertial term reads ρ(2πω)²u.
#[derive(Debug, Clone, Copy)]
pub struct WaveEquation {
    pub form: ResidualForm,
    pub grad_mode: GradientMode,
    /// Tissue density [kg/m³].
    pub rho: f64,
}

impl WaveEquation {
    pub fn new(form: ResidualForm, grad_mode: GradientMode) -> Self {
        Self {
            form,
            grad_mode,
            rho: 1000.0,
        }
    }

    /// PDE imbalance at one sample point; zero at an exact solution.
    pub fn residual<T: DualNum<f64> + Scalar + Zero>(
        &self,
        out: &PointOutputs<T>,
        frequency: f64,
    ) -> Result<DVector<T>, PdeError> {
        let omega = 2.0 * PI * frequency;
        let u = match self.grad_mode {
            GradientMode::JointGradient => out.u.clone(),
            GradientMode::ModulusOnlyGradient => out.u.detach(),
        };
        let mu_v = out.mu.value[0].clone();
        match self.form {
            ResidualForm::Full => {
                let lam = out.lam.as_ref().ok_or(PdeError::MissingField("lambda"))?;
                forms::lvwe(&u, &out.mu, lam, self.rho, omega)
            }
            ResidualForm::Homogeneous => {
                let lam = out.lam.as_ref().ok_or(PdeError::MissingField("lambda"))?;
                forms::homogeneous_lvwe(&u, &mu_v, &lam.value[0].clone(), self.rho, omega)
            }
            ResidualForm::IncompressibleHomogeneous => {
                forms::incompressible_homogeneous_lvwe(&u, &mu_v, self.rho, omega)
            }
            ResidualForm::PressureHomogeneous => {
                let p = out
                    .pressure
                    .as_ref()
                    .ok_or(PdeError::MissingField("pressure"))?;
                forms::pressure_homogeneous_lvwe(&u, &mu_v, p, self.rho, omega)
            }
        }
    }

    /// Splits the residual into its stiffness (traction) and inertial
    /// (body-force) parts for diagnostics: residual = traction + body.
    pub fn traction_and_body_forces<T: DualNum<f64> + Scalar + Zero>(
        &self,
        out: &PointOutputs<T>,
        frequency: f64,
    ) -> Result<(DVector<T>, DVector<T>), PdeError> {
        let residual = self.residual(out, frequency)?;
        let omega = 2.0 * PI * frequency;
        let inertia = self.rho * omega * omega;
        let u = match self.grad_mode {
            GradientMode::JointGradient => out.u.clone(),
            GradientMode::ModulusOnlyGradient => out.u.detach(),
        };
        let body = DVector::from_iterator(
            u.value.len(),
            u.value.iter().map(|v| v.clone() * inertia),
        );
        let traction = DVector::from_iterator(
            residual.len(),
            residual
                .iter()
                .zip(body.iter())
                .map(|(r, b)| r.clone() - b.clone()),
        );
        Ok((traction, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn helmholtz_point(u: f64, lap: f64, mu: f64) -> PointOutputs<f64> {
        PointOutputs {
            u: FieldDerivs {
                value: DVector::from_vec(vec![u]),
                jacobian: Some(DMatrix::zeros(1, 3)),
                hessians: Some(vec![DMatrix::from_diagonal(&DVector::from_vec(vec![
                    lap, 0.0, 0.0,
                ]))]),
            },
            mu: FieldDerivs {
                value: DVector::from_vec(vec![mu]),
                jacobian: None,
                hessians: None,
            },
            lam: None,
            pressure: None,
        }
    }

    #[test]
    fn residual_decomposes_into_traction_plus_body() {
        let eq = WaveEquation::new(
            ResidualForm::IncompressibleHomogeneous,
            GradientMode::JointGradient,
        );
        let out = helmholtz_point(1e-5, -2.0e-2, 3000.0);
        let res = eq.residual(&out, 80.0).unwrap();
        let (trac, body) = eq.traction_and_body_forces(&out, 80.0).unwrap();
        assert!((res[0] - (trac[0] + body[0])).abs() < 1e-12 * res[0].abs().max(1.0));
        assert!((trac[0] - 3000.0 * -2.0e-2).abs() < 1e-9);
    }

    #[test]
    fn dispersion_consistent_point_has_vanishing_residual() {
        // k² = ρω²/μ: the Helmholtz terms cancel exactly.
        let (rho, f, mu) = (1000.0, 80.0, 1000.0);
        let omega = 2.0 * PI * f;
        let k2 = rho * omega * omega / mu;
        let u = 3.7e-6;
        let eq = WaveEquation::new(
            ResidualForm::IncompressibleHomogeneous,
            GradientMode::JointGradient,
        );
        let out = helmholtz_point(u, -k2 * u, mu);
        let res = eq.residual(&out, f).unwrap();
        assert!(res[0].abs() < 1e-9 * rho * omega * omega * u.abs());
    }

    #[test]
    fn missing_auxiliary_channel_is_reported() {
        let eq = WaveEquation::new(ResidualForm::Homogeneous, GradientMode::JointGradient);
        let out = helmholtz_point(1.0, 0.0, 1.0);
        assert!(matches!(
            eq.residual(&out, 80.0),
            Err(PdeError::MissingField("lambda"))
        ));
    }

    #[test]
    fn layout_split_checks_channel_count() {
        let layout = OutputLayout {
            n_disp: 3,
            form: ResidualForm::PressureHomogeneous,
        };
        assert_eq!(layout.channels(), 5);
        let all = FieldDerivs::<f64> {
            value: DVector::zeros(4),
            jacobian: None,
            hessians: None,
        };
        assert!(matches!(
            layout.split(&all),
            Err(PdeError::OutputDimMismatch { .. })
        ));
    }
}
