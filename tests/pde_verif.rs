use nalgebra::{DVector, Scalar};
use num_dual::DualNum;
use num_traits::Zero;

use mre_pino_rs::data::phantom::{plane_wave_cohort, PhantomSpec, PlaneWaveField};
use mre_pino_rs::data::pipeline::{PinoConfig, PinoData};
use mre_pino_rs::models::mlp::{SplitFieldNet, TanhMlp};
use mre_pino_rs::models::pino::PinoModel;
use mre_pino_rs::models::{FieldNet, TrainableFieldNet};
use mre_pino_rs::numerics::grad::loss_jacobian;
use mre_pino_rs::numerics::loss::Msae;
use mre_pino_rs::pde::ops::DerivLevel;
use mre_pino_rs::pde::{GradientMode, PdeError, ResidualForm, WaveEquation};

fn pipeline(
    spec: &PhantomSpec,
    patients: usize,
    grad_mode: GradientMode,
    seed: u64,
) -> PinoData {
    let cohort = plane_wave_cohort(patients, spec).expect("phantom cohort");
    let pde = WaveEquation::new(ResidualForm::IncompressibleHomogeneous, grad_mode);
    let config = PinoConfig {
        batch_size: 1,
        seed,
        ..PinoConfig::default()
    };
    PinoData::new(cohort, pde, config).expect("pipeline")
}

#[test]
fn exact_plane_wave_residual_vanishes_on_the_16_cube() {
    // 16³ grid, mu = 1000 Pa, 80 Hz, u = sin(k·x) with k² = rho omega²/mu.
    let spec = PhantomSpec::default();
    let data = pipeline(&spec, 1, GradientMode::JointGradient, 0);
    let net = PlaneWaveField::for_spec(&spec, 1);
    let mut model = PinoModel::new(data, net).expect("model");

    let report = model.test(&Msae).expect("evaluation");
    let omega = 2.0 * std::f64::consts::PI * spec.frequency;
    let norm = spec.density * omega * omega * spec.amplitude;
    assert!(
        report.residual_max / norm < 1e-3,
        "normalized residual {:.3e}",
        report.residual_max / norm
    );
    assert!(report.residual_rms / norm < 1e-3);
    assert!(report.losses.displacement < 1e-12);
    assert!(report.losses.modulus < 1e-12);
}

#[test]
fn baseline_inversion_recovers_modulus_and_flags_wave_nodes() {
    let spec = PhantomSpec::default();
    let data = pipeline(&spec, 1, GradientMode::JointGradient, 1);
    let net = PlaneWaveField::for_spec(&spec, 1);
    let mut model = PinoModel::new(data, net).expect("model");
    let report = model.test(&Msae).expect("evaluation");

    // The i = 0 plane sits exactly on a node of sin(k·x): 16×16 points with a
    // zero Laplacian, flagged NaN instead of divided through.
    assert_eq!(report.baseline_degenerate, 16 * 16);

    let baseline = report
        .quantities
        .iter()
        .find(|q| q.name == "baseline")
        .expect("baseline triple");
    let worst = baseline
        .diff
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    assert!(
        worst < 1e-3 * spec.modulus,
        "baseline disagrees with ground truth by {worst:.3e} Pa"
    );
}

/// Zero displacement with a non-trivial modulus: the stiffness and inertial
/// terms both vanish, so the residual is exactly zero.
struct ZeroField;

impl FieldNet for ZeroField {
    fn input_dim(&self) -> usize {
        5
    }
    fn output_dim(&self) -> usize {
        2
    }
    fn eval<T: DualNum<f64> + Scalar + Zero>(&self, x: &DVector<T>) -> DVector<T> {
        // A modulus that varies with position, to make the check non-trivial.
        DVector::from_vec(vec![T::zero(), x[2].clone() * 500.0 + 2000.0])
    }
}

#[test]
fn zero_displacement_leaves_only_the_force_term() {
    let spec = PhantomSpec {
        shape: [5, 4, 3],
        ..PhantomSpec::default()
    };
    let mut data = pipeline(&spec, 1, GradientMode::JointGradient, 2);
    let batch = data.train_next_batch(Some(1)).expect("batch");
    let model = PinoModel::new(data, ZeroField).expect("model");

    let outputs = model.forward(&batch, DerivLevel::Hessian).expect("forward");
    let losses = model
        .data
        .losses(&batch.targets, &batch.frequencies, &outputs.points, &Msae)
        .expect("losses");
    assert_eq!(losses.pde, 0.0);
    // The data terms still see the measured wave and elastogram.
    assert!(losses.displacement > 0.0);
    assert!(losses.modulus > 0.0);
}

#[test]
fn value_level_forward_cannot_feed_the_pde_loss() {
    let spec = PhantomSpec {
        shape: [4, 4, 2],
        ..PhantomSpec::default()
    };
    let mut data = pipeline(&spec, 1, GradientMode::JointGradient, 3);
    let batch = data.train_next_batch(Some(1)).expect("batch");
    let net = PlaneWaveField::for_spec(&spec, 1);
    let model = PinoModel::new(data, net).expect("model");

    let outputs = model.forward(&batch, DerivLevel::Value).expect("forward");
    let err = model
        .data
        .losses(&batch.targets, &batch.frequencies, &outputs.points, &Msae)
        .unwrap_err();
    assert!(matches!(err, PdeError::DerivativesNotTracked));
}

fn tiny_split_net() -> SplitFieldNet {
    SplitFieldNet::new(TanhMlp::new(&[5, 4, 1], 11), TanhMlp::new(&[5, 3, 1], 13))
}

#[test]
fn modulus_only_mode_zeroes_displacement_parameter_gradients() {
    let spec = PhantomSpec {
        shape: [5, 4, 3],
        ..PhantomSpec::default()
    };
    let net = tiny_split_net();
    let n_disp_params = net.disp_param_count();

    let mut data = pipeline(&spec, 1, GradientMode::ModulusOnlyGradient, 4);
    let batch = data.train_next_batch(Some(1)).expect("batch");
    let layout = data.layout();

    let (_, jac) = loss_jacobian(&net, &data.pde, &layout, &batch, &Msae, 1.0).expect("gradient");

    // PDE row: exactly zero for every displacement-net parameter...
    for c in 0..n_disp_params {
        assert_eq!(jac[(2, c)], 0.0, "pde grad leaked into disp param {c}");
    }
    // ...but alive for the modulus net.
    let mu_grad_norm: f64 = (n_disp_params..net.param_count())
        .map(|c| jac[(2, c)].abs())
        .sum();
    assert!(mu_grad_norm > 0.0);
    // The displacement data term still trains the displacement net.
    let u_grad_norm: f64 = (0..n_disp_params).map(|c| jac[(0, c)].abs()).sum();
    assert!(u_grad_norm > 0.0);
}

#[test]
fn joint_mode_propagates_pde_gradients_into_the_displacement_net() {
    let spec = PhantomSpec {
        shape: [5, 4, 3],
        ..PhantomSpec::default()
    };
    let net = tiny_split_net();
    let n_disp_params = net.disp_param_count();

    let mut data = pipeline(&spec, 1, GradientMode::JointGradient, 4);
    let batch = data.train_next_batch(Some(1)).expect("batch");
    let layout = data.layout();

    let (_, jac) = loss_jacobian(&net, &data.pde, &layout, &batch, &Msae, 1.0).expect("gradient");
    let u_cols: f64 = (0..n_disp_params).map(|c| jac[(2, c)].abs()).sum();
    assert!(u_cols > 0.0, "joint mode should reach displacement params");
}

#[test]
fn loss_jacobian_matches_finite_differences() {
    // Gentler wave parameters keep the PDE term's magnitude small enough
    // that central differences are not dominated by cancellation noise.
    let spec = PhantomSpec {
        shape: [4, 3, 2],
        frequency: 10.0,
        amplitude: 1e-3,
        ..PhantomSpec::default()
    };
    let mut net = tiny_split_net();
    let mut data = pipeline(&spec, 1, GradientMode::JointGradient, 5);
    let batch = data.train_next_batch(Some(1)).expect("batch");
    let layout = data.layout();

    let (_, jac) = loss_jacobian(&net, &data.pde, &layout, &batch, &Msae, 1.0).expect("gradient");

    let theta0 = net.params();
    let h = 1e-6;
    let probes = [0, theta0.len() / 2, theta0.len() - 1];
    for &c in &probes {
        let mut plus = theta0.clone();
        plus[c] += h;
        net.set_params(&plus);
        let (lp, _) =
            loss_jacobian(&net, &data.pde, &layout, &batch, &Msae, 1.0).expect("gradient");
        let mut minus = theta0.clone();
        minus[c] -= h;
        net.set_params(&minus);
        let (lm, _) =
            loss_jacobian(&net, &data.pde, &layout, &batch, &Msae, 1.0).expect("gradient");
        net.set_params(&theta0);

        let fd = [
            (lp.displacement - lm.displacement) / (2.0 * h),
            (lp.modulus - lm.modulus) / (2.0 * h),
            (lp.pde - lm.pde) / (2.0 * h),
        ];
        for (r, fd_val) in fd.iter().enumerate() {
            let ad_val = jac[(r, c)];
            let tol = 1e-4 * ad_val.abs().max(fd_val.abs()).max(1e-8);
            assert!(
                (ad_val - fd_val).abs() < tol,
                "row {r} col {c}: ad {ad_val:.6e} vs fd {fd_val:.6e}"
            );
        }
    }
}
