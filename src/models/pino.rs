use std::f64::consts::PI;

use ndarray::{s, Array2, Array3};
use thiserror::Error;

use crate::data::pipeline::{Batch, LossTerms, PinoData};
use crate::data::{DataError, CH_ANAT_MASK, CH_LWAVE, CH_MRE, CH_MRE_MASK, CH_MWAVE, CH_WAVE};
use crate::models::FieldNet;
use crate::numerics::loss::{mask_weight, MaskedLoss};
use crate::numerics::timing::{timed, StageTimings};
use crate::pde::ops::{laplacian_of, sample_field, DerivLevel};
use crate::pde::{PdeError, PointOutputs};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Pde(#[from] PdeError),
}

/// Network outputs for a whole batch, split per field, with whatever
/// derivative tracking the forward pass was run at.
pub struct BatchOutputs {
    pub points: Vec<Vec<PointOutputs<f64>>>,
}

/// Derived quantities for one sample, as point matrices.
pub struct SamplePrediction {
    pub u: Array2<f64>,
    pub mu: Vec<f64>,
    pub lap_u: Array2<f64>,
    pub f_trac: Array2<f64>,
    pub f_body: Array2<f64>,
}

/// Prediction/difference/ground-truth bundle for one reported quantity,
/// reshaped onto the sample's grid window and mask-attenuated.
pub struct QuantityTriple {
    pub name: &'static str,
    pub pred: Array3<f64>,
    pub diff: Array3<f64>,
    pub truth: Array3<f64>,
}

pub struct EvalReport {
    pub patient: usize,
    pub grid_shape: [usize; 3],
    pub window: Option<[usize; 2]>,
    pub losses: LossTerms,
    pub residual_rms: f64,
    pub residual_max: f64,
    /// Points where the baseline inversion hit a near-zero Laplacian and
    /// produced a flagged NaN instead of dividing.
    pub baseline_degenerate: usize,
    pub quantities: Vec<QuantityTriple>,
}

/// Composes the network forward pass, residual evaluation, derived-quantity
/// computation and diagnostic reporting over a [`PinoData`] pipeline.
pub struct PinoModel<N: FieldNet> {
    pub data: PinoData,
    pub net: N,
}

impl<N: FieldNet> PinoModel<N> {
    pub fn new(data: PinoData, net: N) -> Result<Self, PdeError> {
        let expected_in = 1 + data.coord_dim();
        if net.input_dim() != expected_in {
            return Err(PdeError::InputDimMismatch {
                expected: expected_in,
                actual: net.input_dim(),
            });
        }
        let expected_out = data.layout().channels();
        if net.output_dim() != expected_out {
            return Err(PdeError::OutputDimMismatch {
                expected: expected_out,
                actual: net.output_dim(),
            });
        }
        Ok(Self { data, net })
    }

    /// Runs the network over every batch point at the requested derivative
    /// level. Tracking is seeded here, before each pointwise forward pass;
    /// feeding a `Value`-level result to the PDE loss fails with a
    /// differentiation error rather than returning zeros.
    pub fn forward(&self, batch: &Batch, level: DerivLevel) -> Result<BatchOutputs, PdeError> {
        let (b, n, _) = batch.coords.dim();
        let layout = self.data.layout();
        let start_dim = self.data.start_dim();
        let mut points = Vec::with_capacity(b);
        for bi in 0..b {
            let mut sample = Vec::with_capacity(n);
            for ni in 0..n {
                let cond: Vec<f64> = batch.wave_in.slice(s![bi, ni, ..]).to_vec();
                let x: Vec<f64> = batch.coords.slice(s![bi, ni, ..]).to_vec();
                let field = sample_field(&self.net, &cond, &x, start_dim, level)?;
                sample.push(layout.split(&field)?);
            }
            points.push(sample);
        }
        Ok(BatchOutputs { points })
    }

    /// Tracked forward pass plus derived quantities: displacement, modulus,
    /// displacement Laplacian, and the traction/body-force split of the PDE
    /// residual.
    pub fn predict(
        &self,
        wave_in: &Array3<f64>,
        coords: &Array3<f64>,
        frequencies: &[f64],
    ) -> Result<Vec<SamplePrediction>, PdeError> {
        let (b, n, _) = coords.dim();
        let layout = self.data.layout();
        let start_dim = self.data.start_dim();
        let mut out = Vec::with_capacity(b);
        for bi in 0..b {
            let mut sample = Vec::with_capacity(n);
            for ni in 0..n {
                let cond: Vec<f64> = wave_in.slice(s![bi, ni, ..]).to_vec();
                let x: Vec<f64> = coords.slice(s![bi, ni, ..]).to_vec();
                let field = sample_field(&self.net, &cond, &x, start_dim, DerivLevel::Hessian)?;
                sample.push(layout.split(&field)?);
            }
            out.push(self.derive_sample(&sample, frequencies[bi])?);
        }
        Ok(out)
    }

    fn derive_sample(
        &self,
        points: &[PointOutputs<f64>],
        frequency: f64,
    ) -> Result<SamplePrediction, PdeError> {
        let n = points.len();
        let m = self.data.layout().n_disp;
        let mut u = Array2::zeros((n, m));
        let mut mu = Vec::with_capacity(n);
        let mut lap_u = Array2::zeros((n, m));
        let mut f_trac = Array2::zeros((n, m));
        let mut f_body = Array2::zeros((n, m));
        for (ni, point) in points.iter().enumerate() {
            let lap = laplacian_of(&point.u)?;
            let (trac, body) = self
                .data
                .pde
                .traction_and_body_forces(point, frequency)?;
            for d in 0..m {
                u[[ni, d]] = point.u.value[d];
                lap_u[[ni, d]] = lap[d];
                f_trac[[ni, d]] = trac[d];
                f_body[[ni, d]] = body[d];
            }
            mu.push(point.mu.value[0]);
        }
        Ok(SamplePrediction {
            u,
            mu,
            lap_u,
            f_trac,
            f_body,
        })
    }

    /// One training step's worth of data, forward and loss evaluation.
    pub fn train_losses<L: MaskedLoss>(
        &mut self,
        loss_fn: &L,
    ) -> Result<(Batch, LossTerms), ModelError> {
        let batch = self.data.train_next_batch(None)?;
        let outputs = self.forward(&batch, DerivLevel::Hessian)?;
        let losses = self.data.losses(
            &batch.targets,
            &batch.frequencies,
            &outputs.points,
            loss_fn,
        )?;
        Ok((batch, losses))
    }

    /// Measures the fractional wall time of data loading, forward pass and
    /// loss computation over `n_iters` iterations and prints the breakdown.
    pub fn benchmark<L: MaskedLoss>(
        &mut self,
        n_iters: usize,
        loss_fn: &L,
    ) -> Result<StageTimings, ModelError> {
        println!("# iterations: {n_iters}");
        let mut stats = StageTimings::default();
        for _ in 0..n_iters {
            let (batch, t_data) = timed(|| self.data.train_next_batch(None));
            let batch = batch?;
            let (outputs, t_forward) = timed(|| self.forward(&batch, DerivLevel::Hessian));
            let outputs = outputs?;
            let (losses, t_loss) = timed(|| {
                self.data.losses(
                    &batch.targets,
                    &batch.frequencies,
                    &outputs.points,
                    loss_fn,
                )
            });
            losses?;
            stats.record(t_data, t_forward, t_loss);
        }
        stats.print_summary();
        Ok(stats)
    }

    /// Runs one evaluation sample: tracked prediction, loss triple, a
    /// model-free Helmholtz-inversion baseline modulus as sanity check, and
    /// prediction/difference/truth triples per reported quantity.
    pub fn test<L: MaskedLoss>(&mut self, loss_fn: &L) -> Result<EvalReport, ModelError> {
        let batch = self.data.test()?;
        let patient = batch.indices[0];
        let window = batch.patch_origins[0];
        let shape = batch.grid_shape;
        let frequency = batch.frequencies[0];

        let outputs = self.forward(&batch, DerivLevel::Hessian)?;
        let losses = self.data.losses(
            &batch.targets,
            &batch.frequencies,
            &outputs.points,
            loss_fn,
        )?;
        let pred = self.derive_sample(&outputs.points[0], frequency)?;

        // Model-free baseline: mu ≈ -rho (2π f)² u / ∇²u, with near-zero
        // denominators flagged as NaN instead of blowing up.
        let rho = self.data.pde.rho;
        let scale = -rho * (2.0 * PI * frequency).powi(2);
        let n = pred.mu.len();
        let lap_floor = 1e-12
            * pred
                .lap_u
                .column(0)
                .iter()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let mut degenerate = 0;
        let mut baseline = Vec::with_capacity(n);
        for ni in 0..n {
            let lap = pred.lap_u[[ni, 0]];
            if lap.abs() <= lap_floor {
                degenerate += 1;
                baseline.push(f64::NAN);
            } else {
                baseline.push(scale * pred.u[[ni, 0]] / lap);
            }
        }
        if degenerate > 0 {
            eprintln!(
                "WARNING: baseline inversion hit {degenerate}/{n} near-zero Laplacian points"
            );
        }

        let record = self.data.cohort.get(patient)?;
        let crop = |name: &str| -> Result<Vec<f64>, DataError> {
            Ok(flatten_window(record.channel(name)?, window, shape))
        };
        let u_true = crop(CH_WAVE)?;
        let lu_true = crop(CH_LWAVE)?;
        let mu_true = crop(CH_MRE)?;
        let big_mu_true = crop(CH_MWAVE)?;
        let a_true = crop(crate::data::ANAT_SEQUENCES[0])?;
        let strength = self.data.config.mask_level;
        let m_mask: Vec<f64> = crop(CH_MRE_MASK)?
            .into_iter()
            .map(|v| mask_weight(v, strength))
            .collect();
        let a_mask: Vec<f64> = crop(CH_ANAT_MASK)?
            .into_iter()
            .map(|v| mask_weight(v, strength))
            .collect();

        let u_pred: Vec<f64> = pred.u.column(0).iter().copied().collect();
        let lu_pred: Vec<f64> = pred.lap_u.column(0).iter().copied().collect();
        let trac: Vec<f64> = pred.f_trac.column(0).iter().copied().collect();
        let body: Vec<f64> = pred.f_body.column(0).iter().copied().collect();
        let residual: Vec<f64> = trac.iter().zip(&body).map(|(t, b)| t + b).collect();
        let pde_grad: Vec<f64> = residual
            .iter()
            .zip(&lu_pred)
            .map(|(r, l)| 2.0 * l * r)
            .collect();

        let residual_rms = (residual.iter().map(|r| r * r).sum::<f64>() / n as f64).sqrt();
        let residual_max = residual.iter().fold(0.0_f64, |acc, r| acc.max(r.abs()));

        let quantities = vec![
            triple_raw("anatomy", shape, &a_mask, &mul(&a_mask, &a_true), &a_true),
            triple_masked("wave field", shape, &u_pred, &u_true, &m_mask),
            triple_masked("Laplacian", shape, &lu_pred, &lu_true, &m_mask),
            triple_raw(
                "PDE",
                shape,
                &mul(&trac, &m_mask),
                &mul(&residual, &m_mask),
                &mul(&pde_grad, &m_mask),
            ),
            triple_masked("elastogram", shape, &pred.mu, &mu_true, &m_mask),
            triple_masked("baseline", shape, &baseline, &big_mu_true, &m_mask),
        ];

        Ok(EvalReport {
            patient,
            grid_shape: shape,
            window,
            losses,
            residual_rms,
            residual_max,
            baseline_degenerate: degenerate,
            quantities,
        })
    }
}

fn flatten_window(
    channel: &Array3<f64>,
    window: Option<[usize; 2]>,
    shape: [usize; 3],
) -> Vec<f64> {
    let [x0, y0] = window.unwrap_or([0, 0]);
    let [px, py, nz] = shape;
    let mut out = Vec::with_capacity(px * py * nz);
    for i in 0..px {
        for j in 0..py {
            for k in 0..nz {
                out.push(channel[[x0 + i, y0 + j, k]]);
            }
        }
    }
    out
}

fn mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x * y).collect()
}

fn to_grid(shape: [usize; 3], values: Vec<f64>) -> Array3<f64> {
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), values)
        .expect("point count matches the grid window")
}

/// (pred·m, (truth−pred)·m, truth·m) on the grid window.
fn triple_masked(
    name: &'static str,
    shape: [usize; 3],
    pred: &[f64],
    truth: &[f64],
    mask: &[f64],
) -> QuantityTriple {
    let diff: Vec<f64> = truth
        .iter()
        .zip(pred)
        .zip(mask)
        .map(|((t, p), m)| (t - p) * m)
        .collect();
    QuantityTriple {
        name,
        pred: to_grid(shape, mul(pred, mask)),
        diff: to_grid(shape, diff),
        truth: to_grid(shape, mul(truth, mask)),
    }
}

/// Three already-prepared columns, no extra masking.
fn triple_raw(
    name: &'static str,
    shape: [usize; 3],
    pred: &[f64],
    diff: &[f64],
    truth: &[f64],
) -> QuantityTriple {
    QuantityTriple {
        name,
        pred: to_grid(shape, pred.to_vec()),
        diff: to_grid(shape, diff.to_vec()),
        truth: to_grid(shape, truth.to_vec()),
    }
}
