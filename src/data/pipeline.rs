use nalgebra::Scalar;
use ndarray::{s, Array2, Array3};
use num_dual::DualNum;
use num_traits::Zero;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::sampler::EpochSampler;
use crate::data::{Cohort, DataError, ANAT_SEQUENCES, CH_MRE, CH_MRE_MASK, CH_WAVE, MM_TO_M};
use crate::numerics::loss::MaskedLoss;
use crate::pde::{OutputLayout, PdeError, PointOutputs, WaveEquation};

#[derive(Debug, Clone, Copy)]
pub struct PinoConfig {
    pub batch_size: usize,
    /// Side length of the square window cropped from the two leading spatial
    /// axes; `None` keeps full volumes.
    pub patch_size: Option<usize>,
    /// Mask strength handed to the loss function.
    pub mask_level: f64,
    /// Grid-to-physical coordinate scale (mm → m by default).
    pub coord_scale: f64,
    pub seed: u64,
}

impl Default for PinoConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            patch_size: None,
            mask_level: 1.0,
            coord_scale: MM_TO_M,
            seed: 0,
        }
    }
}

/// Per-patient point tensors: grids flattened to N rows.
#[derive(Debug, Clone)]
pub struct SampleTensors {
    /// Measured wave conditioning input, N×1.
    pub wave_in: Array2<f64>,
    /// Coordinates [frequency, x, y, z], N×4.
    pub coords: Array2<f64>,
    /// Concatenated [u_true, mu_true, mask], N×3.
    pub targets: Array2<f64>,
    /// Anatomical sequence stack, N×4.
    pub anatomy: Array2<f64>,
    pub grid_shape: [usize; 3],
    pub patch_origin: Option<[usize; 2]>,
    pub frequency: f64,
}

/// Mini-batch of stacked sample tensors plus the drawn patient indices.
#[derive(Debug, Clone)]
pub struct Batch {
    pub indices: Vec<usize>,
    pub wave_in: Array3<f64>,
    pub coords: Array3<f64>,
    pub targets: Array3<f64>,
    pub anatomy: Array3<f64>,
    pub frequencies: Vec<f64>,
    pub grid_shape: [usize; 3],
    pub patch_origins: Vec<Option<[usize; 2]>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn points_per_sample(&self) -> usize {
        self.coords.dim().1
    }
}

/// Ordered loss triple; weighting is the caller's business.
#[derive(Debug, Clone, Copy)]
pub struct LossTerms {
    pub displacement: f64,
    pub modulus: f64,
    pub pde: f64,
}

impl LossTerms {
    pub fn weighted(&self, w: [f64; 3]) -> f64 {
        w[0] * self.displacement + w[1] * self.modulus + w[2] * self.pde
    }
}

impl std::fmt::Display for LossTerms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "u={:.3e} mu={:.3e} pde={:.3e}",
            self.displacement, self.modulus, self.pde
        )
    }
}

/// Training-data pipeline: draws patients, extracts patch-cropped channel
/// tensors, stacks batches and computes the masked loss triple.
#[derive(Debug)]
pub struct PinoData {
    pub cohort: Cohort,
    pub pde: WaveEquation,
    pub config: PinoConfig,
    layout: OutputLayout,
    sampler: EpochSampler,
    rng: StdRng,
}

impl PinoData {
    pub fn new(cohort: Cohort, pde: WaveEquation, config: PinoConfig) -> Result<Self, DataError> {
        if cohort.is_empty() {
            return Err(DataError::EmptyCohort);
        }
        let layout = OutputLayout {
            n_disp: 1,
            form: pde.form,
        };
        let sampler = EpochSampler::new(cohort.len(), config.seed);
        let rng = StdRng::seed_from_u64(config.seed ^ 0x9e37_79b9_7f4a_7c15);
        Ok(Self {
            cohort,
            pde,
            config,
            layout,
            sampler,
            rng,
        })
    }

    pub fn layout(&self) -> OutputLayout {
        self.layout
    }

    /// Coordinate dimensions per point (frequency + space).
    pub fn coord_dim(&self) -> usize {
        4
    }

    /// Index of the first differentiated coordinate.
    pub fn start_dim(&self) -> usize {
        1
    }

    /// Extracts one patient's tensors, optionally cropping an axis-aligned
    /// square window with uniformly random origin from the two leading
    /// spatial axes. The same window is applied to every channel.
    pub fn get_tensors(
        &mut self,
        idx: usize,
        patch: Option<usize>,
    ) -> Result<SampleTensors, DataError> {
        let record = self.cohort.get(idx)?;
        let [nx, ny, nz] = record.grid.shape;
        let (px, py, x0, y0) = match patch {
            None => (nx, ny, 0, 0),
            Some(p) => {
                if p == 0 {
                    return Err(DataError::EmptyPatch);
                }
                let extent = nx.min(ny);
                if p > extent {
                    return Err(DataError::PatchTooLarge { patch: p, extent });
                }
                (
                    p,
                    p,
                    self.rng.gen_range(0..=nx - p),
                    self.rng.gen_range(0..=ny - p),
                )
            }
        };

        let wave = record.channel(CH_WAVE)?;
        let mre = record.channel(CH_MRE)?;
        let mask = record.channel(CH_MRE_MASK)?;
        let anat = ANAT_SEQUENCES
            .iter()
            .map(|name| record.channel(name))
            .collect::<Result<Vec<_>, _>>()?;

        let n = px * py * nz;
        let mut wave_in = Array2::zeros((n, 1));
        let mut coords = Array2::zeros((n, 4));
        let mut targets = Array2::zeros((n, 3));
        let mut anatomy = Array2::zeros((n, anat.len()));
        let mut row = 0;
        for i in 0..px {
            for j in 0..py {
                for k in 0..nz {
                    let (gi, gj) = (x0 + i, y0 + j);
                    let p = record.grid.point(gi, gj, k) * self.config.coord_scale;
                    wave_in[[row, 0]] = wave[[gi, gj, k]];
                    coords[[row, 0]] = record.frequency;
                    coords[[row, 1]] = p.x;
                    coords[[row, 2]] = p.y;
                    coords[[row, 3]] = p.z;
                    targets[[row, 0]] = wave[[gi, gj, k]];
                    targets[[row, 1]] = mre[[gi, gj, k]];
                    targets[[row, 2]] = mask[[gi, gj, k]];
                    for (c, a) in anat.iter().enumerate() {
                        anatomy[[row, c]] = a[[gi, gj, k]];
                    }
                    row += 1;
                }
            }
        }

        Ok(SampleTensors {
            wave_in,
            coords,
            targets,
            anatomy,
            grid_shape: [px, py, nz],
            patch_origin: patch.map(|_| [x0, y0]),
            frequency: record.frequency,
        })
    }

    /// Draws the next batch of patients from the epoch sampler, extracts and
    /// stacks their tensors along a new batch axis.
    pub fn train_next_batch(&mut self, batch_size: Option<usize>) -> Result<Batch, DataError> {
        let b = batch_size.unwrap_or(self.config.batch_size);
        let indices = self.sampler.next_batch(b)?;
        let patch = self.config.patch_size;

        let mut samples = Vec::with_capacity(indices.len());
        for &idx in &indices {
            samples.push(self.get_tensors(idx, patch)?);
        }
        let n0 = samples[0].coords.nrows();
        for s in &samples[1..] {
            if s.coords.nrows() != n0 {
                return Err(DataError::InhomogeneousBatch(n0, s.coords.nrows()));
            }
        }

        let frequencies = samples.iter().map(|s| s.frequency).collect();
        let patch_origins = samples.iter().map(|s| s.patch_origin).collect();
        let grid_shape = samples[0].grid_shape;
        Ok(Batch {
            indices,
            wave_in: stacked(samples.iter().map(|s| &s.wave_in)),
            coords: stacked(samples.iter().map(|s| &s.coords)),
            targets: stacked(samples.iter().map(|s| &s.targets)),
            anatomy: stacked(samples.iter().map(|s| &s.anatomy)),
            frequencies,
            grid_shape,
            patch_origins,
        })
    }

    /// Single-sample evaluation batch; the drawn index rides along in the
    /// batch for ground-truth lookup.
    pub fn test(&mut self) -> Result<Batch, DataError> {
        self.train_next_batch(Some(1))
    }

    /// Splits targets into displacement truth, modulus truth and mask, and
    /// returns the ordered (displacement, modulus, PDE) loss triple. The PDE
    /// residual is compared against zero under the same mask.
    pub fn losses<L: MaskedLoss>(
        &self,
        targets: &Array3<f64>,
        frequencies: &[f64],
        outputs: &[Vec<PointOutputs<f64>>],
        loss_fn: &L,
    ) -> Result<LossTerms, PdeError> {
        let [u, mu, pde] = batch_losses(
            &self.pde,
            self.layout.n_disp,
            targets,
            frequencies,
            outputs,
            loss_fn,
            self.config.mask_level,
        )?;
        Ok(LossTerms {
            displacement: u,
            modulus: mu,
            pde,
        })
    }
}

fn stacked<'a>(parts: impl Iterator<Item = &'a Array2<f64>>) -> Array3<f64> {
    let parts: Vec<&Array2<f64>> = parts.collect();
    let (n, c) = parts[0].dim();
    let mut out = Array3::zeros((parts.len(), n, c));
    for (i, part) in parts.into_iter().enumerate() {
        out.slice_mut(s![i, .., ..]).assign(part);
    }
    out
}

/// Loss assembly shared between plain reporting and the parameter-gradient
/// path; generic over the AD scalar the outputs were evaluated under.
pub(crate) fn batch_losses<T, L>(
    pde: &WaveEquation,
    n_disp: usize,
    targets: &Array3<f64>,
    frequencies: &[f64],
    outputs: &[Vec<PointOutputs<T>>],
    loss_fn: &L,
    mask_level: f64,
) -> Result<[T; 3], PdeError>
where
    T: DualNum<f64> + Scalar + Zero,
    L: MaskedLoss,
{
    let (b, n, c) = targets.dim();
    if outputs.len() != b || c != n_disp + 2 {
        return Err(PdeError::OutputDimMismatch {
            expected: n_disp + 2,
            actual: c,
        });
    }

    let mut u_pred = Vec::with_capacity(b * n * n_disp);
    let mut u_true = Vec::with_capacity(b * n * n_disp);
    let mut u_mask = Vec::with_capacity(b * n * n_disp);
    let mut mu_pred = Vec::with_capacity(b * n);
    let mut mu_true = Vec::with_capacity(b * n);
    let mut mu_mask = Vec::with_capacity(b * n);
    let mut res_pred = Vec::with_capacity(b * n * n_disp);
    let mut res_mask = Vec::with_capacity(b * n * n_disp);

    for (bi, sample) in outputs.iter().enumerate() {
        if sample.len() != n {
            return Err(PdeError::OutputDimMismatch {
                expected: n,
                actual: sample.len(),
            });
        }
        let freq = frequencies[bi];
        for (ni, point) in sample.iter().enumerate() {
            let mask = targets[[bi, ni, n_disp + 1]];
            for d in 0..n_disp {
                u_pred.push(point.u.value[d].clone());
                u_true.push(targets[[bi, ni, d]]);
                u_mask.push(mask);
            }
            mu_pred.push(point.mu.value[0].clone());
            mu_true.push(targets[[bi, ni, n_disp]]);
            mu_mask.push(mask);
            let residual = pde.residual(point, freq)?;
            for r in residual.iter() {
                res_pred.push(r.clone());
                res_mask.push(mask);
            }
        }
    }

    let zeros = vec![0.0; res_pred.len()];
    let u_loss = loss_fn.eval(&u_pred, &u_true, &u_mask, mask_level);
    let mu_loss = loss_fn.eval(&mu_pred, &mu_true, &mu_mask, mask_level);
    let pde_loss = loss_fn.eval(&res_pred, &zeros, &res_mask, mask_level);
    Ok([u_loss, mu_loss, pde_loss])
}
