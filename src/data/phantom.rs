//! Synthetic plane-wave phantoms. A cohort of records whose wave channel is
//! an exact solution of the incompressible homogeneous wave equation, with
//! matching reference Laplacian and modulus channels, plus a closed-form
//! predictor for sanity checks against the learned one.

use glam::DVec3;
use nalgebra::{DVector, Scalar};
use ndarray::Array3;
use num_dual::DualNum;
use num_traits::Zero;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::data::{
    Cohort, DataError, GridGeometry, PatientRecord, ANAT_SEQUENCES, CH_ANAT_MASK, CH_LWAVE,
    CH_MRE, CH_MRE_MASK, CH_MWAVE, CH_WAVE, MM_TO_M,
};
use crate::models::FieldNet;

#[derive(Debug, Clone, Copy)]
pub struct PhantomSpec {
    pub shape: [usize; 3],
    /// Isotropic voxel spacing [mm].
    pub spacing_mm: f64,
    /// Shear modulus [Pa].
    pub modulus: f64,
    /// Tissue density [kg/m³].
    pub density: f64,
    /// Driving frequency [Hz].
    pub frequency: f64,
    /// Propagation direction (normalized internally).
    pub direction: DVec3,
    /// Displacement amplitude (arbitrary units).
    pub amplitude: f64,
    /// Std-dev of additive measurement noise on the wave channel.
    pub noise: f64,
    pub seed: u64,
}

impl Default for PhantomSpec {
    fn default() -> Self {
        Self {
            shape: [16, 16, 16],
            spacing_mm: 1.0,
            modulus: 1000.0,
            density: 1000.0,
            frequency: 80.0,
            direction: DVec3::X,
            amplitude: 1.0,
            noise: 0.0,
            seed: 7,
        }
    }
}

impl PhantomSpec {
    /// Wave number [rad/m] satisfying the shear dispersion relation
    /// k² = ρω²/μ.
    pub fn wave_number(&self) -> f64 {
        let omega = 2.0 * std::f64::consts::PI * self.frequency;
        omega * (self.density / self.modulus).sqrt()
    }

    /// Wave vector [rad/m].
    pub fn wave_vector(&self) -> DVec3 {
        self.direction.normalize() * self.wave_number()
    }
}

fn grid_field(grid: &GridGeometry, mut f: impl FnMut(DVec3) -> f64) -> Array3<f64> {
    let [nx, ny, nz] = grid.shape;
    Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| f(grid.point(i, j, k) * MM_TO_M))
}

/// Builds one record. The validity mask zeroes a one-voxel rim on the two
/// leading axes so mask attenuation has something to bite on.
pub fn plane_wave_record(
    id: impl Into<String>,
    spec: &PhantomSpec,
    rng: &mut StdRng,
) -> Result<PatientRecord, DataError> {
    let grid = GridGeometry::isotropic(spec.shape, spec.spacing_mm);
    let mut record = PatientRecord::new(id, grid, spec.frequency);
    let k = spec.wave_vector();
    let k2 = spec.wave_number().powi(2);

    let mut wave = grid_field(&grid, |p| spec.amplitude * k.dot(p).sin());
    let lwave = wave.mapv(|u| -k2 * u);
    if spec.noise > 0.0 {
        let dist = Normal::new(0.0, spec.noise).expect("noise std-dev must be finite");
        wave.mapv_inplace(|u| u + dist.sample(rng));
    }
    record.insert_channel(CH_WAVE, wave)?;
    record.insert_channel(CH_LWAVE, lwave)?;
    record.insert_channel(CH_MRE, Array3::from_elem(grid.shape, spec.modulus))?;
    record.insert_channel(CH_MWAVE, Array3::from_elem(grid.shape, spec.modulus))?;

    let [nx, ny, _] = grid.shape;
    let rim_mask = Array3::from_shape_fn(
        (grid.shape[0], grid.shape[1], grid.shape[2]),
        |(i, j, _)| {
            if i == 0 || j == 0 || i == nx - 1 || j == ny - 1 {
                0.0
            } else {
                1.0
            }
        },
    );
    record.insert_channel(CH_MRE_MASK, rim_mask.clone())?;
    record.insert_channel(CH_ANAT_MASK, rim_mask)?;

    // Smooth pseudo-anatomy: a centred bump, scaled per sequence.
    let centre = DVec3::new(
        (nx - 1) as f64 * 0.5 * spec.spacing_mm * MM_TO_M,
        (ny - 1) as f64 * 0.5 * spec.spacing_mm * MM_TO_M,
        (grid.shape[2] - 1) as f64 * 0.5 * spec.spacing_mm * MM_TO_M,
    );
    let width = (nx as f64 * spec.spacing_mm * MM_TO_M * 0.35).powi(2);
    for (s, name) in ANAT_SEQUENCES.iter().enumerate() {
        let gain = 1.0 / (1.0 + s as f64);
        let anat = grid_field(&grid, |p| {
            gain * (-(p - centre).length_squared() / width).exp()
        });
        record.insert_channel(*name, anat)?;
    }
    Ok(record)
}

/// A cohort of plane-wave phantoms with per-record seeds.
pub fn plane_wave_cohort(n: usize, spec: &PhantomSpec) -> Result<Cohort, DataError> {
    let mut patients = Vec::with_capacity(n);
    for p in 0..n {
        let mut rng = StdRng::seed_from_u64(spec.seed.wrapping_add(p as u64));
        patients.push(plane_wave_record(format!("phantom{p:02}"), spec, &mut rng)?);
    }
    Ok(Cohort::new(patients))
}

/// Closed-form predictor for the plane-wave phantom: outputs the exact
/// displacement and the constant modulus, ignoring conditioning features.
/// Feature layout is `[cond.., frequency, x, y, z]` with coordinates in
/// metres, matching the training pipeline.
#[derive(Debug, Clone)]
pub struct PlaneWaveField {
    pub wave_vector: DVec3,
    pub amplitude: f64,
    pub modulus: f64,
    pub n_cond: usize,
}

impl PlaneWaveField {
    pub fn for_spec(spec: &PhantomSpec, n_cond: usize) -> Self {
        Self {
            wave_vector: spec.wave_vector(),
            amplitude: spec.amplitude,
            modulus: spec.modulus,
            n_cond,
        }
    }
}

impl FieldNet for PlaneWaveField {
    fn input_dim(&self) -> usize {
        self.n_cond + 4
    }

    fn output_dim(&self) -> usize {
        2
    }

    fn eval<T: DualNum<f64> + Scalar + Zero>(&self, x: &DVector<T>) -> DVector<T> {
        let o = self.n_cond + 1;
        let phase = x[o].clone() * self.wave_vector.x
            + x[o + 1].clone() * self.wave_vector.y
            + x[o + 2].clone() * self.wave_vector.z;
        let u = phase.sin() * self.amplitude;
        DVector::from_vec(vec![u, T::from(self.modulus)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_number_satisfies_dispersion() {
        let spec = PhantomSpec::default();
        let omega = 2.0 * std::f64::consts::PI * spec.frequency;
        let k2 = spec.wave_number().powi(2);
        assert!((k2 * spec.modulus - spec.density * omega * omega).abs() < 1e-6);
    }

    #[test]
    fn record_carries_the_full_channel_set() {
        let spec = PhantomSpec {
            shape: [6, 6, 4],
            ..PhantomSpec::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let rec = plane_wave_record("p", &spec, &mut rng).unwrap();
        for name in ANAT_SEQUENCES {
            assert!(rec.has_channel(name));
        }
        for name in [CH_WAVE, CH_LWAVE, CH_MRE, CH_MWAVE, CH_MRE_MASK, CH_ANAT_MASK] {
            assert!(rec.has_channel(name));
        }
    }

    #[test]
    fn oracle_matches_the_stored_wave_channel() {
        let spec = PhantomSpec {
            shape: [5, 4, 3],
            ..PhantomSpec::default()
        };
        let mut rng = StdRng::seed_from_u64(2);
        let rec = plane_wave_record("p", &spec, &mut rng).unwrap();
        let net = PlaneWaveField::for_spec(&spec, 1);
        let wave = rec.channel(CH_WAVE).unwrap();
        let p = rec.grid.point(3, 2, 1) * MM_TO_M;
        let feats = DVector::from_vec(vec![0.0, spec.frequency, p.x, p.y, p.z]);
        let out = net.eval(&feats);
        assert!((out[0] - wave[[3, 2, 1]]).abs() < 1e-12);
        assert_eq!(out[1], spec.modulus);
    }
}
