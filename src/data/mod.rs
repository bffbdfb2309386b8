pub mod phantom;
pub mod pipeline;
pub mod sampler;

use std::collections::HashMap;

use glam::DVec3;
use ndarray::{Array3, Array4};
use thiserror::Error;

/// Anatomical MR sequences every record must carry, in stacking order.
pub const ANAT_SEQUENCES: [&str; 4] = ["t1_pre_in", "t1_pre_out", "t1_pre_water", "t1_pre_fat"];

pub const CH_WAVE: &str = "wave";
pub const CH_MRE: &str = "mre";
pub const CH_MRE_MASK: &str = "mre_mask";
pub const CH_ANAT_MASK: &str = "anat_mask";
/// Reference Laplacian of the wave image, evaluation only.
pub const CH_LWAVE: &str = "Lwave";
/// Reference direct-inversion modulus, evaluation only.
pub const CH_MWAVE: &str = "Mwave";

/// Scanner grids are in millimetres, the wave physics in metres.
pub const MM_TO_M: f64 = 1e-3;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("patient '{patient}' has no channel '{channel}'")]
    MissingChannel { patient: String, channel: String },
    #[error("channel '{channel}' has shape {actual:?}, grid is {expected:?}")]
    ShapeMismatch {
        channel: String,
        expected: [usize; 3],
        actual: Vec<usize>,
    },
    #[error("patch size must be positive")]
    EmptyPatch,
    #[error("patch size {patch} exceeds axis extent {extent}")]
    PatchTooLarge { patch: usize, extent: usize },
    #[error("batch size {batch} exceeds cohort size {cohort}")]
    BatchTooLarge { batch: usize, cohort: usize },
    #[error("batch size must be positive")]
    EmptyBatch,
    #[error("cohort is empty")]
    EmptyCohort,
    #[error("patient index {index} out of range 0..{len}")]
    PatientOutOfRange { index: usize, len: usize },
    #[error("samples in one batch have different point counts ({0} vs {1})")]
    InhomogeneousBatch(usize, usize),
}

/// Regular scanner grid shared by every channel of one patient.
/// Spacing and origin are in millimetres.
#[derive(Debug, Clone, Copy)]
pub struct GridGeometry {
    pub shape: [usize; 3],
    pub spacing: DVec3,
    pub origin: DVec3,
}

impl GridGeometry {
    pub fn isotropic(shape: [usize; 3], spacing_mm: f64) -> Self {
        Self {
            shape,
            spacing: DVec3::splat(spacing_mm),
            origin: DVec3::ZERO,
        }
    }

    pub fn num_points(&self) -> usize {
        self.shape.iter().product()
    }

    /// Physical position of voxel (i, j, k) in millimetres.
    pub fn point(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.origin
            + DVec3::new(
                i as f64 * self.spacing.x,
                j as f64 * self.spacing.y,
                k as f64 * self.spacing.z,
            )
    }
}

/// One patient's co-registered image volumes. Built once at load time and
/// read-only afterwards; channels are keyed by name and all share the grid.
#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub id: String,
    pub grid: GridGeometry,
    /// Mechanical driving frequency [Hz].
    pub frequency: f64,
    channels: HashMap<String, Array3<f64>>,
}

impl PatientRecord {
    pub fn new(id: impl Into<String>, grid: GridGeometry, frequency: f64) -> Self {
        Self {
            id: id.into(),
            grid,
            frequency,
            channels: HashMap::new(),
        }
    }

    /// Registers a channel, enforcing the shared-grid invariant.
    pub fn insert_channel(
        &mut self,
        name: impl Into<String>,
        values: Array3<f64>,
    ) -> Result<(), DataError> {
        let name = name.into();
        if values.shape() != self.grid.shape.as_slice() {
            return Err(DataError::ShapeMismatch {
                channel: name,
                expected: self.grid.shape,
                actual: values.shape().to_vec(),
            });
        }
        self.channels.insert(name, values);
        Ok(())
    }

    /// Looks up a channel; a missing name is a configuration error and is
    /// reported immediately rather than skipped.
    pub fn channel(&self, name: &str) -> Result<&Array3<f64>, DataError> {
        self.channels.get(name).ok_or_else(|| DataError::MissingChannel {
            patient: self.id.clone(),
            channel: name.to_string(),
        })
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Physical voxel coordinates, (nx, ny, nz, 3), in millimetres.
    pub fn coords(&self) -> Array4<f64> {
        let [nx, ny, nz] = self.grid.shape;
        Array4::from_shape_fn((nx, ny, nz, 3), |(i, j, k, c)| {
            let p = self.grid.point(i, j, k);
            match c {
                0 => p.x,
                1 => p.y,
                _ => p.z,
            }
        })
    }
}

/// Indexable sequence of patient records.
#[derive(Debug, Clone, Default)]
pub struct Cohort {
    patients: Vec<PatientRecord>,
}

impl Cohort {
    pub fn new(patients: Vec<PatientRecord>) -> Self {
        Self { patients }
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&PatientRecord, DataError> {
        self.patients.get(index).ok_or(DataError::PatientOutOfRange {
            index,
            len: self.patients.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &PatientRecord> {
        self.patients.iter()
    }
}

impl std::ops::Index<usize> for Cohort {
    type Output = PatientRecord;

    fn index(&self, index: usize) -> &PatientRecord {
        &self.patients[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_shape_is_checked_against_the_grid() {
        let grid = GridGeometry::isotropic([4, 4, 2], 1.5);
        let mut rec = PatientRecord::new("p0", grid, 60.0);
        assert!(rec.insert_channel(CH_WAVE, Array3::zeros((4, 4, 2))).is_ok());
        let bad = rec.insert_channel(CH_MRE, Array3::zeros((4, 3, 2)));
        assert!(matches!(bad, Err(DataError::ShapeMismatch { .. })));
    }

    #[test]
    fn missing_channel_is_an_immediate_error() {
        let rec = PatientRecord::new("p1", GridGeometry::isotropic([2, 2, 2], 1.0), 80.0);
        let err = rec.channel(CH_MRE).unwrap_err();
        assert!(matches!(err, DataError::MissingChannel { .. }));
        assert!(err.to_string().contains("mre"));
    }

    #[test]
    fn coords_follow_spacing_and_origin() {
        let mut grid = GridGeometry::isotropic([3, 2, 2], 2.0);
        grid.origin = DVec3::new(1.0, 0.0, -4.0);
        let rec = PatientRecord::new("p2", grid, 80.0);
        let x = rec.coords();
        assert_eq!(x[[2, 0, 0, 0]], 5.0);
        assert_eq!(x[[0, 1, 0, 1]], 2.0);
        assert_eq!(x[[0, 0, 1, 2]], -2.0);
    }
}
