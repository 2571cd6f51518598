use std::fmt;
use std::time::Duration;

use crate::enums::{Interpolation, Orientation, SliceOrdering};
use crate::slice_image::SliceStatistics;
use crate::transform::{GeometryValidation, PatientTransform};
use crate::volume::{Dimensions, Spacing};

/// Summary of the currently built volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    pub dimensions: Dimensions,
    pub spacing: Spacing,
    pub origin: [f64; 3],
    /// Slices that made it into the volume
    pub slice_count: usize,
    /// Slices requested by the build
    pub requested: usize,
    pub ordering: SliceOrdering,
    /// (min, max) stored pixel value across the series
    pub global_range: (i32, i32),
    pub interpolation: Interpolation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformStatus {
    pub determinant: f64,
    /// The affine could not be inverted
    pub singular: bool,
    /// Identity is standing in for the inverse. Derived from `singular`:
    /// a singular affine always falls back to the identity inverse.
    pub identity_fallback: bool,
}

impl TransformStatus {
    pub fn from_transform(transform: &PatientTransform) -> Self {
        Self {
            determinant: transform.determinant(),
            singular: transform.is_singular(),
            identity_fallback: transform.is_singular(),
        }
    }
}

/// Non-zero voxel counts of the three mid-planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeIntegrity {
    pub axial: usize,
    pub sagittal: usize,
    pub coronal: usize,
}

impl VolumeIntegrity {
    pub fn is_intact(&self) -> bool {
        self.axial > 0 && self.sagittal > 0 && self.coronal > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceSelfTest {
    pub orientation: Orientation,
    pub success: bool,
    pub elapsed: Duration,
    pub quality_score: Option<f32>,
    pub error: Option<String>,
}

/// Health report for external tooling.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MprDiagnostics {
    pub ready: bool,
    pub info: Option<VolumeInfo>,
    pub transform: Option<TransformStatus>,
    pub geometry_validation: Option<GeometryValidation>,
    pub volume_statistics: Option<SliceStatistics>,
    pub integrity: Option<VolumeIntegrity>,
    pub slice_tests: Vec<SliceSelfTest>,
}

impl fmt::Display for MprDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Volume ready: {}", self.ready)?;
        let Some(info) = &self.info else {
            return Ok(());
        };
        let d = info.dimensions;
        writeln!(f, "Dimensions: {} x {} x {}", d.width, d.height, d.depth)?;
        writeln!(
            f,
            "Spacing: {:.3} x {:.3} x {:.3}",
            info.spacing.x, info.spacing.y, info.spacing.z
        )?;
        writeln!(
            f,
            "Origin: ({:.2}, {:.2}, {:.2})",
            info.origin[0], info.origin[1], info.origin[2]
        )?;
        writeln!(f, "Slices: {}/{} ({:?})", info.slice_count, info.requested, info.ordering)?;

        if let Some(transform) = &self.transform {
            if transform.singular {
                writeln!(
                    f,
                    "Transform: SINGULAR (det {:e}), identity fallback in use",
                    transform.determinant
                )?;
            } else {
                writeln!(f, "Transform: ok (det {:.4})", transform.determinant)?;
            }
        }
        if let Some(validation) = &self.geometry_validation {
            let verdict = if validation.passed { "passed" } else { "FAILED" };
            writeln!(f, "Geometry validation: {verdict} (max error {:.4})", validation.max_error)?;
        }
        if let Some(stats) = &self.volume_statistics {
            writeln!(
                f,
                "Voxels: min {:.1}, max {:.1}, mean {:.1}, fill {:.1}%",
                stats.min,
                stats.max,
                stats.mean,
                stats.fill_ratio * 100.0
            )?;
        }
        if let Some(integrity) = &self.integrity {
            writeln!(
                f,
                "Mid-plane non-zero voxels: axial {}, sagittal {}, coronal {}",
                integrity.axial, integrity.sagittal, integrity.coronal
            )?;
        }
        for test in &self.slice_tests {
            let quality = test
                .quality_score
                .map(|q| format!("{:.1}%", q * 100.0))
                .unwrap_or_else(|| "-".to_owned());
            writeln!(
                f,
                "{:>8}: {} in {:.2?}, quality {quality}",
                test.orientation.as_str(),
                if test.success { "ok" } else { "FAILED" },
                test.elapsed
            )?;
        }
        Ok(())
    }
}
