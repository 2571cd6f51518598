use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Axial = 0,
    Coronal = 1,
    Sagittal = 2,
}

/// Volume axes whose spacing becomes the (column, row) pixel spacing of a
/// slice, indexed by orientation discriminant.
const SPACING_AXES: [(Axis, Axis); 3] = [
    // Axial: X across, Y down
    (Axis::X, Axis::Y),
    // Coronal: X across, Z down
    (Axis::X, Axis::Z),
    // Sagittal: Z across, Y down
    (Axis::Z, Axis::Y),
];

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Sagittal,
        Orientation::Coronal,
    ];

    /// Axes providing the (column, row) pixel spacing of slices in this
    /// orientation.
    pub const fn spacing_axes(self) -> (Axis, Axis) {
        SPACING_AXES[self as usize]
    }

    /// Axis along which the slice plane moves.
    pub const fn normal_axis(self) -> Axis {
        match self {
            Orientation::Axial => Axis::Z,
            Orientation::Coronal => Axis::Y,
            Orientation::Sagittal => Axis::X,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown orientation '{0}' (expected axial, sagittal or coronal)")]
pub struct ParseOrientationError(pub String);

impl FromStr for Orientation {
    type Err = ParseOrientationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "axial" => Ok(Orientation::Axial),
            "coronal" => Ok(Orientation::Coronal),
            "sagittal" => Ok(Orientation::Sagittal),
            _ => Err(ParseOrientationError(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Trilinear,
    Nearest,
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpolation::Trilinear => f.write_str("trilinear"),
            Interpolation::Nearest => f.write_str("nearest"),
        }
    }
}

/// Where the pixels of a slice descriptor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceSource {
    /// An acquired slice returned without resampling
    Original,
    /// Resampled from the volume
    Reconstructed,
    /// Placeholder pattern after a failed reconstruction
    Fallback,
}

/// Key the series was ordered by.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SliceOrdering {
    #[default]
    ImagePositionPatient,
    InstanceNumber,
}
