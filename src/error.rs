use thiserror::Error;

use crate::enums::Orientation;

/// Result type for reconstruction operations
pub type Result<T> = std::result::Result<T, MprError>;

#[derive(Debug, Error)]
pub enum MprError {
    #[error("Insufficient data: loaded {loaded} of {requested} slices")]
    InsufficientData { loaded: usize, requested: usize },

    #[error("Volume build already in progress")]
    BuildInProgress,

    #[error("No volume has been built")]
    NotReady,

    #[error("Empty {orientation} slice (fill ratio {fill_ratio:.3})")]
    EmptySlice {
        orientation: Orientation,
        fill_ratio: f32,
    },

    #[error("Inconsistent image dimensions: expected {expected:?}, found {found:?}")]
    InconsistentDimensions {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid pixel buffer: expected {expected} samples, found {found}")]
    InvalidPixelBuffer { expected: usize, found: usize },

    #[error("Slice load failed: {0}")]
    SliceLoad(String),

    #[error("Pixel data error: {0}")]
    PixelData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
