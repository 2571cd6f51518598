//! # DICOM-MPR library
//!
//! This crate reconstructs a DICOM series into a dense 3D volume in patient
//! coordinates and resynthesizes orthogonal slices from it:
//!  - Axial (the acquired images, returned without resampling)
//!  - Coronal (trilinear resampling)
//!  - Sagittal (trilinear resampling)
//!
//! Slices are requested by a normalized position in [0, 1] along each axis.
//! Resampled slices are rescaled into 16 bits and come with pixel spacing,
//! window center/width and rescale slope/intercept, so any grayscale
//! renderer can display them. A reconstruction that turns out empty is
//! replaced by a checkerboard placeholder instead of failing.
//!
//! Images are obtained through the [`SliceLoader`] trait. Loading is
//! asynchronous and happens in batches; a loader for DICOM files on disk
//! ([`DicomFileLoader`]) is included. Slices are ordered by Image Position
//! (Patient) and fall back to Instance Number when position metadata is
//! incomplete. The spacing between slices is measured from their positions
//! rather than taken from Slice Thickness.
//!
//! DICOM files are assumed to have the following attributes:
//!  - Axial data set
//!  - No multiframe (always the first frame is used)
//!  - Images from the same series with identical rows and columns
//!
//! # Examples
//!
//! ## Reading a directory into a volume
//!
//! Read all DICOM files from the dicom/ directory, then get the sagittal
//! image at the center of the volume.
//!
//! ```no_run
//! # use dicom_mpr::{DicomFileLoader, MprEngine, Orientation};
//! # async fn run() -> dicom_mpr::Result<()> {
//! let paths = DicomFileLoader::collect_from_directory("dicom")?;
//! let engine = MprEngine::new(DicomFileLoader);
//! engine.build_volume(&paths).await?;
//! let slice = engine.extract_slice(Orientation::Sagittal, 0.5)?;
//! if let Some(image) = slice.to_image() {
//!     image.save("result.png")?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod diagnostics;
pub mod dicom_loader;
pub mod enums;
pub mod error;
mod interpolator;
pub mod metadata;
pub mod mpr;
pub mod reformatter;
pub mod slice_image;
pub mod transform;
pub mod volume;
pub mod volume_builder;

pub use config::MprConfig;
pub use diagnostics::{MprDiagnostics, VolumeInfo};
pub use dicom_loader::DicomFileLoader;
pub use enums::{Interpolation, Orientation, SliceOrdering, SliceSource};
pub use error::{MprError, Result};
pub use metadata::{SortKey, SpatialMetadata};
pub use mpr::MprEngine;
pub use slice_image::{PixelSpacing, SliceDescriptor, SlicePixels, Window, to_renderable};
pub use transform::{GeometryValidation, Matrix4, PatientTransform};
pub use volume::{Dimensions, Spacing, Volume, VolumeGeometry};
pub use volume_builder::{LogProgress, ProgressSink, SliceLoader, SourceSlice, VolumeBuilder};
