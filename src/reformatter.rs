use log::{debug, warn};
use web_time::Instant;

use crate::config::MprConfig;
use crate::enums::{Orientation, SliceSource};
use crate::error::{MprError, Result};
use crate::slice_image::{SliceDescriptor, SlicePixels, SliceStatistics, to_renderable_with};
use crate::volume_builder::BuiltVolume;

/// Clamps a requested position into [0, 1]; NaN maps to 0.
pub fn clamp_position(position: f32) -> f32 {
    if position.is_nan() {
        0.0
    } else {
        position.clamp(0.0, 1.0)
    }
}

/// Produces orthogonal slices from a built volume.
pub struct SliceReformatter<'a> {
    built: &'a BuiltVolume,
    config: &'a MprConfig,
}

impl<'a> SliceReformatter<'a> {
    pub fn new(built: &'a BuiltVolume, config: &'a MprConfig) -> Self {
        Self { built, config }
    }

    /// Extracts the slice at `position` along `orientation`.
    ///
    /// Axial slices are the acquired images. Sagittal and coronal slices are
    /// resampled; if that fails a checkerboard placeholder is returned
    /// instead, so the result is always displayable.
    pub fn extract(&self, orientation: Orientation, position: f32) -> SliceDescriptor {
        let started = Instant::now();
        let position = clamp_position(position);
        let plane_index = self.built.volume.plane_index(orientation, position);

        let result = match orientation {
            Orientation::Axial => self.original_axial(position, plane_index),
            Orientation::Sagittal | Orientation::Coronal => {
                self.reconstruct(orientation, position, plane_index)
            }
        };

        let mut descriptor = result.unwrap_or_else(|e| {
            warn!("Falling back to placeholder for {orientation} slice at {position}: {e}");
            self.fallback(orientation, position, plane_index)
        });
        descriptor.processing_time = started.elapsed();
        debug!(
            "{orientation} slice {} generated in {:.2?} ({:?})",
            plane_index, descriptor.processing_time, descriptor.source
        );
        descriptor
    }

    fn original_axial(&self, position: f32, plane_index: usize) -> Result<SliceDescriptor> {
        let plane = self
            .built
            .planes
            .get(plane_index)
            .ok_or_else(|| MprError::EmptySlice {
                orientation: Orientation::Axial,
                fill_ratio: 0.0,
            })?;
        let (height, width) = plane.pixels.dim();
        let non_zero = plane.pixels.iter().filter(|&&p| p != 0).count();

        Ok(SliceDescriptor {
            orientation: Orientation::Axial,
            position,
            plane_index,
            pixels: SlicePixels::Stored(plane.pixels.clone()),
            width,
            height,
            pixel_spacing: self.built.volume.pixel_spacing(Orientation::Axial),
            window: plane.window,
            rescale_slope: plane.rescale_slope,
            rescale_intercept: plane.rescale_intercept,
            quality_score: non_zero as f32 / plane.pixels.len().max(1) as f32,
            source: SliceSource::Original,
            processing_time: Default::default(),
        })
    }

    fn reconstruct(
        &self,
        orientation: Orientation,
        position: f32,
        plane_index: usize,
    ) -> Result<SliceDescriptor> {
        let volume = &self.built.volume;
        let samples =
            volume.reconstruct_slice(orientation, plane_index, self.config.interpolation)?;
        let (height, width) = samples.dim();

        let stats = SliceStatistics::from_samples(samples.iter().copied());
        debug!(
            "{orientation} slice stats: min={:.1}, max={:.1}, mean={:.1}, fill={:.1}%",
            stats.min,
            stats.max,
            stats.mean,
            stats.fill_ratio * 100.0
        );
        if stats.fill_ratio < self.config.min_fill_ratio {
            return Err(MprError::EmptySlice {
                orientation,
                fill_ratio: stats.fill_ratio,
            });
        }

        let flat = samples.into_raw_vec_and_offset().0;
        let renderable = to_renderable_with(&flat, width, height, self.config.window_width_fraction)
            .ok_or_else(|| MprError::EmptySlice {
                orientation,
                fill_ratio: stats.fill_ratio,
            })?;

        Ok(SliceDescriptor {
            orientation,
            position,
            plane_index,
            pixels: SlicePixels::Rescaled(renderable.pixels),
            width,
            height,
            pixel_spacing: volume.pixel_spacing(orientation),
            window: renderable.window,
            rescale_slope: renderable.rescale_slope,
            rescale_intercept: renderable.rescale_intercept,
            quality_score: renderable.fill_ratio,
            source: SliceSource::Reconstructed,
            processing_time: Default::default(),
        })
    }

    fn fallback(
        &self,
        orientation: Orientation,
        position: f32,
        plane_index: usize,
    ) -> SliceDescriptor {
        let volume = &self.built.volume;
        let (width, height) = volume.output_dimensions(orientation);
        SliceDescriptor::checkerboard(
            orientation,
            position,
            plane_index,
            width,
            height,
            volume.pixel_spacing(orientation),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SpatialMetadata;
    use crate::volume_builder::{SourceSlice, VolumeBuilder};
    use ndarray::Array2;

    fn built_from(planes: Vec<Array2<i32>>) -> BuiltVolume {
        let slices = planes
            .into_iter()
            .enumerate()
            .map(|(z, pixels)| {
                SourceSlice::new(pixels).with_metadata(
                    SpatialMetadata::default()
                        .with_position([0.0, 0.0, z as f64 * 2.0])
                        .with_pixel_spacing([0.5, 0.25]),
                )
            })
            .collect::<Vec<_>>();
        let requested = slices.len();
        VolumeBuilder::assemble(slices, requested, &MprConfig::default()).unwrap()
    }

    #[test]
    fn clamps_positions() {
        assert_eq!(clamp_position(-0.2), 0.0);
        assert_eq!(clamp_position(1.5), 1.0);
        assert_eq!(clamp_position(0.25), 0.25);
        assert_eq!(clamp_position(f32::NAN), 0.0);
    }

    #[test]
    fn axial_is_original_plane() {
        let planes: Vec<_> = (0..4)
            .map(|z| Array2::from_shape_fn((3, 5), |(y, x)| (z * 100 + y * 10 + x) as i32 - 50))
            .collect();
        let built = built_from(planes.clone());
        let config = MprConfig::default();
        let slice = SliceReformatter::new(&built, &config).extract(Orientation::Axial, 0.7);
        assert_eq!(slice.plane_index, 2);
        assert_eq!(slice.source, SliceSource::Original);
        assert_eq!(slice.pixels, SlicePixels::Stored(planes[2].clone()));
        assert_eq!((slice.width, slice.height), (5, 3));
    }

    #[test]
    fn sagittal_uses_depth_and_row_spacing() {
        let planes = vec![Array2::from_elem((3, 5), 9); 4];
        let built = built_from(planes);
        let config = MprConfig::default();
        let slice = SliceReformatter::new(&built, &config).extract(Orientation::Sagittal, 0.5);
        assert_eq!(slice.source, SliceSource::Reconstructed);
        assert_eq!((slice.width, slice.height), (4, 3));
        assert_eq!(slice.pixel_spacing.column, 2.0);
        assert_eq!(slice.pixel_spacing.row, 0.5);
        assert_eq!(slice.quality_score, 1.0);
    }

    #[test]
    fn empty_reconstruction_falls_back() {
        // a single bright voxel leaves the coronal plane y = 0 empty
        let mut planes = vec![Array2::<i32>::zeros((4, 4)); 3];
        planes[1][[3, 3]] = 500;
        let built = built_from(planes);
        let config = MprConfig::default();
        let slice = SliceReformatter::new(&built, &config).extract(Orientation::Coronal, 0.0);
        assert!(slice.is_fallback());
        assert_eq!((slice.width, slice.height), (4, 3));
        assert_eq!(slice.pixel_spacing.row, 2.0);
    }
}
