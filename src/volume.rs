use crate::enums::{Axis, Interpolation, Orientation};
use crate::error::{MprError, Result};
use crate::interpolator::Interpolator;
use crate::reformatter::clamp_position;
use crate::slice_image::PixelSpacing;

use ndarray::Array2;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Dimensions {
    pub fn extent(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.width,
            Axis::Y => self.height,
            Axis::Z => self.depth,
        }
    }

    pub fn voxel_count(&self) -> usize {
        self.width * self.height * self.depth
    }
}

/// Physical distance between voxel centres along each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacing {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Spacing {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            z: 1.0,
        }
    }
}

impl Spacing {
    pub fn along(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    pub dimensions: Dimensions,
    pub spacing: Spacing,
    /// Patient-space position of voxel (0, 0, 0)
    pub origin: [f64; 3],
}

/// Dense scalar volume stored as (depth, height, width), so voxel (x, y, z)
/// sits at linear index `z * height * width + y * width + x`.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    geometry: VolumeGeometry,
}

impl Volume {
    /// # Errors
    ///
    /// Returns an error if the array shape disagrees with the geometry.
    pub fn new(data: Array3<f32>, geometry: VolumeGeometry) -> Result<Self> {
        let d = geometry.dimensions;
        if data.dim() != (d.depth, d.height, d.width) {
            return Err(MprError::InvalidPixelBuffer {
                expected: d.voxel_count(),
                found: data.len(),
            });
        }
        Ok(Self { data, geometry })
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn dimensions(&self) -> Dimensions {
        self.geometry.dimensions
    }

    pub fn spacing(&self) -> Spacing {
        self.geometry.spacing
    }

    pub fn linear_index(&self, x: usize, y: usize, z: usize) -> usize {
        let d = self.geometry.dimensions;
        z * (d.height * d.width) + y * d.width + x
    }

    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        self.data.get([z, y, x]).copied()
    }

    /// Trilinear sample at fractional volume-index coordinates.
    pub fn sample(&self, x: f32, y: f32, z: f32) -> f32 {
        self.sample_with(Interpolation::Trilinear, x, y, z)
    }

    pub fn sample_with(&self, interpolation: Interpolation, x: f32, y: f32, z: f32) -> f32 {
        Interpolator::sample(&self.data.view(), interpolation, x, y, z)
    }

    /// Plane index for a normalized position; the position is clamped into
    /// [0, 1] first.
    pub fn plane_index(&self, orientation: Orientation, position: f32) -> usize {
        let extent = self.geometry.dimensions.extent(orientation.normal_axis());
        let position = clamp_position(position);
        (position * extent.saturating_sub(1) as f32).round_ties_even() as usize
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    /// Always returns (width, height) - standard image convention
    pub fn output_dimensions(&self, orientation: Orientation) -> (usize, usize) {
        let d = self.geometry.dimensions;
        match orientation {
            // Looking down Z-axis: X is width, Y is height
            Orientation::Axial => (d.width, d.height),
            // Looking down Y-axis: X is width, Z is height
            Orientation::Coronal => (d.width, d.depth),
            // Looking down X-axis: Z is width, Y is height
            Orientation::Sagittal => (d.depth, d.height),
        }
    }

    pub fn pixel_spacing(&self, orientation: Orientation) -> PixelSpacing {
        let (column_axis, row_axis) = orientation.spacing_axes();
        PixelSpacing {
            column: self.geometry.spacing.along(column_axis),
            row: self.geometry.spacing.along(row_axis),
        }
    }

    /// Resamples the plane `index` of `orientation` into a (height, width)
    /// array. The depth axis runs bottom-to-top on coronal slices and
    /// right-to-left on sagittal slices.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` lies outside the volume.
    pub fn reconstruct_slice(
        &self,
        orientation: Orientation,
        index: usize,
        interpolation: Interpolation,
    ) -> Result<Array2<f32>> {
        if !self.is_valid_index(index, orientation) {
            return Err(MprError::InvalidPixelBuffer {
                expected: self.geometry.dimensions.extent(orientation.normal_axis()),
                found: index,
            });
        }
        let (width, height) = self.output_dimensions(orientation);
        let last_z = self.geometry.dimensions.depth.saturating_sub(1);
        let plane = index as f32;

        let pixel_data: Vec<f32> = (0..height)
            .into_par_iter()
            .flat_map_iter(|row| {
                (0..width).map(move |col| {
                    let (x, y, z) = match orientation {
                        Orientation::Axial => (col as f32, row as f32, plane),
                        Orientation::Coronal => (col as f32, plane, (last_z - row) as f32),
                        Orientation::Sagittal => (plane, row as f32, (last_z - col) as f32),
                    };
                    self.sample_with(interpolation, x, y, z)
                })
            })
            .collect();

        let found = pixel_data.len();
        Array2::from_shape_vec((height, width), pixel_data).map_err(|_| {
            MprError::InvalidPixelBuffer {
                expected: width * height,
                found,
            }
        })
    }

    fn is_valid_index(&self, index: usize, orientation: Orientation) -> bool {
        index < self.geometry.dimensions.extent(orientation.normal_axis())
    }
}
