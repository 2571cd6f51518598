//! Renderable slice descriptors and the conversion of sampled data into them.

use std::time::Duration;

use image::{ImageBuffer, Luma};
use ndarray::Array2;

use crate::config::DEFAULT_WINDOW_WIDTH_FRACTION;
use crate::enums::{Orientation, SliceSource};

/// Display window: `center` is the midpoint, `width` the span of the
/// displayed intensity range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub center: f64,
    pub width: f64,
}

impl Window {
    /// Maps a value to [0, 1] through this window.
    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        let width = self.width.max(1.0);
        let lower = self.center - width / 2.0;
        ((value - lower) / width).clamp(0.0, 1.0)
    }
}

/// Physical size of one output pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSpacing {
    /// Distance between neighbouring columns
    pub column: f64,
    /// Distance between neighbouring rows
    pub row: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceStatistics {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub non_zero_count: usize,
    pub fill_ratio: f32,
}

impl SliceStatistics {
    /// Statistics over every sample; the fill ratio counts non-zero ones.
    pub fn from_samples<I: IntoIterator<Item = f32>>(samples: I) -> Self {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        let mut non_zero_count = 0usize;

        for value in samples {
            min = min.min(value);
            max = max.max(value);
            sum += f64::from(value);
            count += 1;
            if value != 0.0 {
                non_zero_count += 1;
            }
        }

        if count == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                non_zero_count: 0,
                fill_ratio: 0.0,
            };
        }

        Self {
            min,
            max,
            mean: (sum / count as f64) as f32,
            non_zero_count,
            fill_ratio: non_zero_count as f32 / count as f32,
        }
    }
}

/// Sampled data rescaled into 0..=65535.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderableSlice {
    pub pixels: Array2<u16>,
    pub window: Window,
    /// `value ≈ pixel * rescale_slope + rescale_intercept`
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    /// Statistics over non-background samples
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub fill_ratio: f32,
}

/// [`to_renderable_with`] using the default window width fraction.
pub fn to_renderable(samples: &[f32], width: usize, height: usize) -> Option<RenderableSlice> {
    to_renderable_with(samples, width, height, DEFAULT_WINDOW_WIDTH_FRACTION)
}

/// Rescales float samples into 16-bit unsigned pixels.
///
/// Exact zeros are background: they are left out of the statistics and stay
/// 0 in the output. Returns `None` if the buffer does not hold
/// `width * height` samples or every sample is background.
pub fn to_renderable_with(
    samples: &[f32],
    width: usize,
    height: usize,
    window_width_fraction: f64,
) -> Option<RenderableSlice> {
    if samples.len() != width * height {
        return None;
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    let mut sum = 0.0f64;
    let mut non_zero = 0usize;
    for &value in samples.iter().filter(|&&v| v != 0.0) {
        min = min.min(value);
        max = max.max(value);
        sum += f64::from(value);
        non_zero += 1;
    }
    if non_zero == 0 {
        return None;
    }

    let mean = sum / non_zero as f64;
    let range = f64::from(max) - f64::from(min);
    let scale = if range > 0.0 { 65535.0 / range } else { 1.0 };

    let pixels: Vec<u16> = samples
        .iter()
        .map(|&value| {
            if value == 0.0 {
                0
            } else {
                ((f64::from(value) - f64::from(min)) * scale)
                    .round()
                    .clamp(0.0, 65535.0) as u16
            }
        })
        .collect();
    let pixels = Array2::from_shape_vec((height, width), pixels).ok()?;

    Some(RenderableSlice {
        pixels,
        window: Window {
            center: mean,
            width: (range * window_width_fraction).max(1.0),
        },
        rescale_slope: range / 65535.0,
        rescale_intercept: f64::from(min),
        min,
        max,
        mean: mean as f32,
        fill_ratio: non_zero as f32 / samples.len() as f32,
    })
}

/// Pixel buffer of a slice descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum SlicePixels {
    /// Stored values of an acquired slice
    Stored(Array2<i32>),
    /// Rescaled 16-bit values
    Rescaled(Array2<u16>),
}

impl SlicePixels {
    /// (height, width)
    pub fn dim(&self) -> (usize, usize) {
        match self {
            SlicePixels::Stored(pixels) => pixels.dim(),
            SlicePixels::Rescaled(pixels) => pixels.dim(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i32> {
        match self {
            SlicePixels::Stored(pixels) => pixels.get([row, col]).copied(),
            SlicePixels::Rescaled(pixels) => pixels.get([row, col]).map(|&p| i32::from(p)),
        }
    }

    /// Row-major values.
    pub fn values(&self) -> Vec<i32> {
        match self {
            SlicePixels::Stored(pixels) => pixels.iter().copied().collect(),
            SlicePixels::Rescaled(pixels) => pixels.iter().map(|&p| i32::from(p)).collect(),
        }
    }
}

/// One extracted slice, ready for an external renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceDescriptor {
    pub orientation: Orientation,
    /// Requested position after clamping into [0, 1]
    pub position: f32,
    pub plane_index: usize,
    pub pixels: SlicePixels,
    pub width: usize,
    pub height: usize,
    pub pixel_spacing: PixelSpacing,
    pub window: Window,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    /// Fraction of non-background pixels
    pub quality_score: f32,
    pub source: SliceSource,
    pub processing_time: Duration,
}

impl SliceDescriptor {
    pub fn is_fallback(&self) -> bool {
        self.source == SliceSource::Fallback
    }

    /// Checkerboard placeholder shown when reconstruction fails.
    pub fn checkerboard(
        orientation: Orientation,
        position: f32,
        plane_index: usize,
        width: usize,
        height: usize,
        pixel_spacing: PixelSpacing,
    ) -> Self {
        let pixels =
            Array2::from_shape_fn((height, width), |(y, x)| (((x + y) % 2) * 30000 + 5000) as u16);
        Self {
            orientation,
            position,
            plane_index,
            pixels: SlicePixels::Rescaled(pixels),
            width,
            height,
            pixel_spacing,
            window: Window {
                center: 20000.0,
                width: 30000.0,
            },
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            quality_score: 0.0,
            source: SliceSource::Fallback,
            processing_time: Duration::ZERO,
        }
    }

    /// Modality value of the pixel at (`row`, `col`).
    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        self.pixels
            .get(row, col)
            .map(|p| f64::from(p) * self.rescale_slope + self.rescale_intercept)
    }

    /// Applies the window and returns a 16-bit grayscale image.
    pub fn to_image(&self) -> Option<ImageBuffer<Luma<u16>, Vec<u16>>> {
        let pixel_data: Vec<u16> = self
            .pixels
            .values()
            .into_iter()
            .map(|p| {
                let value = f64::from(p) * self.rescale_slope + self.rescale_intercept;
                (self.window.apply(value) * 65535.0).round() as u16
            })
            .collect();
        ImageBuffer::from_raw(self.width as u32, self.height as u32, pixel_data)
    }
}
