use crate::config::MprConfig;
use crate::enums::SliceOrdering;
use crate::error::{MprError, Result};
use crate::metadata::{SortKey, SpatialMetadata};
use crate::slice_image::Window;
use crate::transform::{GeometryValidation, PatientTransform};
use crate::volume::{Dimensions, Spacing, Volume, VolumeGeometry};

use futures::future::join_all;
use log::{debug, info, warn};
use ndarray::{Array2, Array3, Zip, s};

/// One decoded image as handed over by a [`SliceLoader`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSlice {
    /// Stored pixel values, (rows, columns)
    pub pixels: Array2<i32>,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    /// Window embedded in the source, if any
    pub window: Option<Window>,
    pub metadata: SpatialMetadata,
}

impl SourceSlice {
    pub fn new(pixels: Array2<i32>) -> Self {
        Self {
            pixels,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            window: None,
            metadata: SpatialMetadata::default(),
        }
    }

    /// Builds a slice from a row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `pixels.len() != width * height`.
    pub fn from_raw(width: usize, height: usize, pixels: Vec<i32>) -> Result<Self> {
        let found = pixels.len();
        Array2::from_shape_vec((height, width), pixels)
            .map(Self::new)
            .map_err(|_| MprError::InvalidPixelBuffer {
                expected: width * height,
                found,
            })
    }

    pub fn with_rescale(mut self, slope: f64, intercept: f64) -> Self {
        self.rescale_slope = slope;
        self.rescale_intercept = intercept;
        self
    }

    pub fn with_window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_metadata(mut self, metadata: SpatialMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }
}

/// Resolves slice identifiers to decoded images.
#[allow(async_fn_in_trait)]
pub trait SliceLoader {
    type Id;

    async fn load(&self, id: &Self::Id) -> Result<SourceSlice>;
}

/// Receives build progress after every batch.
pub trait ProgressSink {
    fn report(&self, fraction: f32, status: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(f32, &str),
{
    fn report(&self, fraction: f32, status: &str) {
        self(fraction, status)
    }
}

/// Forwards progress to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, _fraction: f32, status: &str) {
        info!("{status}");
    }
}

/// True minimum, maximum and mean of a slice's stored values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRange {
    pub min: i32,
    pub max: i32,
    pub mean: f64,
}

/// Original acquisition plane kept for the axial fast path.
#[derive(Debug, Clone, PartialEq)]
pub struct AxialPlane {
    pub pixels: Array2<i32>,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub window: Window,
    pub range: PixelRange,
    pub instance_number: Option<i32>,
}

/// Everything a successful build produces.
#[derive(Debug, Clone)]
pub struct BuiltVolume {
    pub volume: Volume,
    pub planes: Vec<AxialPlane>,
    pub transform: PatientTransform,
    pub validation: GeometryValidation,
    pub ordering: SliceOrdering,
    /// (min, max) of stored values over the whole series
    pub global_range: (i32, i32),
    pub requested: usize,
}

pub struct VolumeBuilder;

impl VolumeBuilder {
    /// Loads, orders and assembles a volume.
    ///
    /// # Errors
    ///
    /// Returns [`MprError::InsufficientData`] if fewer than
    /// `config.min_slices` slices load, or an error if slice shapes differ.
    pub async fn build<L: SliceLoader>(
        loader: &L,
        ids: &[L::Id],
        config: &MprConfig,
        progress: &dyn ProgressSink,
    ) -> Result<BuiltVolume> {
        info!("Building MPR volume from {} images", ids.len());
        let slices = Self::load_slices(loader, ids, config.batch_size, progress).await;
        Self::assemble(slices, ids.len(), config)
    }

    /// Loads `ids` batch by batch. Failed slices are logged and dropped; the
    /// surviving slices keep their request order.
    pub async fn load_slices<L: SliceLoader>(
        loader: &L,
        ids: &[L::Id],
        batch_size: usize,
        progress: &dyn ProgressSink,
    ) -> Vec<SourceSlice> {
        let total = ids.len();
        let mut loaded = Vec::with_capacity(total);
        let mut done = 0;

        for batch in ids.chunks(batch_size.max(1)) {
            let results = join_all(batch.iter().map(|id| loader.load(id))).await;
            for (offset, result) in results.into_iter().enumerate() {
                let number = done + offset + 1;
                match result {
                    Ok(slice) if slice.pixels.is_empty() => {
                        warn!("Image {number}/{total} has no pixel data, skipping");
                    }
                    Ok(slice) => loaded.push(slice),
                    Err(e) => warn!("Failed to load image {number}/{total}: {e}"),
                }
            }
            done += batch.len();
            let fraction = done as f32 / total as f32;
            progress.report(
                fraction,
                &format!("Building 3D volume: {}%", (fraction * 100.0).round()),
            );
        }

        info!("Loaded {}/{} images", loaded.len(), total);
        loaded
    }

    /// Turns loaded slices into a volume: pixel range fix, ordering,
    /// geometry, voxel population and transform setup.
    ///
    /// # Errors
    ///
    /// See [`VolumeBuilder::build`].
    pub fn assemble(
        slices: Vec<SourceSlice>,
        requested: usize,
        config: &MprConfig,
    ) -> Result<BuiltVolume> {
        if slices.len() < config.min_slices {
            return Err(MprError::InsufficientData {
                loaded: slices.len(),
                requested,
            });
        }

        let mut slices = slices;
        let ordering = Self::sort_slices(&mut slices);
        Self::validate_dimensions(&slices)?;

        let geometry = Self::derive_geometry(&slices);
        let volume = Volume::new(
            Self::build_volume_array(&slices, geometry.dimensions),
            geometry,
        )?;
        let orientation = slices[0].metadata.orientation_or_default();

        let mut global_range = (i32::MAX, i32::MIN);
        let planes: Vec<AxialPlane> = slices
            .into_iter()
            .map(|slice| {
                let (range, window) =
                    Self::normalize_pixel_range(&slice, config.window_width_fraction);
                global_range = (
                    global_range.0.min(range.min),
                    global_range.1.max(range.max),
                );
                debug!(
                    "Image pixel range: {} to {}, W/L: {}/{}",
                    range.min, range.max, window.width, window.center
                );
                AxialPlane {
                    pixels: slice.pixels,
                    rescale_slope: slice.rescale_slope,
                    rescale_intercept: slice.rescale_intercept,
                    window,
                    range,
                    instance_number: slice.metadata.instance_number,
                }
            })
            .collect();

        let transform = PatientTransform::build(
            geometry.origin,
            orientation,
            [geometry.spacing.x, geometry.spacing.y],
            config.singular_threshold,
        );
        let validation =
            transform.validate_round_trip(geometry.dimensions, config.round_trip_tolerance);
        if !validation.passed {
            warn!(
                "Geometry validation failed: round-trip error {:.3} exceeds {}",
                validation.max_error, config.round_trip_tolerance
            );
        }

        let d = geometry.dimensions;
        info!(
            "Volume built: {}x{}x{}, spacing {:?}, origin {:?}",
            d.width, d.height, d.depth, geometry.spacing, geometry.origin
        );

        Ok(BuiltVolume {
            volume,
            planes,
            transform,
            validation,
            ordering,
            global_range,
            requested,
        })
    }

    /// Measures a slice's stored values and settles its display window.
    ///
    /// The range stays in stored units while the window is in rescaled
    /// (modality) units, like an embedded DICOM window. An embedded window is
    /// kept unless its centre or width is zero; the default is centred on the
    /// value range with `width_fraction` of its span.
    pub fn normalize_pixel_range(
        slice: &SourceSlice,
        width_fraction: f64,
    ) -> (PixelRange, Window) {
        let (min, max, sum) = slice.pixels.iter().fold(
            (i32::MAX, i32::MIN, 0i64),
            |(min, max, sum), &p| (min.min(p), max.max(p), sum + i64::from(p)),
        );
        let count = slice.pixels.len().max(1);
        let range = PixelRange {
            min,
            max,
            mean: sum as f64 / count as f64,
        };

        let window = match slice.window {
            Some(window) if window.center != 0.0 && window.width != 0.0 => window,
            _ => {
                let span = f64::from(max) - f64::from(min);
                let center = (f64::from(max) + f64::from(min)) / 2.0;
                let width = (span * width_fraction).round().max(1.0);
                Window {
                    center: center * slice.rescale_slope + slice.rescale_intercept,
                    width: (width * slice.rescale_slope.abs()).max(1.0),
                }
            }
        };
        (range, window)
    }

    /// Stable sort, so slices with equal keys keep their request order.
    pub fn sort_slices(slices: &mut Vec<SourceSlice>) -> SliceOrdering {
        let (keys, ordering) = SortKey::resolve(slices.iter().map(|s| &s.metadata));
        let mut keyed: Vec<(SortKey, SourceSlice)> =
            keys.into_iter().zip(slices.drain(..)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        slices.extend(keyed.into_iter().map(|(_, slice)| slice));

        if ordering == SliceOrdering::InstanceNumber {
            warn!("Position metadata missing for part of the series, ordered by instance number");
        }
        ordering
    }

    /// Geometry of sorted slices. The through-plane spacing is measured
    /// between the first and last slice centres whenever both are known,
    /// since declared thickness can differ from the actual slice distance.
    pub fn derive_geometry(slices: &[SourceSlice]) -> VolumeGeometry {
        let Some(first) = slices.first() else {
            return VolumeGeometry::default();
        };
        let depth = slices.len();
        let [row_spacing, column_spacing] = first.metadata.pixel_spacing_or_default();

        let mut slice_spacing = first.metadata.slice_thickness_or_default();
        if depth > 1 {
            if let (Some(a), Some(b)) = (
                first.metadata.image_position,
                slices[depth - 1].metadata.image_position,
            ) {
                let distance = ((b[0] - a[0]).powi(2)
                    + (b[1] - a[1]).powi(2)
                    + (b[2] - a[2]).powi(2))
                .sqrt();
                slice_spacing = distance / (depth - 1) as f64;
            }
        }

        VolumeGeometry {
            dimensions: Dimensions {
                width: first.width(),
                height: first.height(),
                depth,
            },
            spacing: Spacing {
                x: column_spacing,
                y: row_spacing,
                z: slice_spacing,
            },
            origin: first.metadata.image_position.unwrap_or([0.0; 3]),
        }
    }

    fn validate_dimensions(slices: &[SourceSlice]) -> Result<()> {
        let expected = slices[0].pixels.dim();
        match slices.iter().find(|slice| slice.pixels.dim() != expected) {
            Some(slice) => Err(MprError::InconsistentDimensions {
                expected,
                found: slice.pixels.dim(),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(slices: &[SourceSlice], dimensions: Dimensions) -> Array3<f32> {
        let mut volume =
            Array3::<f32>::zeros((dimensions.depth, dimensions.height, dimensions.width));

        for (z, slice) in slices.iter().enumerate() {
            let (slope, intercept) = (slice.rescale_slope, slice.rescale_intercept);
            Zip::from(volume.slice_mut(s![z, .., ..]))
                .and(&slice.pixels)
                .for_each(|voxel, &raw| *voxel = (f64::from(raw) * slope + intercept) as f32);
        }

        volume
    }
}
