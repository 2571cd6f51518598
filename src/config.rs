use crate::enums::Interpolation;

pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_MIN_SLICES: usize = 3;
pub const DEFAULT_MIN_FILL_RATIO: f32 = 0.05;
pub const DEFAULT_SINGULAR_THRESHOLD: f64 = 1e-10;
pub const DEFAULT_ROUND_TRIP_TOLERANCE: f64 = 0.1;
pub const DEFAULT_WINDOW_WIDTH_FRACTION: f64 = 0.8;

/// Tuning knobs for building volumes and extracting slices.
#[derive(Debug, Clone, PartialEq)]
pub struct MprConfig {
    /// Slices loaded concurrently before the next batch starts
    pub batch_size: usize,
    /// Fewest successfully loaded slices a build accepts
    pub min_slices: usize,
    /// Reconstructed slices below this non-background fraction are rejected
    pub min_fill_ratio: f32,
    /// Determinant magnitude under which the affine is treated as singular
    pub singular_threshold: f64,
    /// Largest per-axis corner round-trip error accepted by geometry validation
    pub round_trip_tolerance: f64,
    /// Share of the observed intensity range used as default window width
    pub window_width_fraction: f64,
    pub interpolation: Interpolation,
}

impl Default for MprConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            min_slices: DEFAULT_MIN_SLICES,
            min_fill_ratio: DEFAULT_MIN_FILL_RATIO,
            singular_threshold: DEFAULT_SINGULAR_THRESHOLD,
            round_trip_tolerance: DEFAULT_ROUND_TRIP_TOLERANCE,
            window_width_fraction: DEFAULT_WINDOW_WIDTH_FRACTION,
            interpolation: Interpolation::default(),
        }
    }
}

impl MprConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_min_slices(mut self, min_slices: usize) -> Self {
        self.min_slices = min_slices.max(1);
        self
    }

    pub fn with_min_fill_ratio(mut self, ratio: f32) -> Self {
        self.min_fill_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_singular_threshold(mut self, threshold: f64) -> Self {
        self.singular_threshold = threshold.abs();
        self
    }

    pub fn with_round_trip_tolerance(mut self, tolerance: f64) -> Self {
        self.round_trip_tolerance = tolerance.abs();
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }
}
