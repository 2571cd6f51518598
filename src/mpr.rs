use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use web_time::Instant;

use crate::config::MprConfig;
use crate::diagnostics::{
    MprDiagnostics, SliceSelfTest, TransformStatus, VolumeInfo, VolumeIntegrity,
};
use crate::enums::{Orientation, SliceSource};
use crate::error::{MprError, Result};
use crate::reformatter::SliceReformatter;
use crate::slice_image::{SliceDescriptor, SliceStatistics};
use crate::transform::GeometryValidation;
use crate::volume_builder::{BuiltVolume, LogProgress, ProgressSink, SliceLoader, VolumeBuilder};

enum BuilderState {
    Empty,
    Building,
    Ready(Arc<BuiltVolume>),
}

/// Resets a `Building` state to `Empty` unless the build commits, so a
/// failed or dropped build never leaves the engine stuck.
struct BuildGuard<'a> {
    state: &'a Mutex<BuilderState>,
    committed: bool,
}

impl BuildGuard<'_> {
    fn commit(mut self, built: Arc<BuiltVolume>) {
        *lock(self.state) = BuilderState::Ready(built);
        self.committed = true;
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *lock(self.state) = BuilderState::Empty;
        }
    }
}

fn lock(state: &Mutex<BuilderState>) -> MutexGuard<'_, BuilderState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds volumes from slice stacks and serves orthogonal slices from them.
///
/// One engine holds at most one volume. A second build while one is in
/// flight is rejected; extraction reads a shared snapshot of the built
/// volume and never blocks a build.
pub struct MprEngine<L: SliceLoader> {
    loader: L,
    config: MprConfig,
    state: Mutex<BuilderState>,
}

impl<L: SliceLoader> MprEngine<L> {
    pub fn new(loader: L) -> Self {
        Self::with_config(loader, MprConfig::default())
    }

    pub fn with_config(loader: L, config: MprConfig) -> Self {
        Self {
            loader,
            config,
            state: Mutex::new(BuilderState::Empty),
        }
    }

    pub fn config(&self) -> &MprConfig {
        &self.config
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn is_ready(&self) -> bool {
        matches!(*lock(&self.state), BuilderState::Ready(_))
    }

    pub fn is_building(&self) -> bool {
        matches!(*lock(&self.state), BuilderState::Building)
    }

    /// Builds a volume, reporting progress through the `log` facade.
    ///
    /// # Errors
    ///
    /// See [`MprEngine::build_volume_with_progress`].
    pub async fn build_volume(&self, ids: &[L::Id]) -> Result<VolumeInfo> {
        self.build_volume_with_progress(ids, &LogProgress).await
    }

    /// Replaces the current volume with one built from `ids`.
    ///
    /// # Errors
    ///
    /// - [`MprError::BuildInProgress`] if another build is running; the
    ///   running build is unaffected.
    /// - [`MprError::InsufficientData`] if too few slices load.
    ///
    /// Any failure leaves the engine without a volume.
    pub async fn build_volume_with_progress(
        &self,
        ids: &[L::Id],
        progress: &dyn ProgressSink,
    ) -> Result<VolumeInfo> {
        let guard = {
            let mut state = lock(&self.state);
            if matches!(*state, BuilderState::Building) {
                warn!("Volume build already in progress, request ignored");
                return Err(MprError::BuildInProgress);
            }
            *state = BuilderState::Building;
            BuildGuard {
                state: &self.state,
                committed: false,
            }
        };

        progress.report(0.0, "Building 3D volume: 0%");
        let built = match VolumeBuilder::build(&self.loader, ids, &self.config, progress).await {
            Ok(built) => built,
            Err(e) => {
                warn!("MPR volume build failed: {e}");
                return Err(e);
            }
        };
        let info = self.describe(&built);
        guard.commit(Arc::new(built));
        info!("MPR volume ready");
        Ok(info)
    }

    /// Extracts a slice at `position` in [0, 1] along `orientation`.
    ///
    /// # Errors
    ///
    /// Returns [`MprError::NotReady`] if no volume is built. Reconstruction
    /// problems are not errors: they yield a placeholder tagged
    /// [`SliceSource::Fallback`].
    pub fn extract_slice(
        &self,
        orientation: Orientation,
        position: f32,
    ) -> Result<SliceDescriptor> {
        let built = self.ready_volume()?;
        Ok(SliceReformatter::new(&built, &self.config).extract(orientation, position))
    }

    pub fn volume_info(&self) -> Option<VolumeInfo> {
        self.ready_volume().ok().map(|built| self.describe(&built))
    }

    /// Number of planes along the acquisition axis, 0 without a volume.
    pub fn slice_count(&self) -> usize {
        self.ready_volume()
            .map(|built| built.volume.dimensions().depth)
            .unwrap_or(0)
    }

    pub fn validate_geometry(&self) -> Option<GeometryValidation> {
        self.ready_volume().ok().map(|built| built.validation)
    }

    /// Collects readiness, geometry checks and a self-test extraction at the
    /// centre of each orientation.
    pub fn diagnostics(&self) -> MprDiagnostics {
        let Ok(built) = self.ready_volume() else {
            return MprDiagnostics::default();
        };

        let transform = &built.transform;
        let slice_tests = Orientation::ALL
            .into_iter()
            .map(|orientation| {
                let started = Instant::now();
                let slice = SliceReformatter::new(&built, &self.config).extract(orientation, 0.5);
                let success = slice.source != SliceSource::Fallback;
                SliceSelfTest {
                    orientation,
                    success,
                    elapsed: started.elapsed(),
                    quality_score: success.then_some(slice.quality_score),
                    error: (!success).then(|| "reconstruction fell back to placeholder".to_owned()),
                }
            })
            .collect();

        MprDiagnostics {
            ready: true,
            info: Some(self.describe(&built)),
            transform: Some(TransformStatus::from_transform(transform)),
            geometry_validation: Some(built.validation),
            volume_statistics: Some(SliceStatistics::from_samples(
                built.volume.data().iter().copied(),
            )),
            integrity: Some(Self::integrity(&built)),
            slice_tests,
        }
    }

    /// Drops the volume and its transforms. Ignored while a build runs.
    pub fn dispose(&self) {
        let mut state = lock(&self.state);
        if matches!(*state, BuilderState::Building) {
            warn!("Dispose requested during a volume build, ignored");
            return;
        }
        *state = BuilderState::Empty;
        info!("MPR volume disposed");
    }

    fn ready_volume(&self) -> Result<Arc<BuiltVolume>> {
        match &*lock(&self.state) {
            BuilderState::Ready(built) => Ok(Arc::clone(built)),
            _ => Err(MprError::NotReady),
        }
    }

    fn describe(&self, built: &BuiltVolume) -> VolumeInfo {
        let geometry = built.volume.geometry();
        VolumeInfo {
            dimensions: geometry.dimensions,
            spacing: geometry.spacing,
            origin: geometry.origin,
            slice_count: built.planes.len(),
            requested: built.requested,
            ordering: built.ordering,
            global_range: built.global_range,
            interpolation: self.config.interpolation,
        }
    }

    fn integrity(built: &BuiltVolume) -> VolumeIntegrity {
        let volume = &built.volume;
        let d = volume.dimensions();
        let non_zero = |orientation: Orientation, index: usize| {
            volume
                .get_slice_from_axis(index, orientation)
                .map(|plane| plane.iter().filter(|&&v| v != 0.0).count())
                .unwrap_or(0)
        };
        VolumeIntegrity {
            axial: non_zero(Orientation::Axial, d.depth / 2),
            sagittal: non_zero(Orientation::Sagittal, d.width / 2),
            coronal: non_zero(Orientation::Coronal, d.height / 2),
        }
    }
}
