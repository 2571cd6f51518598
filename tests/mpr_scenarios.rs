use std::cell::{Cell, RefCell};

use dicom_mpr::{
    Dimensions, MprConfig, MprEngine, MprError, Orientation, Result, SliceLoader, SliceOrdering,
    SlicePixels, SliceSource, SourceSlice, SpatialMetadata,
};
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use ndarray::Array2;

const AXIAL: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

/// Serves slices from memory; `None` entries fail to load.
struct MemoryLoader {
    slices: Vec<Option<SourceSlice>>,
}

impl SliceLoader for MemoryLoader {
    type Id = usize;

    async fn load(&self, id: &usize) -> Result<SourceSlice> {
        self.slices
            .get(*id)
            .cloned()
            .flatten()
            .ok_or_else(|| MprError::SliceLoad(format!("slice {id} unavailable")))
    }
}

/// Holds every load until the gate opens.
struct GatedLoader {
    gate: Shared<oneshot::Receiver<()>>,
    inner: MemoryLoader,
}

impl SliceLoader for GatedLoader {
    type Id = usize;

    async fn load(&self, id: &usize) -> Result<SourceSlice> {
        let _ = self.gate.clone().await;
        self.inner.load(id).await
    }
}

/// Tracks how many loads run at once and whether a load started before the
/// previous batch had finished.
struct CountingLoader {
    inner: MemoryLoader,
    batch_size: usize,
    in_flight: Cell<usize>,
    peak: Cell<usize>,
    completed: Cell<usize>,
    early_starts: RefCell<Vec<usize>>,
}

impl SliceLoader for CountingLoader {
    type Id = usize;

    async fn load(&self, id: &usize) -> Result<SourceSlice> {
        if self.completed.get() < id / self.batch_size * self.batch_size {
            self.early_starts.borrow_mut().push(*id);
        }
        self.in_flight.set(self.in_flight.get() + 1);
        self.peak.set(self.peak.get().max(self.in_flight.get()));
        tokio::task::yield_now().await;
        self.in_flight.set(self.in_flight.get() - 1);
        self.completed.set(self.completed.get() + 1);
        self.inner.load(id).await
    }
}

fn slice_at(z: f64, orientation: [f64; 6], pixels: Array2<i32>) -> SourceSlice {
    SourceSlice::new(pixels).with_metadata(
        SpatialMetadata::default()
            .with_position([0.0, 0.0, z])
            .with_orientation(orientation)
            .with_pixel_spacing([1.0, 1.0]),
    )
}

/// `count` 4x4 slices, 2 mm apart, filled with `value`.
fn uniform_series(count: usize, value: i32) -> Vec<Option<SourceSlice>> {
    (0..count)
        .map(|z| Some(slice_at(z as f64 * 2.0, AXIAL, Array2::from_elem((4, 4), value))))
        .collect()
}

/// 6x5 slices whose voxels encode their own (x, y, z) index.
fn coded_series(count: usize) -> Vec<Option<SourceSlice>> {
    (0..count)
        .map(|z| {
            let pixels =
                Array2::from_shape_fn((5, 6), |(y, x)| (1 + x + 10 * y + 100 * z) as i32);
            Some(slice_at(z as f64 * 2.0, AXIAL, pixels))
        })
        .collect()
}

fn ids(count: usize) -> Vec<usize> {
    (0..count).collect()
}

#[tokio::test]
async fn builds_uniform_series() {
    let engine = MprEngine::new(MemoryLoader {
        slices: uniform_series(10, 100),
    });
    let info = engine.build_volume(&ids(10)).await.unwrap();

    assert_eq!(
        info.dimensions,
        Dimensions {
            width: 4,
            height: 4,
            depth: 10
        }
    );
    assert_eq!(info.spacing.z, 2.0);
    assert_eq!(info.slice_count, 10);
    assert_eq!(info.ordering, SliceOrdering::ImagePositionPatient);
    assert_eq!(engine.slice_count(), 10);

    let slice = engine.extract_slice(Orientation::Axial, 0.5).unwrap();
    assert_eq!(slice.source, SliceSource::Original);
    assert_eq!(slice.plane_index, 4);
    assert_eq!(slice.pixels, SlicePixels::Stored(Array2::from_elem((4, 4), 100)));

    let diagnostics = engine.diagnostics();
    let stats = diagnostics.volume_statistics.unwrap();
    assert_eq!((stats.min, stats.max), (100.0, 100.0));
    assert!(diagnostics.integrity.unwrap().is_intact());
    assert!(diagnostics.slice_tests.iter().all(|test| test.success));
}

#[tokio::test]
async fn too_few_loaded_slices_fail_the_build() {
    let mut slices = vec![None; 10];
    slices[3] = Some(slice_at(0.0, AXIAL, Array2::from_elem((4, 4), 1)));
    slices[7] = Some(slice_at(2.0, AXIAL, Array2::from_elem((4, 4), 1)));
    let engine = MprEngine::new(MemoryLoader { slices });

    let err = engine.build_volume(&ids(10)).await.unwrap_err();
    assert!(matches!(
        err,
        MprError::InsufficientData {
            loaded: 2,
            requested: 10
        }
    ));
    assert!(!engine.is_ready());
    assert!(!engine.is_building());
}

#[tokio::test]
async fn failed_slices_are_skipped() {
    let mut slices = uniform_series(6, 7);
    slices[1] = None;
    slices[4] = None;
    let engine = MprEngine::new(MemoryLoader { slices });

    let info = engine.build_volume(&ids(6)).await.unwrap();
    assert_eq!(info.slice_count, 4);
    assert_eq!(info.requested, 6);
    // z = 0, 4, 6, 10 spans 10 mm over 3 gaps
    assert!((info.spacing.z - 10.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn shuffled_series_is_reordered() {
    let mut slices = coded_series(5);
    slices.reverse();
    slices.swap(1, 3);
    let engine = MprEngine::new(MemoryLoader { slices });
    engine.build_volume(&ids(5)).await.unwrap();

    for index in 0..5 {
        let slice = engine
            .extract_slice(Orientation::Axial, index as f32 / 4.0)
            .unwrap();
        assert_eq!(slice.pixels.get(0, 0), Some(1 + 100 * index as i32));
    }
}

#[tokio::test]
async fn degenerate_orientation_builds_with_identity_fallback() {
    let slices = (0..4)
        .map(|z| {
            Some(slice_at(
                z as f64,
                [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                Array2::from_elem((4, 4), 50),
            ))
        })
        .collect();
    let engine = MprEngine::new(MemoryLoader { slices });
    engine.build_volume(&ids(4)).await.unwrap();

    let transform = engine.diagnostics().transform.unwrap();
    assert!(transform.singular);
    assert!(transform.identity_fallback);

    let slice = engine.extract_slice(Orientation::Sagittal, 0.5).unwrap();
    assert_eq!(slice.source, SliceSource::Reconstructed);
}

#[tokio::test]
async fn reconstructed_slices_are_repeatable() {
    let engine = MprEngine::new(MemoryLoader {
        slices: coded_series(7),
    });
    engine.build_volume(&ids(7)).await.unwrap();

    for orientation in [Orientation::Sagittal, Orientation::Coronal] {
        let first = engine.extract_slice(orientation, 0.4).unwrap();
        let second = engine.extract_slice(orientation, 0.4).unwrap();
        assert_eq!(first.source, SliceSource::Reconstructed);
        assert_eq!(first.pixels, second.pixels);
        assert_eq!(first.window, second.window);
        assert_eq!(first.plane_index, second.plane_index);
    }
}

#[tokio::test]
async fn reconstructed_slice_recovers_voxel_values() {
    let engine = MprEngine::new(MemoryLoader {
        slices: coded_series(7),
    });
    engine.build_volume(&ids(7)).await.unwrap();

    // sagittal x = 3: columns run from the last plane to the first
    let slice = engine.extract_slice(Orientation::Sagittal, 0.6).unwrap();
    assert_eq!((slice.width, slice.height), (7, 5));
    assert_eq!(slice.plane_index, 3);
    for (row, col) in [(0, 0), (2, 3), (4, 6)] {
        let z = 6 - col;
        let expected = (1 + 3 + 10 * row + 100 * z) as f64;
        let value = slice.value_at(row, col).unwrap();
        assert!((value - expected).abs() < 0.01, "{value} != {expected}");
    }
}

#[tokio::test]
async fn extraction_requires_a_volume() {
    let engine = MprEngine::new(MemoryLoader {
        slices: uniform_series(4, 1),
    });
    assert!(matches!(
        engine.extract_slice(Orientation::Axial, 0.5),
        Err(MprError::NotReady)
    ));
    assert!(engine.volume_info().is_none());
    assert_eq!(engine.slice_count(), 0);
    assert!(!engine.diagnostics().ready);

    engine.build_volume(&ids(4)).await.unwrap();
    assert!(engine.is_ready());

    engine.dispose();
    assert!(!engine.is_ready());
    assert!(engine.validate_geometry().is_none());
    assert!(matches!(
        engine.extract_slice(Orientation::Coronal, 0.5),
        Err(MprError::NotReady)
    ));
}

#[tokio::test]
async fn concurrent_build_is_rejected() {
    let (open, gate) = oneshot::channel();
    let engine = MprEngine::new(GatedLoader {
        gate: gate.shared(),
        inner: MemoryLoader {
            slices: uniform_series(5, 3),
        },
    });
    let ids = ids(5);

    let first = engine.build_volume(&ids);
    let second = async {
        assert!(engine.is_building());
        let result = engine.build_volume(&ids).await;
        let _ = open.send(());
        result
    };
    let (first, second) = futures::join!(first, second);

    assert!(matches!(second, Err(MprError::BuildInProgress)));
    assert_eq!(first.unwrap().slice_count, 5);
    assert!(engine.is_ready());
}

#[tokio::test]
async fn dropped_build_resets_state() {
    let (_open, gate) = oneshot::channel::<()>();
    let engine = MprEngine::new(GatedLoader {
        gate: gate.shared(),
        inner: MemoryLoader {
            slices: uniform_series(5, 3),
        },
    });
    let ids = ids(5);

    {
        let mut build = Box::pin(engine.build_volume(&ids));
        assert!(futures::poll!(build.as_mut()).is_pending());
        assert!(engine.is_building());

        engine.dispose();
        assert!(engine.is_building());
    }

    assert!(!engine.is_building());
    assert!(!engine.is_ready());
}

#[tokio::test]
async fn reports_progress_per_batch() {
    let engine = MprEngine::with_config(
        MemoryLoader {
            slices: uniform_series(10, 5),
        },
        MprConfig::default().with_batch_size(4),
    );
    let reports = RefCell::new(Vec::new());
    let progress = |fraction: f32, status: &str| {
        reports.borrow_mut().push((fraction, status.to_owned()));
    };

    engine
        .build_volume_with_progress(&ids(10), &progress)
        .await
        .unwrap();

    let reports = reports.into_inner();
    let fractions: Vec<f32> = reports.iter().map(|(f, _)| *f).collect();
    assert_eq!(fractions, vec![0.0, 0.4, 0.8, 1.0]);
    assert_eq!(reports[1].1, "Building 3D volume: 40%");
    assert_eq!(reports[3].1, "Building 3D volume: 100%");
}

#[tokio::test]
async fn exports_slices_as_png() {
    let engine = MprEngine::new(MemoryLoader {
        slices: coded_series(4),
    });
    engine.build_volume(&ids(4)).await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    for orientation in Orientation::ALL {
        let slice = engine.extract_slice(orientation, 0.5).unwrap();
        let path = dir.path().join(format!("{orientation}.png"));
        slice.to_image().unwrap().save(&path).unwrap();

        let saved = image::open(&path).unwrap();
        assert_eq!(
            (saved.width() as usize, saved.height() as usize),
            (slice.width, slice.height)
        );
    }
}

#[tokio::test]
async fn loads_run_one_batch_at_a_time() {
    let engine = MprEngine::with_config(
        CountingLoader {
            inner: MemoryLoader {
                slices: uniform_series(10, 5),
            },
            batch_size: 4,
            in_flight: Cell::new(0),
            peak: Cell::new(0),
            completed: Cell::new(0),
            early_starts: RefCell::new(Vec::new()),
        },
        MprConfig::default().with_batch_size(4),
    );
    engine.build_volume(&ids(10)).await.unwrap();

    let loader = engine.loader();
    assert_eq!(loader.peak.get(), 4);
    assert_eq!(loader.completed.get(), 10);
    assert!(loader.early_starts.borrow().is_empty());
}

#[tokio::test]
async fn default_axial_window_is_in_rescaled_units() {
    let slices = (0..3)
        .map(|z| {
            let pixels = Array2::from_shape_vec((1, 5), vec![0, 500, 1000, 1500, 2000]).unwrap();
            Some(slice_at(z as f64, AXIAL, pixels).with_rescale(1.0, -1024.0))
        })
        .collect();
    let engine = MprEngine::new(MemoryLoader { slices });
    engine.build_volume(&ids(3)).await.unwrap();

    let slice = engine.extract_slice(Orientation::Axial, 0.5).unwrap();
    assert_eq!(slice.value_at(0, 2), Some(-24.0));
    assert_eq!(slice.window.center, -24.0);
    assert_eq!(slice.window.width, 1600.0);

    let image = slice.to_image().unwrap();
    let gray: Vec<u16> = (0..5).map(|x| image.get_pixel(x, 0).0[0]).collect();
    // stored 1000 of 0..2000 sits at the window centre
    assert_eq!(gray[2], 32768);
    assert_eq!(gray[0], 0);
    assert_eq!(gray[4], 65535);
    assert!(gray.windows(2).all(|pair| pair[0] < pair[1]));
}
