use crate::error::{MprError, Result};
use crate::metadata::{SpatialMetadata, multi_f64};
use crate::slice_image::Window;
use crate::volume_builder::{SliceLoader, SourceSlice};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::s;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Reads slices from DICOM files on disk. Files are decoded on tokio's
/// blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomFileLoader;

impl DicomFileLoader {
    /// Collects the ".dcm" files of a directory, sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn collect_from_directory(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Opens and decodes one file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its pixel data
    /// cannot be decoded.
    pub fn read_slice(path: &Path) -> Result<SourceSlice> {
        let dicom_object = open_file(path)?;
        Self::slice_from_object(&dicom_object)
    }

    /// Decodes the first frame's stored values (no modality or VOI LUT) and
    /// resolves rescale, window and spatial attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the pixel data cannot be decoded.
    pub fn slice_from_object(
        dicom_object: &FileDicomObject<InMemDicomObject>,
    ) -> Result<SourceSlice> {
        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|e| MprError::PixelData(e.to_string()))?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        let pixels = pixel_data
            .to_ndarray_with_options::<i32>(&options)
            .map_err(|e| MprError::PixelData(e.to_string()))?
            .slice_move(s![0, .., .., 0]);

        let slope = Self::float_or(dicom_object, tags::RESCALE_SLOPE, 1.0);
        let intercept = Self::float_or(dicom_object, tags::RESCALE_INTERCEPT, 0.0);

        let mut slice = SourceSlice::new(pixels)
            .with_rescale(slope, intercept)
            .with_metadata(SpatialMetadata::from_dicom(dicom_object));
        if let Some(window) = Self::embedded_window(dicom_object) {
            slice = slice.with_window(window);
        }
        Ok(slice)
    }

    fn float_or(dicom_object: &InMemDicomObject, tag: dicom::core::Tag, default: f64) -> f64 {
        dicom_object
            .element(tag)
            .ok()
            .and_then(|element| element.to_float64().ok())
            .unwrap_or(default)
    }

    fn embedded_window(dicom_object: &InMemDicomObject) -> Option<Window> {
        let center = *multi_f64(dicom_object, tags::WINDOW_CENTER)?.first()?;
        let width = *multi_f64(dicom_object, tags::WINDOW_WIDTH)?.first()?;
        Some(Window { center, width })
    }
}

impl SliceLoader for DicomFileLoader {
    type Id = PathBuf;

    async fn load(&self, id: &PathBuf) -> Result<SourceSlice> {
        let path = id.clone();
        tokio::task::spawn_blocking(move || Self::read_slice(&path))
            .await
            .map_err(|e| MprError::SliceLoad(format!("{}: {e}", id.display())))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    #[test]
    fn collects_only_dcm_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.dcm", "a.DCM", "notes.txt", "c"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let paths = DicomFileLoader::collect_from_directory(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.DCM", "b.dcm"]);
    }

    #[test]
    fn reads_window_and_rescale() {
        let object = InMemDicomObject::from_element_iter([
            DataElement::new(tags::WINDOW_CENTER, VR::DS, PrimitiveValue::from("40")),
            DataElement::new(tags::WINDOW_WIDTH, VR::DS, PrimitiveValue::from("400")),
            DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from("-1024")),
        ]);
        assert_eq!(
            DicomFileLoader::embedded_window(&object),
            Some(Window {
                center: 40.0,
                width: 400.0
            })
        );
        assert_eq!(DicomFileLoader::float_or(&object, tags::RESCALE_INTERCEPT, 0.0), -1024.0);
        assert_eq!(DicomFileLoader::float_or(&object, tags::RESCALE_SLOPE, 1.0), 1.0);
    }

    #[tokio::test]
    async fn missing_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let result = DicomFileLoader.load(&dir.path().join("missing.dcm")).await;
        assert!(result.is_err());
    }
}
