//! Per-image spatial attributes and the ordering key derived from them.

use std::cmp::Ordering;

use dicom::core::Tag;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;

use crate::enums::SliceOrdering;

/// Row direction along +X, column direction along +Y.
pub const DEFAULT_ORIENTATION: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
pub const DEFAULT_PIXEL_SPACING: [f64; 2] = [1.0, 1.0];
pub const DEFAULT_SLICE_THICKNESS: f64 = 1.0;

/// Spatial attributes of one image. Every attribute may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialMetadata {
    /// Image Position (Patient) of the first transmitted pixel
    pub image_position: Option<[f64; 3]>,
    /// Image Orientation (Patient): row cosines followed by column cosines
    pub image_orientation: Option<[f64; 6]>,
    /// Pixel Spacing as [row spacing, column spacing]
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub instance_number: Option<i32>,
}

impl SpatialMetadata {
    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.image_position = Some(position);
        self
    }

    pub fn with_orientation(mut self, orientation: [f64; 6]) -> Self {
        self.image_orientation = Some(orientation);
        self
    }

    pub fn with_pixel_spacing(mut self, spacing: [f64; 2]) -> Self {
        self.pixel_spacing = Some(spacing);
        self
    }

    pub fn with_slice_thickness(mut self, thickness: f64) -> Self {
        self.slice_thickness = Some(thickness);
        self
    }

    pub fn with_instance_number(mut self, instance_number: i32) -> Self {
        self.instance_number = Some(instance_number);
        self
    }

    pub fn orientation_or_default(&self) -> [f64; 6] {
        self.image_orientation.unwrap_or(DEFAULT_ORIENTATION)
    }

    pub fn pixel_spacing_or_default(&self) -> [f64; 2] {
        self.pixel_spacing.unwrap_or(DEFAULT_PIXEL_SPACING)
    }

    pub fn slice_thickness_or_default(&self) -> f64 {
        self.slice_thickness.unwrap_or(DEFAULT_SLICE_THICKNESS)
    }

    /// Reads the image plane attributes from a DICOM data set.
    ///
    /// Malformed attributes (wrong multiplicity, unparsable numbers) are
    /// treated the same as absent ones.
    pub fn from_dicom(object: &InMemDicomObject) -> Self {
        Self {
            image_position: multi_f64(object, tags::IMAGE_POSITION_PATIENT)
                .and_then(|values| <[f64; 3]>::try_from(values).ok()),
            image_orientation: multi_f64(object, tags::IMAGE_ORIENTATION_PATIENT)
                .and_then(|values| <[f64; 6]>::try_from(values).ok()),
            pixel_spacing: multi_f64(object, tags::PIXEL_SPACING)
                .and_then(|values| <[f64; 2]>::try_from(values).ok()),
            slice_thickness: object
                .element(tags::SLICE_THICKNESS)
                .ok()
                .and_then(|element| element.to_float64().ok()),
            instance_number: object
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|element| element.to_int::<i32>().ok()),
        }
    }
}

pub(crate) fn multi_f64(object: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    object.element(tag).ok()?.to_multi_float64().ok()
}

/// Ordering key of a slice within its series.
#[derive(Debug, Clone, Copy)]
pub enum SortKey {
    /// z component of the image position
    Positioned(f64),
    /// Instance number, 0 when missing
    Unpositioned(i32),
}

impl SortKey {
    /// Resolves one key per slice.
    ///
    /// A series is ordered by position only when every slice has one;
    /// otherwise all slices fall back to their instance number so a single
    /// order relation applies to the whole series.
    pub fn resolve<'a, I>(metadata: I) -> (Vec<SortKey>, SliceOrdering)
    where
        I: IntoIterator<Item = &'a SpatialMetadata>,
        I::IntoIter: Clone,
    {
        let metadata = metadata.into_iter();
        let all_positioned = metadata.clone().all(|m| m.image_position.is_some());
        let keys = metadata
            .map(|m| match m.image_position {
                Some(position) if all_positioned => SortKey::Positioned(position[2]),
                _ => SortKey::Unpositioned(m.instance_number.unwrap_or(0)),
            })
            .collect();
        let ordering = if all_positioned {
            SliceOrdering::ImagePositionPatient
        } else {
            SliceOrdering::InstanceNumber
        };
        (keys, ordering)
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Positioned(a), SortKey::Positioned(b)) => a.total_cmp(b),
            (SortKey::Unpositioned(a), SortKey::Unpositioned(b)) => a.cmp(b),
            (SortKey::Positioned(_), SortKey::Unpositioned(_)) => Ordering::Less,
            (SortKey::Unpositioned(_), SortKey::Positioned(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}
