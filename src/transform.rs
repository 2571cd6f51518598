//! Affine mapping between volume indices and patient coordinates.

use std::ops::Mul;

use log::warn;

use crate::volume::Dimensions;

/// 4x4 matrix stored row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4 {
    rows: [[f64; 4]; 4],
}

impl Matrix4 {
    pub const IDENTITY: Matrix4 = Matrix4 {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub const fn from_rows(rows: [[f64; 4]; 4]) -> Self {
        Self { rows }
    }

    pub fn from_columns(columns: [[f64; 4]; 4]) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (c, column) in columns.iter().enumerate() {
            for (r, value) in column.iter().enumerate() {
                rows[r][c] = *value;
            }
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.rows
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }

    pub fn multiply(&self, other: &Matrix4) -> Matrix4 {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = (0..4).map(|k| self.rows[r][k] * other.rows[k][c]).sum();
            }
        }
        Matrix4 { rows }
    }

    /// Applies the matrix to a point (w = 1).
    pub fn transform_point(&self, point: [f64; 3]) -> [f64; 3] {
        let [x, y, z] = point;
        let m = &self.rows;
        [
            m[0][0] * x + m[0][1] * y + m[0][2] * z + m[0][3],
            m[1][0] * x + m[1][1] * y + m[1][2] * z + m[1][3],
            m[2][0] * x + m[2][1] * y + m[2][2] * z + m[2][3],
        ]
    }

    /// Determinant of the 3x3 matrix left after removing `row` and `col`.
    fn minor(&self, row: usize, col: usize) -> f64 {
        let mut sub = [[0.0; 3]; 3];
        for (si, r) in (0..4).filter(|&r| r != row).enumerate() {
            for (sj, c) in (0..4).filter(|&c| c != col).enumerate() {
                sub[si][sj] = self.rows[r][c];
            }
        }
        sub[0][0] * (sub[1][1] * sub[2][2] - sub[1][2] * sub[2][1])
            - sub[0][1] * (sub[1][0] * sub[2][2] - sub[1][2] * sub[2][0])
            + sub[0][2] * (sub[1][0] * sub[2][1] - sub[1][1] * sub[2][0])
    }

    fn cofactor(&self, row: usize, col: usize) -> f64 {
        let sign = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
        sign * self.minor(row, col)
    }

    pub fn determinant(&self) -> f64 {
        (0..4).map(|c| self.rows[0][c] * self.cofactor(0, c)).sum()
    }

    /// Inverse by adjugate expansion, `None` when `|det| < threshold`.
    pub fn invert(&self, threshold: f64) -> Option<Matrix4> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < threshold {
            return None;
        }
        let inv_det = 1.0 / det;
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                // adjugate is the transposed cofactor matrix
                *value = self.cofactor(c, r) * inv_det;
            }
        }
        Some(Matrix4 { rows })
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Matrix4 {
    type Output = Matrix4;

    fn mul(self, rhs: Matrix4) -> Matrix4 {
        self.multiply(&rhs)
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize_or_z(v: [f64; 3]) -> [f64; 3] {
    let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if length > 0.0 && length.is_finite() {
        [v[0] / length, v[1] / length, v[2] / length]
    } else {
        [0.0, 0.0, 1.0]
    }
}

/// Outcome of the corner round-trip check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryValidation {
    pub passed: bool,
    /// Largest per-axis deviation over all corners, in index units
    pub max_error: f64,
}

/// Volume index space to patient space and back.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientTransform {
    affine: Matrix4,
    inverse: Matrix4,
    determinant: f64,
    singular: bool,
}

impl PatientTransform {
    /// Builds the affine from the first slice's orientation.
    ///
    /// The columns are the row cosine scaled by `in_plane_spacing[0]` (X),
    /// the column cosine scaled by `in_plane_spacing[1]` (Y), the unit slice
    /// normal, and `origin`. When the affine cannot be inverted the inverse
    /// degrades to identity and [`is_singular`](Self::is_singular) reports it.
    pub fn build(
        origin: [f64; 3],
        orientation: [f64; 6],
        in_plane_spacing: [f64; 2],
        singular_threshold: f64,
    ) -> Self {
        let row_cosine = [orientation[0], orientation[1], orientation[2]];
        let column_cosine = [orientation[3], orientation[4], orientation[5]];
        let normal = normalize_or_z(cross(row_cosine, column_cosine));
        let [sx, sy] = in_plane_spacing;

        let affine = Matrix4::from_columns([
            [row_cosine[0] * sx, row_cosine[1] * sx, row_cosine[2] * sx, 0.0],
            [column_cosine[0] * sy, column_cosine[1] * sy, column_cosine[2] * sy, 0.0],
            [normal[0], normal[1], normal[2], 0.0],
            [origin[0], origin[1], origin[2], 1.0],
        ]);
        let determinant = affine.determinant();

        match affine.invert(singular_threshold) {
            Some(inverse) => Self {
                affine,
                inverse,
                determinant,
                singular: false,
            },
            None => {
                warn!(
                    "Affine transform is singular (det = {determinant:e}), using identity inverse"
                );
                Self {
                    affine,
                    inverse: Matrix4::IDENTITY,
                    determinant,
                    singular: true,
                }
            }
        }
    }

    pub fn affine(&self) -> &Matrix4 {
        &self.affine
    }

    pub fn inverse(&self) -> &Matrix4 {
        &self.inverse
    }

    pub fn determinant(&self) -> f64 {
        self.determinant
    }

    /// True when the inverse is the identity fallback.
    pub fn is_singular(&self) -> bool {
        self.singular
    }

    pub fn index_to_patient(&self, index: [f64; 3]) -> [f64; 3] {
        self.affine.transform_point(index)
    }

    pub fn patient_to_index(&self, point: [f64; 3]) -> [f64; 3] {
        self.inverse.transform_point(point)
    }

    /// Maps the eight volume corners to patient space and back.
    pub fn validate_round_trip(
        &self,
        dimensions: Dimensions,
        tolerance: f64,
    ) -> GeometryValidation {
        let last = |extent: usize| extent.saturating_sub(1) as f64;
        let xs = [0.0, last(dimensions.width)];
        let ys = [0.0, last(dimensions.height)];
        let zs = [0.0, last(dimensions.depth)];

        let mut max_error: f64 = 0.0;
        for &x in &xs {
            for &y in &ys {
                for &z in &zs {
                    let corner = [x, y, z];
                    let back = self.patient_to_index(self.index_to_patient(corner));
                    for axis in 0..3 {
                        let error = (back[axis] - corner[axis]).abs();
                        // NaN must fail the check
                        max_error = if error.is_nan() {
                            f64::INFINITY
                        } else {
                            max_error.max(error)
                        };
                    }
                }
            }
        }

        GeometryValidation {
            passed: max_error <= tolerance,
            max_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_ROUND_TRIP_TOLERANCE, DEFAULT_SINGULAR_THRESHOLD};
    use crate::metadata::DEFAULT_ORIENTATION;
    use proptest::prelude::*;

    fn assert_close(a: &Matrix4, b: &Matrix4, eps: f64) {
        for r in 0..4 {
            for c in 0..4 {
                assert!(
                    (a.get(r, c) - b.get(r, c)).abs() < eps,
                    "mismatch at ({r}, {c}): {} vs {}",
                    a.get(r, c),
                    b.get(r, c)
                );
            }
        }
    }

    fn dims(width: usize, height: usize, depth: usize) -> Dimensions {
        Dimensions {
            width,
            height,
            depth,
        }
    }

    #[test]
    fn axis_aligned_unit_spacing_is_identity() {
        let transform = PatientTransform::build(
            [0.0; 3],
            DEFAULT_ORIENTATION,
            [1.0, 1.0],
            DEFAULT_SINGULAR_THRESHOLD,
        );
        assert_close(transform.affine(), &Matrix4::IDENTITY, 1e-12);
        assert_close(transform.inverse(), &Matrix4::IDENTITY, 1e-12);
        assert!(!transform.is_singular());
    }

    #[test]
    fn maps_index_to_patient_position() {
        let transform = PatientTransform::build(
            [-100.0, -120.0, 30.0],
            DEFAULT_ORIENTATION,
            [0.5, 0.75],
            DEFAULT_SINGULAR_THRESHOLD,
        );
        let patient = transform.index_to_patient([10.0, 4.0, 2.0]);
        assert_eq!(patient, [-95.0, -117.0, 32.0]);
        let index = transform.patient_to_index(patient);
        for (a, b) in index.iter().zip([10.0, 4.0, 2.0]) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn inverse_times_affine_is_identity() {
        let transform = PatientTransform::build(
            [12.0, -4.0, 7.5],
            [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
            [0.8, 1.2],
            DEFAULT_SINGULAR_THRESHOLD,
        );
        let product = *transform.inverse() * *transform.affine();
        assert_close(&product, &Matrix4::IDENTITY, 1e-9);
    }

    #[test]
    fn determinant_of_scaled_identity() {
        let m = Matrix4::from_rows([
            [2.0, 0.0, 0.0, 5.0],
            [0.0, 3.0, 0.0, 6.0],
            [0.0, 0.0, 4.0, 7.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert_eq!(m.determinant(), 24.0);
    }

    #[test]
    fn degenerate_orientation_falls_back_to_identity() {
        // row and column cosines coincide
        let transform = PatientTransform::build(
            [0.0; 3],
            [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            [1.0, 1.0],
            DEFAULT_SINGULAR_THRESHOLD,
        );
        assert!(transform.is_singular());
        assert!(transform.determinant().abs() < DEFAULT_SINGULAR_THRESHOLD);
        assert_eq!(*transform.inverse(), Matrix4::IDENTITY);

        let validation = transform.validate_round_trip(dims(4, 4, 4), DEFAULT_ROUND_TRIP_TOLERANCE);
        assert!(!validation.passed);
        assert!(validation.max_error > DEFAULT_ROUND_TRIP_TOLERANCE);
    }

    #[test]
    fn single_voxel_volume_validates() {
        let transform = PatientTransform::build(
            [1.0, 2.0, 3.0],
            DEFAULT_ORIENTATION,
            [1.0, 1.0],
            DEFAULT_SINGULAR_THRESHOLD,
        );
        let validation = transform.validate_round_trip(dims(1, 1, 1), DEFAULT_ROUND_TRIP_TOLERANCE);
        assert!(validation.passed);
    }

    fn rotation(ax: f64, ay: f64, az: f64) -> [[f64; 3]; 3] {
        let (sx, cx) = ax.sin_cos();
        let (sy, cy) = ay.sin_cos();
        let (sz, cz) = az.sin_cos();
        // Rz * Ry * Rx
        [
            [cz * cy, cz * sy * sx - sz * cx, cz * sy * cx + sz * sx],
            [sz * cy, sz * sy * sx + cz * cx, sz * sy * cx - cz * sx],
            [-sy, cy * sx, cy * cx],
        ]
    }

    proptest! {
        #[test]
        fn corners_round_trip_within_tolerance(
            ax in -3.14f64..3.14, ay in -3.14f64..3.14, az in -3.14f64..3.14,
            sx in 0.1f64..5.0, sy in 0.1f64..5.0,
            ox in -500.0f64..500.0, oy in -500.0f64..500.0, oz in -500.0f64..500.0,
            width in 1usize..512, height in 1usize..512, depth in 1usize..400,
        ) {
            let r = rotation(ax, ay, az);
            let orientation = [r[0][0], r[1][0], r[2][0], r[0][1], r[1][1], r[2][1]];
            let transform = PatientTransform::build(
                [ox, oy, oz],
                orientation,
                [sx, sy],
                DEFAULT_SINGULAR_THRESHOLD,
            );
            prop_assert!(!transform.is_singular());
            let validation = transform.validate_round_trip(
                dims(width, height, depth),
                DEFAULT_ROUND_TRIP_TOLERANCE,
            );
            prop_assert!(validation.passed, "max error {}", validation.max_error);
        }
    }
}
