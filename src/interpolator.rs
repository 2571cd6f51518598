use ndarray::ArrayView3;

use crate::enums::Interpolation;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Clamps a fractional index into `[0, extent - 1]`; NaN maps to 0.
    #[inline]
    fn clamp_coordinate(value: f32, extent: usize) -> f32 {
        if value.is_nan() {
            return 0.0;
        }
        value.min(extent.saturating_sub(1) as f32).max(0.0)
    }

    pub(crate) fn sample(
        volume: &ArrayView3<f32>,
        interpolation: Interpolation,
        x: f32,
        y: f32,
        z: f32,
    ) -> f32 {
        match interpolation {
            Interpolation::Trilinear => Self::trilinear_interpolate(volume, z, y, x),
            Interpolation::Nearest => Self::nearest_neighbor(volume, z, y, x),
        }
    }

    /// Volume is indexed (z, y, x). Corners past the far edge are clamped
    /// individually so a coordinate on the last lattice plane reads that
    /// plane twice with zero weight on the duplicate.
    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f32>, z: f32, y: f32, x: f32) -> f32 {
        let (depth, height, width) = volume.dim();
        if depth == 0 || height == 0 || width == 0 {
            return 0.0;
        }

        let x = Self::clamp_coordinate(x, width);
        let y = Self::clamp_coordinate(y, height);
        let z = Self::clamp_coordinate(z, depth);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = x - x0 as f32;
        let dy = y - y0 as f32;
        let dz = z - z0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;
        let one_minus_dz = 1.0 - dz;

        let v000 = volume[[z0, y0, x0]];
        let v001 = volume[[z0, y0, x1]];
        let v010 = volume[[z0, y1, x0]];
        let v011 = volume[[z0, y1, x1]];
        let v100 = volume[[z1, y0, x0]];
        let v101 = volume[[z1, y0, x1]];
        let v110 = volume[[z1, y1, x0]];
        let v111 = volume[[z1, y1, x1]];

        // along x
        let v00 = v000.mul_add(one_minus_dx, v001 * dx);
        let v01 = v010.mul_add(one_minus_dx, v011 * dx);
        let v10 = v100.mul_add(one_minus_dx, v101 * dx);
        let v11 = v110.mul_add(one_minus_dx, v111 * dx);

        // along y
        let v0 = v00.mul_add(one_minus_dy, v01 * dy);
        let v1 = v10.mul_add(one_minus_dy, v11 * dy);

        // along z
        v0.mul_add(one_minus_dz, v1 * dz)
    }

    #[inline]
    pub(crate) fn nearest_neighbor(volume: &ArrayView3<f32>, z: f32, y: f32, x: f32) -> f32 {
        let (depth, height, width) = volume.dim();
        if depth == 0 || height == 0 || width == 0 {
            return 0.0;
        }
        let xi = Self::clamp_coordinate(x, width).round() as usize;
        let yi = Self::clamp_coordinate(y, height).round() as usize;
        let zi = Self::clamp_coordinate(z, depth).round() as usize;
        volume[[zi, yi, xi]]
    }
}
