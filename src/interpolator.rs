use glam::Vec3;
use ndarray::Array3;

use crate::enums::Sampling;

/// CPU mirror of the GPU texture unit for a single-channel 3D field stored as
/// `(depth, height, width)`.
pub(crate) struct Interpolator;

impl Interpolator {
    /// Samples `field` at normalized texture coordinates `coord` (x ↔ width,
    /// y ↔ height, z ↔ depth) with clamp-to-edge addressing.
    ///
    /// Coordinates outside `[0, 1]³` read as zero.
    #[inline]
    pub(crate) fn sample(field: &Array3<f32>, coord: Vec3, sampling: Sampling) -> f32 {
        if coord.cmplt(Vec3::ZERO).any() || coord.cmpgt(Vec3::ONE).any() {
            return 0.0;
        }
        match sampling {
            Sampling::Trilinear => Self::trilinear_interpolate(field, coord),
            Sampling::Nearest => Self::nearest(field, coord),
        }
    }

    #[inline]
    fn nearest(field: &Array3<f32>, coord: Vec3) -> f32 {
        let (depth, height, width) = field.dim();
        let x = ((coord.x * width as f32) as usize).min(width - 1);
        let y = ((coord.y * height as f32) as usize).min(height - 1);
        let z = ((coord.z * depth as f32) as usize).min(depth - 1);
        field[[z, y, x]]
    }

    #[inline]
    fn trilinear_interpolate(field: &Array3<f32>, coord: Vec3) -> f32 {
        let (depth, height, width) = field.dim();

        // Match GPU: texel centers sit at half-integer positions
        let x = (coord.x * width as f32 - 0.5).clamp(0.0, (width - 1) as f32);
        let y = (coord.y * height as f32 - 0.5).clamp(0.0, (height - 1) as f32);
        let z = (coord.z * depth as f32 - 0.5).clamp(0.0, (depth - 1) as f32);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = x - x0 as f32;
        let dy = y - y0 as f32;
        let dz = z - z0 as f32;

        let lerp = |a: f32, b: f32, t: f32| (b - a).mul_add(t, a);

        let c00 = lerp(field[[z0, y0, x0]], field[[z0, y0, x1]], dx);
        let c01 = lerp(field[[z0, y1, x0]], field[[z0, y1, x1]], dx);
        let c10 = lerp(field[[z1, y0, x0]], field[[z1, y0, x1]], dx);
        let c11 = lerp(field[[z1, y1, x0]], field[[z1, y1, x1]], dx);

        let c0 = lerp(c00, c01, dy);
        let c1 = lerp(c10, c11, dy);

        lerp(c0, c1, dz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> Array3<f32> {
        // value == x index along width
        Array3::from_shape_fn((2, 2, 4), |(_, _, x)| x as f32)
    }

    #[test]
    fn outside_unit_cube_reads_zero() {
        let field = Array3::from_elem((2, 2, 2), 1.0);
        assert_eq!(Interpolator::sample(&field, Vec3::new(1.01, 0.5, 0.5), Sampling::Trilinear), 0.0);
        assert_eq!(Interpolator::sample(&field, Vec3::new(0.5, -0.2, 0.5), Sampling::Nearest), 0.0);
        assert_eq!(Interpolator::sample(&field, Vec3::splat(0.5), Sampling::Nearest), 1.0);
    }

    #[test]
    fn trilinear_blends_between_texel_centers() {
        let field = ramp();
        // halfway between texel 1 (u = 0.375) and texel 2 (u = 0.625)
        let value = Interpolator::sample(&field, Vec3::new(0.5, 0.5, 0.5), Sampling::Trilinear);
        assert!((value - 1.5).abs() < 1e-5);
        // clamp-to-edge below the first texel center
        let edge = Interpolator::sample(&field, Vec3::new(0.0, 0.5, 0.5), Sampling::Trilinear);
        assert!(edge.abs() < 1e-5);
    }

    #[test]
    fn nearest_snaps_to_containing_texel() {
        let field = ramp();
        let value = Interpolator::sample(&field, Vec3::new(0.55, 0.5, 0.5), Sampling::Nearest);
        assert_eq!(value, 2.0);
        let last = Interpolator::sample(&field, Vec3::new(1.0, 1.0, 1.0), Sampling::Nearest);
        assert_eq!(last, 3.0);
    }
}
