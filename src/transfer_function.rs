//! Scalar intensity → RGBA mapping.
//!
//! A [`TransferFunction`] is two independent piecewise-linear curves over the
//! Hounsfield domain, one for color and one for opacity. Each is clamped to its
//! first/last control point outside the covered range. For rendering it is
//! materialized as a [`LookupTable`] spanning `[HU_MIN, HU_MAX]`.

use crate::enums::Preset;
use crate::volume::{HU_MAX, HU_MIN};

use glam::{Vec3, Vec4};
use thiserror::Error;

/// Default number of lookup-table entries.
pub const LUT_RESOLUTION: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferFunctionError {
    #[error("Transfer function needs at least one color control point")]
    NoColorPoints,

    #[error("Transfer function needs at least one opacity control point")]
    NoOpacityPoints,

    #[error("Lookup table resolution must be at least 2, got {0}")]
    InvalidResolution(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorPoint {
    pub value: f32,
    pub rgb: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpacityPoint {
    pub value: f32,
    pub opacity: f32,
}

const fn color(value: f32, r: u8, g: u8, b: u8) -> ColorPoint {
    ColorPoint {
        value,
        rgb: [r, g, b],
    }
}

const fn opacity(value: f32, opacity: f32) -> OpacityPoint {
    OpacityPoint { value, opacity }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    color_points: Vec<ColorPoint>,
    opacity_points: Vec<OpacityPoint>,
}

impl TransferFunction {
    /// Builds a transfer function, sorting both lists by value and clamping
    /// opacities into `[0, 1]`.
    pub fn new(
        mut color_points: Vec<ColorPoint>,
        mut opacity_points: Vec<OpacityPoint>,
    ) -> Result<Self, TransferFunctionError> {
        if color_points.is_empty() {
            return Err(TransferFunctionError::NoColorPoints);
        }
        if opacity_points.is_empty() {
            return Err(TransferFunctionError::NoOpacityPoints);
        }
        color_points.sort_by(|a, b| a.value.total_cmp(&b.value));
        opacity_points.sort_by(|a, b| a.value.total_cmp(&b.value));
        for point in &mut opacity_points {
            point.opacity = point.opacity.clamp(0.0, 1.0);
        }
        Ok(Self {
            color_points,
            opacity_points,
        })
    }

    pub fn preset(preset: Preset) -> Self {
        let (colors, opacities): (&[ColorPoint], &[OpacityPoint]) = match preset {
            Preset::CtBone => (CT_BONE_COLORS, CT_BONE_OPACITIES),
            Preset::CtSoftTissue => (CT_SOFT_TISSUE_COLORS, CT_SOFT_TISSUE_OPACITIES),
            Preset::CtLung => (CT_LUNG_COLORS, CT_LUNG_OPACITIES),
            Preset::Mip => (MIP_COLORS, MIP_OPACITIES),
        };
        Self {
            color_points: colors.to_vec(),
            opacity_points: opacities.to_vec(),
        }
    }

    pub fn color_points(&self) -> &[ColorPoint] {
        &self.color_points
    }

    pub fn opacity_points(&self) -> &[OpacityPoint] {
        &self.opacity_points
    }

    /// Color at `value` HU, each channel in `[0, 1]`.
    pub fn color(&self, value: f32) -> Vec3 {
        let to_vec = |p: &ColorPoint| {
            Vec3::new(p.rgb[0] as f32, p.rgb[1] as f32, p.rgb[2] as f32) / 255.0
        };
        piecewise_linear(&self.color_points, value, |p| p.value, to_vec, Vec3::lerp)
    }

    pub fn opacity(&self, value: f32) -> f32 {
        piecewise_linear(
            &self.opacity_points,
            value,
            |p| p.value,
            |p| p.opacity,
            |a, b, t| a + (b - a) * t,
        )
    }

    pub fn build_lookup_table(&self, resolution: usize) -> Result<LookupTable, TransferFunctionError> {
        if resolution < 2 {
            return Err(TransferFunctionError::InvalidResolution(resolution));
        }
        let entries = (0..resolution)
            .map(|i| {
                let value = HU_MIN + (i as f32 / (resolution - 1) as f32) * (HU_MAX - HU_MIN);
                self.color(value).extend(self.opacity(value))
            })
            .collect();
        Ok(LookupTable { entries })
    }
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self::preset(Preset::CtBone)
    }
}

/// Interpolates between the two control points bracketing `value`; clamps to
/// the end points outside their range. `points` must be sorted and non-empty.
fn piecewise_linear<P, T: Copy>(
    points: &[P],
    value: f32,
    key: impl Fn(&P) -> f32,
    get: impl Fn(&P) -> T,
    lerp: impl Fn(T, T, f32) -> T,
) -> T {
    let first = &points[0];
    let last = &points[points.len() - 1];
    if value <= key(first) {
        return get(first);
    }
    if value >= key(last) {
        return get(last);
    }
    // first index whose key exceeds value; guaranteed in 1..len by the checks above
    let upper = points.partition_point(|p| key(p) <= value);
    let (p0, p1) = (&points[upper - 1], &points[upper]);
    let span = key(p1) - key(p0);
    let t = if span > 0.0 { (value - key(p0)) / span } else { 0.0 };
    lerp(get(p0), get(p1), t)
}

/// RGBA table sampled uniformly over `[HU_MIN, HU_MAX]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    entries: Vec<Vec4>,
}

impl LookupTable {
    pub fn resolution(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Vec4] {
        &self.entries
    }

    /// Flattened `r, g, b, a` floats in entry order.
    pub fn to_rgba_f32(&self) -> Vec<f32> {
        self.entries.iter().flat_map(|e| e.to_array()).collect()
    }

    /// Samples at a normalized intensity with linear filtering and clamped
    /// edges, matching a linearly filtered `N×1` texture.
    #[inline]
    pub fn sample(&self, normalized: f32) -> Vec4 {
        let size = self.entries.len();
        let x = (normalized * size as f32 - 0.5).clamp(0.0, (size - 1) as f32);
        let i0 = x.floor() as usize;
        let i1 = (i0 + 1).min(size - 1);
        self.entries[i0].lerp(self.entries[i1], x - i0 as f32)
    }
}

const CT_BONE_COLORS: &[ColorPoint] = &[
    color(-1024.0, 0, 0, 0),
    color(150.0, 140, 82, 50),
    color(300.0, 230, 200, 160),
    color(700.0, 245, 230, 205),
    color(1500.0, 255, 250, 240),
    color(3071.0, 255, 255, 255),
];

const CT_BONE_OPACITIES: &[OpacityPoint] = &[
    opacity(-1024.0, 0.0),
    opacity(150.0, 0.0),
    opacity(300.0, 0.15),
    opacity(700.0, 0.6),
    opacity(1500.0, 0.9),
    opacity(3071.0, 1.0),
];

const CT_SOFT_TISSUE_COLORS: &[ColorPoint] = &[
    color(-1024.0, 0, 0, 0),
    color(-100.0, 150, 80, 60),
    color(40.0, 200, 120, 100),
    color(80.0, 230, 180, 160),
    color(400.0, 255, 240, 220),
    color(3071.0, 255, 255, 255),
];

const CT_SOFT_TISSUE_OPACITIES: &[OpacityPoint] = &[
    opacity(-1024.0, 0.0),
    opacity(-200.0, 0.0),
    opacity(-50.0, 0.05),
    opacity(40.0, 0.25),
    opacity(100.0, 0.4),
    opacity(400.0, 0.6),
    opacity(3071.0, 0.8),
];

const CT_LUNG_COLORS: &[ColorPoint] = &[
    color(-1024.0, 0, 0, 0),
    color(-900.0, 80, 120, 200),
    color(-500.0, 180, 200, 230),
    color(-200.0, 220, 150, 120),
    color(300.0, 240, 220, 200),
    color(3071.0, 255, 255, 255),
];

const CT_LUNG_OPACITIES: &[OpacityPoint] = &[
    opacity(-1024.0, 0.0),
    opacity(-950.0, 0.0),
    opacity(-800.0, 0.15),
    opacity(-500.0, 0.05),
    opacity(-200.0, 0.0),
    opacity(300.0, 0.0),
    opacity(1000.0, 0.3),
    opacity(3071.0, 0.5),
];

const MIP_COLORS: &[ColorPoint] = &[color(-1024.0, 0, 0, 0), color(3071.0, 255, 255, 255)];

const MIP_OPACITIES: &[OpacityPoint] = &[opacity(-1024.0, 0.0), opacity(3071.0, 1.0)];

#[cfg(test)]
mod tests {
    use super::*;

    fn two_point() -> TransferFunction {
        TransferFunction::new(
            vec![color(0.0, 0, 0, 0), color(100.0, 255, 128, 0)],
            vec![opacity(0.0, 0.2), opacity(100.0, 0.6)],
        )
        .unwrap()
    }

    #[test]
    fn clamps_below_first_point() {
        let tf = two_point();
        for v in [-3000.0, -1.0, 0.0] {
            assert_eq!(tf.color(v), Vec3::ZERO);
            assert_eq!(tf.opacity(v), 0.2);
        }
    }

    #[test]
    fn clamps_above_last_point() {
        let tf = two_point();
        for v in [100.0, 101.0, 5000.0] {
            assert_eq!(tf.color(v), Vec3::new(1.0, 128.0 / 255.0, 0.0));
            assert!((tf.opacity(v) - 0.6).abs() < 1e-6);
        }
    }

    #[test]
    fn interpolates_linearly_between_points() {
        let tf = two_point();
        let c = tf.color(25.0);
        assert!((c.x - 0.25).abs() < 1e-6);
        assert!((c.y - 0.25 * 128.0 / 255.0).abs() < 1e-6);
        assert!((tf.opacity(75.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unsorted_points_are_sorted() {
        let tf = TransferFunction::new(
            vec![color(100.0, 255, 255, 255), color(0.0, 0, 0, 0)],
            vec![opacity(50.0, 1.5), opacity(-50.0, 0.0)],
        )
        .unwrap();
        assert_eq!(tf.color_points()[0].value, 0.0);
        assert_eq!(tf.opacity_points()[1].opacity, 1.0);
        assert!((tf.opacity(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_lists_are_rejected() {
        assert_eq!(
            TransferFunction::new(Vec::new(), vec![opacity(0.0, 0.0)]),
            Err(TransferFunctionError::NoColorPoints)
        );
        assert_eq!(
            TransferFunction::new(vec![color(0.0, 0, 0, 0)], Vec::new()),
            Err(TransferFunctionError::NoOpacityPoints)
        );
    }

    #[test]
    fn single_point_is_constant() {
        let tf = TransferFunction::new(vec![color(10.0, 255, 0, 0)], vec![opacity(10.0, 0.4)]).unwrap();
        assert_eq!(tf.color(-500.0), Vec3::X);
        assert_eq!(tf.opacity(2000.0), 0.4);
    }

    #[test]
    fn bone_preset_end_points() {
        let tf = TransferFunction::preset(Preset::CtBone);
        assert_eq!(tf.opacity(-1024.0), 0.0);
        assert_eq!(tf.opacity(3071.0), 1.0);
    }

    #[test]
    fn lookup_table_spans_hounsfield_domain() {
        let tf = TransferFunction::preset(Preset::Mip);
        let lut = tf.build_lookup_table(LUT_RESOLUTION).unwrap();
        assert_eq!(lut.resolution(), 256);
        assert_eq!(lut.entries()[0], Vec4::ZERO);
        assert!((lut.entries()[255] - Vec4::ONE).length() < 1e-6);
        assert!((lut.entries()[51].w - 51.0 / 255.0).abs() < 1e-5);
        assert_eq!(lut.to_rgba_f32().len(), 256 * 4);
        assert!(tf.build_lookup_table(1).is_err());
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let tf = TransferFunction::preset(Preset::CtSoftTissue);
        assert_eq!(tf.build_lookup_table(64), tf.build_lookup_table(64));
    }

    #[test]
    fn lookup_sampling_clamps_and_filters() {
        let lut = TransferFunction::preset(Preset::Mip).build_lookup_table(2).unwrap();
        assert_eq!(lut.sample(0.0), Vec4::ZERO);
        assert_eq!(lut.sample(1.0), Vec4::ONE);
        assert!((lut.sample(0.5).w - 0.5).abs() < 1e-6);
    }
}
