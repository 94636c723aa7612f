use crate::enums::Sampling;
use crate::interpolator::Interpolator;

use glam::Vec3;
use log::{info, warn};
use ndarray::Array3;
use rayon::prelude::*;
use thiserror::Error;

/// Lower bound of the Hounsfield domain mapped onto `[0, 1]`.
pub const HU_MIN: f32 = -1024.0;
/// Upper bound of the Hounsfield domain mapped onto `[0, 1]`.
pub const HU_MAX: f32 = 3071.0;

/// Edge length of the synthetic sphere volume.
pub const TEST_VOLUME_SIZE: u32 = 64;

/// Largest accepted voxel count.
pub const MAX_VOXELS: usize = u32::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VolumeError {
    #[error("Volume contains no samples")]
    EmptyVolume,

    #[error("Volume dimensions must be non-zero, got {0:?}")]
    ZeroDimension(Dimensions),

    #[error("Volume dimensions {0:?} exceed the voxel limit")]
    TooLarge(Dimensions),
}

/// Conditions that degrade a loaded volume without rejecting it.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeWarning {
    /// Sample count differs from the voxel count; missing voxels read as zero.
    SizeMismatch { expected: usize, actual: usize },
    /// Every sample holds the same value; the volume renders as a solid block.
    DegenerateRange { value: i16 },
    /// A non-positive or non-finite spacing component was replaced by `1.0`.
    InvalidSpacing { spacing: Spacing },
}

/// Voxel counts along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// `None` if the product overflows `usize`.
    pub fn voxel_count(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.depth as usize)
    }

    /// Voxel count of a non-empty grid no larger than [`MAX_VOXELS`].
    fn checked_voxel_count(&self) -> Result<usize, VolumeError> {
        match self.voxel_count() {
            Some(0) => Err(VolumeError::ZeroDimension(*self)),
            Some(count) if count <= MAX_VOXELS => Ok(count),
            _ => Err(VolumeError::TooLarge(*self)),
        }
    }
}

/// Physical distance between voxel centers in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacing {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Spacing {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn is_valid(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|s| s.is_finite() && *s > 0.0)
    }

    fn sanitized(self) -> Self {
        let fix = |s: f32| if s.is_finite() && s > 0.0 { s } else { 1.0 };
        Self::new(fix(self.x), fix(self.y), fix(self.z))
    }
}

impl Default for Spacing {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// A scalar intensity field together with its geometry.
///
/// `raw` keeps the Hounsfield samples as given, `normalized` holds them mapped
/// into `[0, 1]` and laid out as `(depth, height, width)`.
#[derive(Debug, Clone)]
pub struct VolumeDataset {
    dimensions: Dimensions,
    spacing: Spacing,
    raw: Vec<i16>,
    normalized: Array3<f32>,
    range: (i16, i16),
    warnings: Vec<VolumeWarning>,
}

impl VolumeDataset {
    /// Validates and normalizes a raw Hounsfield buffer.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::EmptyVolume`] for an empty buffer,
    /// [`VolumeError::ZeroDimension`] if any axis has no voxels and
    /// [`VolumeError::TooLarge`] above [`MAX_VOXELS`]. Size
    /// mismatches and constant data are recorded in [`Self::warnings`].
    pub fn new(
        raw: Vec<i16>,
        dimensions: Dimensions,
        spacing: Spacing,
    ) -> Result<Self, VolumeError> {
        if raw.is_empty() {
            return Err(VolumeError::EmptyVolume);
        }
        let expected = dimensions.checked_voxel_count()?;

        let mut warnings = Vec::new();

        if raw.len() != expected {
            warn!(
                "Volume sample count {} does not match dimensions {}x{}x{} ({} voxels); missing voxels read as zero",
                raw.len(),
                dimensions.width,
                dimensions.height,
                dimensions.depth,
                expected
            );
            warnings.push(VolumeWarning::SizeMismatch {
                expected,
                actual: raw.len(),
            });
        }

        let spacing = if spacing.is_valid() {
            spacing
        } else {
            warn!("Invalid voxel spacing {spacing:?}, substituting 1.0 for bad components");
            warnings.push(VolumeWarning::InvalidSpacing { spacing });
            spacing.sanitized()
        };

        let (min, max) = raw
            .par_iter()
            .fold(
                || (i16::MAX, i16::MIN),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (i16::MAX, i16::MIN),
                |(a_lo, a_hi), (b_lo, b_hi)| (a_lo.min(b_lo), a_hi.max(b_hi)),
            );
        if min == max {
            warn!("Volume data is constant ({min} HU); it will render as a solid block");
            warnings.push(VolumeWarning::DegenerateRange { value: min });
        }

        let normalized = Self::normalize(&raw, dimensions);

        info!(
            "Loaded volume {}x{}x{} spacing ({:.3}, {:.3}, {:.3}) range [{min}, {max}] HU",
            dimensions.width, dimensions.height, dimensions.depth, spacing.x, spacing.y, spacing.z
        );

        Ok(Self {
            dimensions,
            spacing,
            raw,
            normalized,
            range: (min, max),
            warnings,
        })
    }

    /// Synthetic self-test volume: a centered sphere of radius `size / 3`
    /// inside a `size³` cube of air.
    pub fn test_sphere(size: u32) -> Result<Self, VolumeError> {
        let dimensions = Dimensions::new(size, size, size);
        let count = dimensions.checked_voxel_count()?;
        let center = size as f32 / 2.0;
        let radius = size as f32 / 3.0;
        let plane = size as usize * size as usize;

        let raw: Vec<i16> = (0..count)
            .into_par_iter()
            .map(|i| {
                let z = (i / plane) as f32;
                let y = ((i % plane) / size as usize) as f32;
                let x = (i % size as usize) as f32;
                let dist = Vec3::new(x - center, y - center, z - center).length();
                if dist < radius {
                    (500.0 + 50.0 * (radius - dist)) as i16
                } else {
                    -1000
                }
            })
            .collect();

        Self::new(raw, dimensions, Spacing::default())
    }

    #[inline]
    pub fn normalize_sample(value: i16) -> f32 {
        ((value as f32 - HU_MIN) / (HU_MAX - HU_MIN)).clamp(0.0, 1.0)
    }

    fn normalize(raw: &[i16], dimensions: Dimensions) -> Array3<f32> {
        let shape = (
            dimensions.depth as usize,
            dimensions.height as usize,
            dimensions.width as usize,
        );
        let mut normalized = Array3::<f32>::zeros(shape);
        if let Some(out) = normalized.as_slice_mut() {
            out.par_iter_mut()
                .zip(raw.par_iter())
                .for_each(|(dst, &src)| *dst = Self::normalize_sample(src));
        }
        normalized
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    pub fn raw_samples(&self) -> &[i16] {
        &self.raw
    }

    /// Normalized field as `(depth, height, width)`.
    pub fn normalized(&self) -> &Array3<f32> {
        &self.normalized
    }

    /// Normalized samples in upload order (width fastest, then height, then depth).
    pub fn normalized_samples(&self) -> &[f32] {
        self.normalized.as_slice().unwrap_or(&[])
    }

    /// Observed `(min, max)` of the raw samples.
    pub fn value_range(&self) -> (i16, i16) {
        self.range
    }

    pub fn warnings(&self) -> &[VolumeWarning] {
        &self.warnings
    }

    /// Physical extent scaled so the longest axis has length 1.
    pub fn box_size(&self) -> Vec3 {
        let extent = Vec3::new(
            self.dimensions.width as f32 * self.spacing.x,
            self.dimensions.height as f32 * self.spacing.y,
            self.dimensions.depth as f32 * self.spacing.z,
        );
        extent / extent.max_element()
    }

    /// Samples the normalized field at texture coordinates in `[0, 1]³`.
    #[inline]
    pub fn sample(&self, coord: Vec3, sampling: Sampling) -> f32 {
        Interpolator::sample(&self.normalized, coord, sampling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_buffer() {
        let result = VolumeDataset::new(Vec::new(), Dimensions::new(2, 2, 2), Spacing::default());
        assert_eq!(result.unwrap_err(), VolumeError::EmptyVolume);
    }

    #[test]
    fn rejects_zero_dimension() {
        let result = VolumeDataset::new(vec![0; 4], Dimensions::new(2, 2, 0), Spacing::default());
        assert!(matches!(result, Err(VolumeError::ZeroDimension(_))));
    }

    #[test]
    fn rejects_overflowing_dimensions() {
        let huge = Dimensions::new(u32::MAX, u32::MAX, u32::MAX);
        assert_eq!(huge.voxel_count(), None);
        let result = VolumeDataset::new(vec![0; 8], huge, Spacing::default());
        assert_eq!(result.unwrap_err(), VolumeError::TooLarge(huge));

        let wide = Dimensions::new(70_000, 70_000, 70_000);
        let result = VolumeDataset::new(vec![0; 8], wide, Spacing::default());
        assert_eq!(result.unwrap_err(), VolumeError::TooLarge(wide));
    }

    #[test]
    fn test_sphere_rejects_oversized_and_empty_cubes() {
        assert_eq!(
            VolumeDataset::test_sphere(70_000).unwrap_err(),
            VolumeError::TooLarge(Dimensions::new(70_000, 70_000, 70_000))
        );
        assert!(matches!(
            VolumeDataset::test_sphere(0),
            Err(VolumeError::ZeroDimension(_))
        ));
    }

    #[test]
    fn normalizes_into_unit_range_with_clamping() {
        let raw = vec![-2000, -1024, 1023, 3071, 5000, 0, 0, 0];
        let volume = VolumeDataset::new(raw, Dimensions::new(2, 2, 2), Spacing::default()).unwrap();
        let samples = volume.normalized_samples();
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.0);
        assert!((samples[2] - 2047.0 / 4095.0).abs() < 1e-6);
        assert_eq!(samples[3], 1.0);
        assert_eq!(samples[4], 1.0);
        assert!(volume.warnings().is_empty());
    }

    #[test]
    fn size_mismatch_is_tolerated_and_zero_filled() {
        let volume =
            VolumeDataset::new(vec![3071; 5], Dimensions::new(2, 2, 2), Spacing::default()).unwrap();
        assert!(volume.warnings().contains(&VolumeWarning::SizeMismatch {
            expected: 8,
            actual: 5
        }));
        let samples = volume.normalized_samples();
        assert_eq!(samples.len(), 8);
        assert_eq!(&samples[..5], &[1.0; 5]);
        assert_eq!(&samples[5..], &[0.0; 3]);
    }

    #[test]
    fn oversized_buffer_is_truncated() {
        let volume =
            VolumeDataset::new(vec![0; 12], Dimensions::new(2, 2, 2), Spacing::default()).unwrap();
        assert_eq!(volume.normalized_samples().len(), 8);
        assert!(matches!(
            volume.warnings()[0],
            VolumeWarning::SizeMismatch { expected: 8, actual: 12 }
        ));
    }

    #[test]
    fn constant_data_flags_degenerate_range() {
        let volume = VolumeDataset::new(
            vec![-1024; 1000],
            Dimensions::new(10, 10, 10),
            Spacing::default(),
        )
        .unwrap();
        assert_eq!(
            volume.warnings(),
            &[VolumeWarning::DegenerateRange { value: -1024 }]
        );
        assert_eq!(volume.value_range(), (-1024, -1024));
    }

    #[test]
    fn box_size_follows_anisotropic_spacing() {
        let volume = VolumeDataset::new(
            vec![0; 4 * 2 * 10],
            Dimensions::new(4, 2, 10),
            Spacing::new(0.5, 0.5, 2.5),
        )
        .unwrap();
        let size = volume.box_size();
        // physical extent (2, 1, 25)
        assert!((size.z - 1.0).abs() < 1e-6);
        assert!((size.x - 0.08).abs() < 1e-6);
        assert!((size.y - 0.04).abs() < 1e-6);
    }

    #[test]
    fn bad_spacing_is_replaced() {
        let volume = VolumeDataset::new(
            vec![0, 1],
            Dimensions::new(2, 1, 1),
            Spacing::new(0.0, 1.0, f32::NAN),
        )
        .unwrap();
        assert_eq!(volume.spacing(), Spacing::default());
        assert!(matches!(volume.warnings()[0], VolumeWarning::InvalidSpacing { .. }));
    }

    #[test]
    fn test_sphere_is_dense_in_the_middle() {
        let volume = VolumeDataset::test_sphere(32).unwrap();
        let dims = volume.dimensions();
        assert_eq!(dims, Dimensions::new(32, 32, 32));
        let center = volume.normalized()[[16, 16, 16]];
        let corner = volume.normalized()[[0, 0, 0]];
        assert!(center > 0.3);
        assert!((corner - VolumeDataset::normalize_sample(-1000)).abs() < 1e-6);
        assert!(volume.warnings().is_empty());
    }
}
