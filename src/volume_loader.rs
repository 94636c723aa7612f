use crate::{
    enums::SortBy,
    volume::{Dimensions, Spacing, VolumeDataset, VolumeError},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use log::{info, warn};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),
}

type OrderedSlice = (Option<f32>, Array2<i16>);

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a Hounsfield volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<VolumeDataset, VolumeLoaderError> {
        let slices: Vec<_> = dicom_objects
            .par_iter()
            .filter_map(|dicom_object| Self::extract_slice_with_order(dicom_object, sort_by))
            .collect();

        let spacing = Self::get_spacing(dicom_objects).unwrap_or_else(|| {
            warn!("No Pixel Spacing / Slice Thickness found, assuming isotropic voxels");
            Spacing::default()
        });

        Self::assemble(slices, sort_by, spacing)
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        sort_by: SortBy,
    ) -> Result<VolumeDataset, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<VolumeDataset, VolumeLoaderError> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        // stable order for SortBy::None
        paths.sort();
        info!("Loading {} DICOM files from {}", paths.len(), path.as_ref().display());

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn extract_slice_with_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Option<OrderedSlice> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let slice = Self::decode_hounsfield(dicom_object)?;
        Some((order, slice))
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    /// First frame, first sample, with the modality LUT applied so values
    /// are Hounsfield units.
    fn decode_hounsfield(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<i16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::Default)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]).mapv(|hu| hu.round() as i16))
    }

    fn sort_slices(slices: &mut [OrderedSlice], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        }

        // head first
        if matches!(sort_by, SortBy::ImagePositionPatient) {
            slices.reverse();
        }
    }

    fn assemble(
        mut slices: Vec<OrderedSlice>,
        sort_by: SortBy,
        spacing: Spacing,
    ) -> Result<VolumeDataset, VolumeLoaderError> {
        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_slices(&mut slices, sort_by);

        let (height, width) = slices[0].1.dim();
        if slices.iter().any(|(_, slice)| slice.dim() != (height, width)) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }

        let depth = slices.len();
        let mut volume = Array3::<i16>::zeros((depth, height, width));
        for (i, (_, slice)) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(slice);
        }

        let dimensions = Dimensions::new(width as u32, height as u32, depth as u32);
        info!("Assembled {dimensions:?} volume with spacing {spacing:?}");
        // standard layout iterates x fastest, then y, then z
        let raw: Vec<i16> = volume.iter().copied().collect();
        Ok(VolumeDataset::new(raw, dimensions, spacing)?)
    }

    fn get_spacing(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<Spacing> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float32()
                .ok()?;

            // Pixel Spacing is (row spacing, column spacing)
            let row = *pixel_spacing.first()?;
            let column = *pixel_spacing.get(1)?;
            Some(Spacing::new(column, row, slice_thickness))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn slice(order: f32, fill: i16) -> OrderedSlice {
        (Some(order), Array2::from_elem((2, 3), fill))
    }

    #[test]
    fn empty_input_has_no_valid_images() {
        let result = VolumeLoader::load_from_dicom_objects(&[], SortBy::InstanceNumber);
        assert!(matches!(result, Err(VolumeLoaderError::NoValidImages)));
    }

    #[test]
    fn directory_without_dcm_files_is_rejected() {
        let dir = std::env::temp_dir().join(format!("hu-raycast-empty-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("notes.txt"), b"not dicom").unwrap();

        let result = VolumeLoader::load_from_directory(&dir, SortBy::None);
        assert!(matches!(result, Err(VolumeLoaderError::NoValidImages)));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_is_io_error() {
        let result = VolumeLoader::load_from_directory("/definitely/not/here", SortBy::None);
        assert!(matches!(result, Err(VolumeLoaderError::Io(_))));
    }

    #[test]
    fn instance_number_sorts_ascending() {
        let slices = vec![slice(3.0, 30), slice(1.0, 10), slice(2.0, 20)];
        let volume = VolumeLoader::assemble(slices, SortBy::InstanceNumber, Spacing::default()).unwrap();
        let dims = volume.dimensions();
        assert_eq!(dims, Dimensions::new(3, 2, 3));
        let plane = (dims.width * dims.height) as usize;
        let firsts: Vec<_> = (0..3).map(|z| volume.raw_samples()[z * plane]).collect();
        assert_eq!(firsts, vec![10, 20, 30]);
    }

    #[test]
    fn image_position_sorts_descending() {
        let slices = vec![slice(-5.0, 1), slice(5.0, 3), slice(0.0, 2)];
        let volume =
            VolumeLoader::assemble(slices, SortBy::ImagePositionPatient, Spacing::default()).unwrap();
        let plane = 6;
        let firsts: Vec<_> = (0..3).map(|z| volume.raw_samples()[z * plane]).collect();
        assert_eq!(firsts, vec![3, 2, 1]);
    }

    #[test]
    fn rows_map_to_y_and_columns_to_x() {
        let pixels = array![[1_i16, 2, 3], [4, 5, 6]];
        let volume =
            VolumeLoader::assemble(vec![(None, pixels)], SortBy::None, Spacing::default()).unwrap();
        assert_eq!(volume.dimensions(), Dimensions::new(3, 2, 1));
        assert_eq!(volume.raw_samples(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn mismatched_slices_are_rejected() {
        let slices = vec![slice(0.0, 0), (Some(1.0), Array2::zeros((3, 3)))];
        let result = VolumeLoader::assemble(slices, SortBy::InstanceNumber, Spacing::default());
        assert!(matches!(result, Err(VolumeLoaderError::InconsistentDimensions)));
    }
}
