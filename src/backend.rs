use std::sync::Arc;

use log::debug;

use crate::camera::CameraState;
use crate::enums::Sampling;
use crate::raycast::{CpuRaycaster, Frame, Scene};
use crate::transfer_function::LookupTable;
use crate::viewer::ViewerError;
use crate::volume::VolumeDataset;

/// Device-side half of the renderer: owns the uploaded field, the lookup
/// table and the render target, and turns a camera into a [`Frame`].
pub trait RenderBackend {
    /// Sampling mode used for the volume field.
    fn sampling(&self) -> Sampling;

    /// Replaces the resident volume. The previous one is released first.
    fn upload_volume(&mut self, volume: &Arc<VolumeDataset>) -> Result<(), ViewerError>;

    fn upload_lookup(&mut self, lookup: &LookupTable);

    fn release_volume(&mut self);

    fn resize(&mut self, width: u32, height: u32);

    fn size(&self) -> (u32, u32);

    /// Renders one frame. Without a resident volume this yields the test
    /// pattern instead of sampling.
    fn render(&mut self, camera: &CameraState, num_steps: u32) -> Result<Frame, ViewerError>;

    /// Releases every resource. The backend must not be used afterwards.
    fn release_all(&mut self);

    /// Number of resident resources (volume, lookup table, target).
    fn live_resources(&self) -> usize;
}

/// Software backend built on [`CpuRaycaster`].
pub struct CpuBackend {
    raycaster: CpuRaycaster,
    volume: Option<Arc<VolumeDataset>>,
    lookup: Option<LookupTable>,
    size: Option<(u32, u32)>,
}

impl CpuBackend {
    pub fn new(sampling: Sampling, width: u32, height: u32) -> Self {
        Self {
            raycaster: CpuRaycaster::new(sampling),
            volume: None,
            lookup: None,
            size: Some((width.max(1), height.max(1))),
        }
    }
}

impl RenderBackend for CpuBackend {
    fn sampling(&self) -> Sampling {
        self.raycaster.sampling
    }

    fn upload_volume(&mut self, volume: &Arc<VolumeDataset>) -> Result<(), ViewerError> {
        self.release_volume();
        self.volume = Some(Arc::clone(volume));
        Ok(())
    }

    fn upload_lookup(&mut self, lookup: &LookupTable) {
        self.lookup = Some(lookup.clone());
    }

    fn release_volume(&mut self) {
        if self.volume.take().is_some() {
            debug!("Released CPU volume");
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.size.is_some() {
            self.size = Some((width.max(1), height.max(1)));
        }
    }

    fn size(&self) -> (u32, u32) {
        self.size.unwrap_or((0, 0))
    }

    fn render(&mut self, camera: &CameraState, num_steps: u32) -> Result<Frame, ViewerError> {
        let (width, height) = self.size.ok_or(ViewerError::Disposed)?;
        let Some(lookup) = self.lookup.as_ref() else {
            return Ok(Frame::test_pattern(width, height));
        };
        let scene = Scene {
            volume: self.volume.as_deref(),
            lookup,
            camera,
            num_steps,
        };
        Ok(self.raycaster.render(&scene, width, height))
    }

    fn release_all(&mut self) {
        self.release_volume();
        self.lookup = None;
        self.size = None;
    }

    fn live_resources(&self) -> usize {
        usize::from(self.volume.is_some()) + usize::from(self.lookup.is_some()) + usize::from(self.size.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer_function::TransferFunction;

    #[test]
    fn upload_replaces_and_release_all_empties() {
        let mut backend = CpuBackend::new(Sampling::Nearest, 8, 8);
        let lookup = TransferFunction::default().build_lookup_table(16).unwrap();
        backend.upload_lookup(&lookup);
        let first = Arc::new(VolumeDataset::test_sphere(8).unwrap());
        let second = Arc::new(VolumeDataset::test_sphere(4).unwrap());
        backend.upload_volume(&first).unwrap();
        backend.upload_volume(&second).unwrap();
        assert_eq!(Arc::strong_count(&first), 1);
        assert_eq!(backend.live_resources(), 3);

        backend.release_all();
        assert_eq!(backend.live_resources(), 0);
        assert!(matches!(
            backend.render(&CameraState::default(), 8),
            Err(ViewerError::Disposed)
        ));
    }

    #[test]
    fn resize_changes_frame_size() {
        let mut backend = CpuBackend::new(Sampling::Nearest, 8, 8);
        backend.resize(20, 10);
        let frame = backend.render(&CameraState::default(), 8).unwrap();
        assert_eq!((frame.width(), frame.height()), (20, 10));
        backend.resize(0, 0);
        assert_eq!(backend.size(), (1, 1));
    }
}
