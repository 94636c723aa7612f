use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use thiserror::Error;
use web_time::Instant;

use crate::backend::{CpuBackend, RenderBackend};
use crate::camera::CameraState;
use crate::enums::{Preset, RenderMode, Sampling, StandardView};
use crate::gpu_renderer::{GpuRenderer, WGPU};
use crate::raycast::{Frame, NUM_STEPS};
use crate::transfer_function::{LUT_RESOLUTION, LookupTable, TransferFunction, TransferFunctionError};
use crate::volume::{
    Dimensions, Spacing, TEST_VOLUME_SIZE, VolumeDataset, VolumeError, VolumeWarning,
};

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Failed to create graphics context: {0}")]
    ContextCreation(String),

    #[error("Shader compilation failed: {0}")]
    Shader(String),

    #[error("Failed to read back rendered frame: {0}")]
    Readback(String),

    #[error("Volume {dimensions:?} exceeds the 3D texture limit of {limit}")]
    VolumeTooLarge { dimensions: Dimensions, limit: u32 },

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("Transfer function error: {0}")]
    TransferFunction(#[from] TransferFunctionError),

    #[error("No frame has been rendered yet")]
    NoFrame,

    #[error("Image encoding error: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Viewer has been disposed")]
    Disposed,
}

/// Receives every committed frame.
pub trait FrameSink {
    fn present(&mut self, frame: &Frame);
}

impl<F: FnMut(&Frame)> FrameSink for F {
    fn present(&mut self, frame: &Frame) {
        self(frame)
    }
}

/// Configuration for a [`Viewer`].
#[derive(Clone, Debug)]
pub struct ViewerConfig {
    /// Initial render target width in pixels.
    pub width: u32,
    /// Initial render target height in pixels.
    pub height: u32,
    /// Ray-march steps across the box overlap.
    pub num_steps: u32,
    /// Transfer-function lookup entries.
    pub lut_resolution: usize,
    /// Volume sampling of the software backend.
    pub sampling: Sampling,
    /// Yaw increment per animation frame, in degrees.
    pub autorotate_step: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            num_steps: NUM_STEPS,
            lut_resolution: LUT_RESOLUTION,
            sampling: Sampling::Trilinear,
            autorotate_step: 0.5,
        }
    }
}

impl ViewerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.num_steps = steps.max(1);
        self
    }

    pub fn with_lut_resolution(mut self, resolution: usize) -> Self {
        self.lut_resolution = resolution.max(2);
        self
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_autorotate_step(mut self, degrees: f32) -> Self {
        self.autorotate_step = degrees;
        self
    }
}

/// Outcome of a successful volume load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub warnings: Vec<VolumeWarning>,
    pub sampling: Sampling,
}

/// Host-facing pixel surface: its size and the last committed frame.
#[derive(Debug, Default)]
pub struct RenderTarget {
    width: u32,
    height: u32,
    last_frame: Option<Frame>,
}

impl RenderTarget {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }
}

/// Mutable render state read by every draw call.
pub struct RendererState {
    pub camera: CameraState,
    transfer_function: TransferFunction,
    lookup: LookupTable,
    volume: Option<Arc<VolumeDataset>>,
}

impl RendererState {
    pub fn transfer_function(&self) -> &TransferFunction {
        &self.transfer_function
    }

    pub fn lookup(&self) -> &LookupTable {
        &self.lookup
    }

    pub fn volume(&self) -> Option<&VolumeDataset> {
        self.volume.as_deref()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RenderStats {
    pub frames: u64,
    pub last_frame_time: Option<Duration>,
}

/// One interactive viewport: owns the backend, the render state and the
/// target, and re-renders synchronously after every state change.
pub struct Viewer {
    config: ViewerConfig,
    backend: Option<Box<dyn RenderBackend>>,
    state: RendererState,
    target: RenderTarget,
    sink: Option<Box<dyn FrameSink>>,
    animating: bool,
    stats: RenderStats,
}

impl Viewer {
    /// Creates a viewer on the default GPU adapter.
    ///
    /// # Errors
    ///
    /// Fails if no graphics context can be created or the ray-casting shader
    /// does not compile.
    pub async fn new_gpu(config: ViewerConfig) -> Result<Self, ViewerError> {
        let wgpu = WGPU::request().await?;
        Self::from_wgpu(wgpu, config).await
    }

    /// Creates a viewer on an existing device.
    pub async fn from_wgpu(wgpu: WGPU, config: ViewerConfig) -> Result<Self, ViewerError> {
        let renderer = GpuRenderer::new(wgpu, config.width, config.height).await?;
        Self::with_backend(Box::new(renderer), config)
    }

    /// Creates a viewer on the software ray caster.
    pub fn new_cpu(config: ViewerConfig) -> Result<Self, ViewerError> {
        let backend = CpuBackend::new(config.sampling, config.width, config.height);
        Self::with_backend(Box::new(backend), config)
    }

    pub fn with_backend(
        backend: Box<dyn RenderBackend>,
        config: ViewerConfig,
    ) -> Result<Self, ViewerError> {
        let transfer_function = TransferFunction::default();
        let lookup = transfer_function.build_lookup_table(config.lut_resolution)?;
        Ok(Self::assemble(backend, config, transfer_function, lookup))
    }

    fn assemble(
        mut backend: Box<dyn RenderBackend>,
        config: ViewerConfig,
        transfer_function: TransferFunction,
        lookup: LookupTable,
    ) -> Self {
        backend.upload_lookup(&lookup);
        let (width, height) = backend.size();
        Self {
            config,
            backend: Some(backend),
            state: RendererState {
                camera: CameraState::default(),
                transfer_function,
                lookup,
                volume: None,
            },
            target: RenderTarget {
                width,
                height,
                last_frame: None,
            },
            sink: None,
            animating: false,
            stats: RenderStats::default(),
        }
    }

    /// Installs the host surface that receives every committed frame.
    pub fn set_frame_sink(&mut self, sink: impl FrameSink + 'static) {
        self.sink = Some(Box::new(sink));
    }

    fn backend_mut(&mut self) -> Result<&mut (dyn RenderBackend + 'static), ViewerError> {
        self.backend.as_deref_mut().ok_or(ViewerError::Disposed)
    }

    /// Loads a raw Hounsfield buffer, replacing the current volume, and
    /// renders it.
    pub fn load_volume(
        &mut self,
        raw_samples: Vec<i16>,
        dimensions: Dimensions,
        spacing: Spacing,
    ) -> Result<LoadReport, ViewerError> {
        let volume = VolumeDataset::new(raw_samples, dimensions, spacing)?;
        self.load_dataset(volume)
    }

    /// Loads the synthetic sphere volume.
    pub fn load_test_volume(&mut self) -> Result<LoadReport, ViewerError> {
        self.load_dataset(VolumeDataset::test_sphere(TEST_VOLUME_SIZE)?)
    }

    /// Uploads an already validated dataset and renders it.
    pub fn load_dataset(&mut self, volume: VolumeDataset) -> Result<LoadReport, ViewerError> {
        let volume = Arc::new(volume);
        let backend = self.backend_mut()?;
        // drop our handle first so only one dataset stays resident
        backend.release_volume();
        self.state.volume = None;

        let backend = self.backend_mut()?;
        if let Err(e) = backend.upload_volume(&volume) {
            // present the now empty state
            self.rerender();
            return Err(e);
        }
        let sampling = backend.sampling();
        let report = LoadReport {
            warnings: volume.warnings().to_vec(),
            sampling,
        };
        info!("Volume resident, sampling {sampling:?}");
        self.state.volume = Some(volume);
        self.rerender();
        Ok(report)
    }

    /// Replaces the transfer function and rebuilds the lookup table.
    pub fn set_transfer_function(&mut self, transfer_function: TransferFunction) -> Result<(), ViewerError> {
        let lookup = transfer_function.build_lookup_table(self.config.lut_resolution)?;
        self.backend_mut()?.upload_lookup(&lookup);
        self.state.transfer_function = transfer_function;
        self.state.lookup = lookup;
        self.rerender();
        Ok(())
    }

    pub fn apply_preset(&mut self, preset: Preset) {
        info!("Applying transfer function preset {preset}");
        if let Err(e) = self.set_transfer_function(TransferFunction::preset(preset)) {
            error!("Failed to apply preset {preset}: {e}");
        }
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.state.camera.render_mode = mode;
        self.rerender();
    }

    pub fn set_standard_view(&mut self, view: StandardView) {
        self.state.camera.set_standard_view(view);
        self.rerender();
    }

    pub fn reset_camera(&mut self) {
        self.state.camera.reset();
        self.rerender();
    }

    pub fn set_rotation(&mut self, pitch: f32, yaw: f32) {
        self.state.camera.set_rotation(pitch, yaw);
        self.rerender();
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.state.camera.set_zoom(zoom);
        self.rerender();
    }

    /// Pointer drag by `(dx, dy)` pixels.
    pub fn drag(&mut self, dx: f32, dy: f32) {
        self.state.camera.drag(dx, dy);
        self.rerender();
    }

    /// One wheel notch; positive `delta` zooms out.
    pub fn wheel(&mut self, delta: f32) {
        self.state.camera.wheel(delta);
        self.rerender();
    }

    /// Starts or stops autorotation and returns the new running state.
    pub fn toggle_animation(&mut self) -> bool {
        if self.animating {
            self.stop_animation();
        } else if self.backend.is_some() {
            self.animating = true;
            debug!("Autorotation started");
        }
        self.animating
    }

    /// Stops autorotation; a no-op when it is not running.
    pub fn stop_animation(&mut self) {
        if self.animating {
            self.animating = false;
            debug!("Autorotation stopped");
        }
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    /// Per-frame host callback. Advances autorotation and re-renders if it is
    /// running; returns whether a frame was produced.
    pub fn tick(&mut self) -> bool {
        if !self.animating {
            return false;
        }
        self.state.camera.advance_yaw(self.config.autorotate_step);
        self.rerender()
    }

    /// Resizes the render target to the container size and re-renders.
    pub fn resize(&mut self, width: u32, height: u32) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        backend.resize(width, height);
        let (width, height) = backend.size();
        if (width, height) == self.target.size() {
            return;
        }
        debug!("Render target resized to {width}x{height}");
        self.target.width = width;
        self.target.height = height;
        self.rerender();
    }

    /// Renders and presents a frame.
    ///
    /// After [`Self::dispose`] this is a silent no-op returning `Ok(None)`.
    pub fn render(&mut self) -> Result<Option<&Frame>, ViewerError> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(None);
        };
        let start = Instant::now();
        let frame = backend.render(&self.state.camera, self.config.num_steps)?;
        let elapsed = start.elapsed();

        self.stats.frames += 1;
        self.stats.last_frame_time = Some(elapsed);
        debug!(
            "Frame {} ({}x{}) rendered in {:.1} ms",
            self.stats.frames,
            frame.width(),
            frame.height(),
            elapsed.as_secs_f64() * 1000.0
        );

        if let Some(sink) = self.sink.as_mut() {
            sink.present(&frame);
        }
        self.target.last_frame = Some(frame);
        Ok(self.target.last_frame.as_ref())
    }

    fn rerender(&mut self) -> bool {
        match self.render() {
            Ok(frame) => frame.is_some(),
            Err(e) => {
                error!("Render failed: {e}");
                false
            }
        }
    }

    /// PNG encoding of the last committed frame.
    pub fn capture_screenshot(&self) -> Result<Vec<u8>, ViewerError> {
        let frame = self.target.last_frame().ok_or(ViewerError::NoFrame)?;
        let mut bytes = Vec::new();
        frame
            .image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }

    /// Stops autorotation and releases every backend resource. Safe to call
    /// more than once.
    pub fn dispose(&mut self) {
        self.stop_animation();
        if let Some(mut backend) = self.backend.take() {
            backend.release_all();
            self.state.volume = None;
            self.target.last_frame = None;
            info!("Viewer disposed after {} frames", self.stats.frames);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.backend.is_none()
    }

    /// Resources still held by the backend; zero once disposed.
    pub fn live_resources(&self) -> usize {
        self.backend.as_ref().map_or(0, |b| b.live_resources())
    }

    pub fn state(&self) -> &RendererState {
        &self.state
    }

    pub fn camera(&self) -> &CameraState {
        &self.state.camera
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.target.last_frame()
    }

    pub fn sampling(&self) -> Option<Sampling> {
        self.backend.as_ref().map(|b| b.sampling())
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders_clamp_degenerate_values() {
        let config = ViewerConfig::new()
            .with_size(0, 0)
            .with_steps(0)
            .with_lut_resolution(1);
        assert_eq!((config.width, config.height), (1, 1));
        assert_eq!(config.num_steps, 1);
        assert_eq!(config.lut_resolution, 2);
    }

    #[test]
    fn invalid_lookup_resolution_fails_construction() {
        let config = ViewerConfig {
            lut_resolution: 0,
            ..ViewerConfig::default()
        };
        assert!(matches!(
            Viewer::new_cpu(config),
            Err(ViewerError::TransferFunction(_))
        ));
    }

    /// Software backend with a small 3D texture limit.
    struct LimitedBackend {
        inner: CpuBackend,
        limit: u32,
    }

    impl RenderBackend for LimitedBackend {
        fn sampling(&self) -> Sampling {
            self.inner.sampling()
        }

        fn upload_volume(&mut self, volume: &Arc<VolumeDataset>) -> Result<(), ViewerError> {
            let dimensions = volume.dimensions();
            if dimensions.width.max(dimensions.height).max(dimensions.depth) > self.limit {
                return Err(ViewerError::VolumeTooLarge {
                    dimensions,
                    limit: self.limit,
                });
            }
            self.inner.upload_volume(volume)
        }

        fn upload_lookup(&mut self, lookup: &LookupTable) {
            self.inner.upload_lookup(lookup)
        }

        fn release_volume(&mut self) {
            self.inner.release_volume()
        }

        fn resize(&mut self, width: u32, height: u32) {
            self.inner.resize(width, height)
        }

        fn size(&self) -> (u32, u32) {
            self.inner.size()
        }

        fn render(&mut self, camera: &CameraState, num_steps: u32) -> Result<Frame, ViewerError> {
            self.inner.render(camera, num_steps)
        }

        fn release_all(&mut self) {
            self.inner.release_all()
        }

        fn live_resources(&self) -> usize {
            self.inner.live_resources()
        }
    }

    #[test]
    fn failed_upload_presents_test_pattern() {
        let backend = LimitedBackend {
            inner: CpuBackend::new(Sampling::Nearest, 8, 8),
            limit: 16,
        };
        let config = ViewerConfig::default().with_size(8, 8).with_steps(16);
        let mut viewer = Viewer::with_backend(Box::new(backend), config).unwrap();
        viewer.load_dataset(VolumeDataset::test_sphere(16).unwrap()).unwrap();
        assert_ne!(viewer.last_frame(), Some(&Frame::test_pattern(8, 8)));

        let result = viewer.load_dataset(VolumeDataset::test_sphere(32).unwrap());
        assert!(matches!(
            result,
            Err(ViewerError::VolumeTooLarge { limit: 16, .. })
        ));
        assert!(viewer.state().volume().is_none());
        assert_eq!(viewer.last_frame(), Some(&Frame::test_pattern(8, 8)));
        assert_eq!(viewer.stats().frames, 2);
    }

    #[test]
    fn dispose_releases_backend() {
        let mut viewer = Viewer::new_cpu(ViewerConfig::default().with_size(4, 4)).unwrap();
        viewer.load_test_volume().unwrap();
        assert_eq!(viewer.live_resources(), 3);
        viewer.dispose();
        assert_eq!(viewer.live_resources(), 0);
        assert!(viewer.sampling().is_none());
    }
}
