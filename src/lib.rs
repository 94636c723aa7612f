//! # HU ray-casting library
//!
//! This crate renders CT/MR volumes of Hounsfield units with a single-pass
//! ray caster. A volume is uploaded once as a 3D texture; every frame a
//! compute shader casts one orthographic ray per pixel through the volume's
//! bounding box and composites it in one of three modes:
//!  - Volume rendering (front-to-back alpha compositing with Blinn-Phong
//!    shading)
//!  - Maximum intensity projection
//!  - Minimum intensity projection
//!
//! Colors and opacities come from a transfer function, baked into a 256-entry
//! lookup table. Four presets ship with the crate (`ct-bone`,
//! `ct-soft-tissue`, `ct-lung`, `mip`).
//!
//! The [`Viewer`] owns the camera, the transfer function and the GPU
//! resources, re-renders after every state change and hands each frame to a
//! host-provided [`FrameSink`]. A software backend with the same algorithm
//! is available for machines without a GPU and is used as the reference in
//! tests.
//!
//! Volumes can be loaded from raw samples, from the built-in test sphere or
//! from a folder of DICOM files. DICOM files are assumed to have the following
//! attributes:
//!   - Axial data set
//!   - No multiframe (always the first frame is used)
//!   - Images from the same series
//!
//! # Examples
//!
//! ## Rendering a DICOM series
//!
//! ```no_run
//! # use hu_raycast::{Preset, SortBy, StandardView, Viewer, ViewerConfig, VolumeLoader};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let volume = VolumeLoader::load_from_directory("dicom", SortBy::ImagePositionPatient)?;
//! let mut viewer = Viewer::new_gpu(ViewerConfig::default()).await?;
//! viewer.load_dataset(volume)?;
//! viewer.apply_preset(Preset::CtBone);
//! viewer.set_standard_view(StandardView::Anterior);
//! std::fs::write("result.png", viewer.capture_screenshot()?)?;
//! viewer.dispose();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod camera;
pub mod enums;
pub mod gpu_renderer;
mod interpolator;
pub mod raycast;
pub mod transfer_function;
pub mod viewer;
pub mod volume;
pub mod volume_loader;

pub use backend::{CpuBackend, RenderBackend};
pub use camera::CameraState;
pub use enums::{Preset, RenderMode, Sampling, SortBy, StandardView};
pub use raycast::Frame;
pub use transfer_function::{ColorPoint, LookupTable, OpacityPoint, TransferFunction};
pub use viewer::{FrameSink, LoadReport, Viewer, ViewerConfig, ViewerError};
pub use volume::{Dimensions, Spacing, VolumeDataset, VolumeWarning};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
