use std::borrow::Cow;
use std::sync::Arc;

use glam::Mat4;
use half::f16;
use log::{debug, info, warn};
use wgpu::PollType;

use crate::backend::RenderBackend;
use crate::camera::CameraState;
use crate::enums::Sampling;
use crate::raycast::{Frame, RaySetup};
use crate::transfer_function::LookupTable;
use crate::viewer::ViewerError;
use crate::volume::VolumeDataset;

const WORKGROUP_SIZE: u32 = 8;

pub struct WGPU {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl WGPU {
    /// Requests an adapter and device, enabling filtered sampling of
    /// floating-point textures when the adapter offers it.
    ///
    /// # Errors
    ///
    /// Returns [`ViewerError::ContextCreation`] if no adapter or device is
    /// available.
    pub async fn request() -> Result<Self, ViewerError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ViewerError::ContextCreation(e.to_string()))?;

        let info = adapter.get_info();
        info!("Using adapter {} ({:?})", info.name, info.backend);

        let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Raycast Device"),
                required_features,
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                ..Default::default()
            })
            .await
            .map_err(|e| ViewerError::ContextCreation(e.to_string()))?;

        Ok(Self { device, queue })
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    rotation: [[f32; 4]; 4],
    box_size: [f32; 4],
    output_width: u32,
    output_height: u32,
    render_mode: u32,
    num_steps: u32,
    zoom: f32,
    _padding: [f32; 3],
}

impl From<&RaySetup> for Uniforms {
    fn from(setup: &RaySetup) -> Self {
        Self {
            rotation: Mat4::from_mat3(setup.rotation).to_cols_array_2d(),
            box_size: setup.box_size.extend(0.0).to_array(),
            output_width: setup.width,
            output_height: setup.height,
            render_mode: setup.mode as u32,
            num_steps: setup.num_steps,
            zoom: setup.zoom,
            _padding: [0.0; 3],
        }
    }
}

struct VolumeTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    volume: Arc<VolumeDataset>,
}

struct LutTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    resolution: u32,
}

/// Output storage buffers sized to the current render target.
struct GpuTarget {
    width: u32,
    height: u32,
    pixel_buffer: wgpu::Buffer,
    ray_value_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
}

impl GpuTarget {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let plane_size = Self::plane_size(width, height);
        let storage = |label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: plane_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let pixel_buffer = storage("Pixel Buffer");
        let ray_value_buffer = storage("Ray Value Buffer");
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: plane_size * 2,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            width,
            height,
            pixel_buffer,
            ray_value_buffer,
            staging_buffer,
        }
    }

    /// Bytes per plane: one `u32` / `f32` per pixel.
    fn plane_size(width: u32, height: u32) -> u64 {
        (width as u64 * height as u64 * std::mem::size_of::<u32>() as u64).max(4)
    }

    fn destroy(&self) {
        self.pixel_buffer.destroy();
        self.ray_value_buffer.destroy();
        self.staging_buffer.destroy();
    }
}

/// Compute-shader ray caster. Owns every GPU resource the renderer uses.
pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampling: Sampling,
    volume_sampler: wgpu::Sampler,
    lut_sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    volume: Option<VolumeTexture>,
    lut: Option<LutTexture>,
    target: Option<GpuTarget>,
}

impl GpuRenderer {
    /// Compiles the ray-casting pipeline and allocates a `width × height`
    /// target.
    ///
    /// # Errors
    ///
    /// Returns [`ViewerError::Shader`] if shader compilation or pipeline
    /// creation reports a validation error.
    pub async fn new(wgpu: WGPU, width: u32, height: u32) -> Result<Self, ViewerError> {
        let WGPU { device, queue } = wgpu;

        let sampling = if device.features().contains(wgpu::Features::FLOAT32_FILTERABLE) {
            Sampling::Trilinear
        } else {
            warn!("Float32 texture filtering unsupported, falling back to nearest-neighbor sampling");
            Sampling::Nearest
        };
        let filterable = sampling == Sampling::Trilinear;
        let volume_filter = if filterable {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };

        let volume_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Volume Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: volume_filter,
            min_filter: volume_filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let lut_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Transfer Function Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Raycast Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("shaders/raycast.wgsl"))),
        });

        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Raycast Bind Group Layout"),
            entries: &[
                // Volume 3D texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(if filterable {
                        wgpu::SamplerBindingType::Filtering
                    } else {
                        wgpu::SamplerBindingType::NonFiltering
                    }),
                    count: None,
                },
                // Transfer function lookup
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // Uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Packed RGBA8 pixels and per-pixel ray values
                storage_entry(5),
                storage_entry(6),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Raycast Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Raycast Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(error) = device.pop_error_scope().await {
            return Err(ViewerError::Shader(error.to_string()));
        }

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Buffer"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let target = GpuTarget::new(&device, width.max(1), height.max(1));
        info!("GPU ray caster ready ({sampling:?} sampling)");

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampling,
            volume_sampler,
            lut_sampler,
            uniform_buffer,
            volume: None,
            lut: None,
            target: Some(target),
        })
    }

    fn create_volume_texture(&self, volume: &Arc<VolumeDataset>) -> Result<VolumeTexture, ViewerError> {
        let dims = volume.dimensions();
        let max_dim = self.device.limits().max_texture_dimension_3d;
        if dims.width.max(dims.height).max(dims.depth) > max_dim {
            return Err(ViewerError::VolumeTooLarge {
                dimensions: dims,
                limit: max_dim,
            });
        }

        let texture_size = wgpu::Extent3d {
            width: dims.width,
            height: dims.height,
            depth_or_array_layers: dims.depth,
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Volume 3D Texture"),
            size: texture_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(volume.normalized_samples()),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(dims.width * std::mem::size_of::<f32>() as u32),
                rows_per_image: Some(dims.height),
            },
            texture_size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(VolumeTexture {
            texture,
            view,
            volume: Arc::clone(volume),
        })
    }

    fn write_lookup(&mut self, lookup: &LookupTable) {
        let resolution = lookup.resolution() as u32;
        let size = wgpu::Extent3d {
            width: resolution,
            height: 1,
            depth_or_array_layers: 1,
        };

        // Rgba16Float is filterable everywhere, Rgba32Float is not
        if self.lut.as_ref().is_none_or(|lut| lut.resolution != resolution) {
            if let Some(old) = self.lut.take() {
                old.texture.destroy();
            }
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Transfer Function Texture"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba16Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.lut = Some(LutTexture {
                texture,
                view,
                resolution,
            });
        }

        let Some(lut) = self.lut.as_ref() else {
            return;
        };
        let texels: Vec<f16> = lookup.to_rgba_f32().into_iter().map(f16::from_f32).collect();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &lut.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(resolution * 4 * std::mem::size_of::<f16>() as u32),
                rows_per_image: Some(1),
            },
            size,
        );
    }

    fn read_back(&self, target: &GpuTarget) -> Result<(Vec<u8>, Vec<f32>), ViewerError> {
        let plane_size = GpuTarget::plane_size(target.width, target.height);
        let buffer_slice = target.staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| ViewerError::Readback(e.to_string()))?;
        futures::executor::block_on(receiver)
            .map_err(|e| ViewerError::Readback(e.to_string()))?
            .map_err(|e| ViewerError::Readback(e.to_string()))?;

        let pixel_count = (target.width * target.height) as usize;
        let result = {
            let data = buffer_slice.get_mapped_range();
            let (pixel_bytes, value_bytes) = data.split_at(plane_size as usize);
            let pixels = pixel_bytes[..pixel_count * 4].to_vec();
            let ray_values: Vec<f32> = bytemuck::pod_collect_to_vec(&value_bytes[..pixel_count * 4]);
            (pixels, ray_values)
        };
        target.staging_buffer.unmap();
        Ok(result)
    }
}

impl RenderBackend for GpuRenderer {
    fn sampling(&self) -> Sampling {
        self.sampling
    }

    fn upload_volume(&mut self, volume: &Arc<VolumeDataset>) -> Result<(), ViewerError> {
        self.release_volume();
        let uploaded = self.create_volume_texture(volume)?;
        let dims = volume.dimensions();
        info!(
            "Uploaded {}x{}x{} R32Float volume texture",
            dims.width, dims.height, dims.depth
        );
        self.volume = Some(uploaded);
        Ok(())
    }

    fn upload_lookup(&mut self, lookup: &LookupTable) {
        self.write_lookup(lookup);
    }

    fn release_volume(&mut self) {
        if let Some(old) = self.volume.take() {
            old.texture.destroy();
            debug!("Released volume texture");
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if self
            .target
            .as_ref()
            .is_some_and(|t| t.width == width && t.height == height)
        {
            return;
        }
        if let Some(old) = self.target.take() {
            old.destroy();
        }
        self.target = Some(GpuTarget::new(&self.device, width, height));
    }

    fn size(&self) -> (u32, u32) {
        self.target.as_ref().map_or((0, 0), |t| (t.width, t.height))
    }

    fn render(&mut self, camera: &CameraState, num_steps: u32) -> Result<Frame, ViewerError> {
        let Some(target) = self.target.as_ref() else {
            return Err(ViewerError::Disposed);
        };
        let (Some(volume), Some(lut)) = (self.volume.as_ref(), self.lut.as_ref()) else {
            return Ok(Frame::test_pattern(target.width, target.height));
        };

        let setup = RaySetup::new(camera, volume.volume.box_size(), target.width, target.height, num_steps);
        let uniforms = Uniforms::from(&setup);
        debug!(
            "Dispatching {}x{} rays, mode {:?}, box {}",
            setup.width, setup.height, setup.mode, setup.box_size
        );
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Raycast Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&volume.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.volume_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&lut.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.lut_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: target.pixel_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: target.ray_value_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Raycast Encoder"),
            });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Raycast Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            let dispatch_x = target.width.div_ceil(WORKGROUP_SIZE);
            let dispatch_y = target.height.div_ceil(WORKGROUP_SIZE);
            compute_pass.dispatch_workgroups(dispatch_x, dispatch_y, 1);
        }
        let plane_size = GpuTarget::plane_size(target.width, target.height);
        encoder.copy_buffer_to_buffer(&target.pixel_buffer, 0, &target.staging_buffer, 0, plane_size);
        encoder.copy_buffer_to_buffer(
            &target.ray_value_buffer,
            0,
            &target.staging_buffer,
            plane_size,
            plane_size,
        );
        self.queue.submit(Some(encoder.finish()));

        let (pixels, ray_values) = self.read_back(target)?;
        Ok(Frame::from_parts(target.width, target.height, pixels, ray_values))
    }

    fn release_all(&mut self) {
        self.release_volume();
        if let Some(lut) = self.lut.take() {
            lut.texture.destroy();
        }
        if let Some(target) = self.target.take() {
            target.destroy();
        }
        self.uniform_buffer.destroy();
        info!("Released GPU ray caster resources");
    }

    fn live_resources(&self) -> usize {
        usize::from(self.volume.is_some()) + usize::from(self.lut.is_some()) + usize::from(self.target.is_some())
    }
}
