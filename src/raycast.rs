//! Ray-casting kernel.
//!
//! This is the CPU rendition of `shaders/raycast.wgsl`; both implement the
//! same per-pixel algorithm with the same constants:
//!
//! 1. an orthographic ray per pixel, rotated by the camera (pitch, then yaw),
//! 2. a slab test against the volume box normalized to a longest side of 1,
//! 3. a fixed number of steps across the overlap,
//! 4. front-to-back compositing with Blinn-Phong shading (VR) or a running
//!    maximum/minimum (MIP/MinIP).
//!
//! The tuning constants below are empirical visibility settings for an
//! interactive preview, not physical quantities.

use crate::camera::CameraState;
use crate::enums::{RenderMode, Sampling};
use crate::transfer_function::LookupTable;
use crate::volume::VolumeDataset;

use glam::{Mat3, Vec3};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;

pub const NUM_STEPS: u32 = 512;
pub const OPACITY_BOOST: f32 = 150.0;
pub const MAX_SAMPLE_OPACITY: f32 = 0.95;
pub const SHADING_THRESHOLD: f32 = 0.01;
pub const GRADIENT_STEP_SCALE: f32 = 2.0;
pub const LIGHT_DIRECTION: Vec3 = Vec3::new(0.5, 0.8, 1.0);
pub const AMBIENT: f32 = 0.35;
pub const DIFFUSE: f32 = 0.65;
pub const SPECULAR: f32 = 0.2;
pub const SHININESS: f32 = 32.0;
pub const EARLY_TERMINATION_ALPHA: f32 = 0.99;
pub const EMPTY_ALPHA: f32 = 0.01;
pub const EMPTY_MIP: f32 = 0.001;
pub const MINIP_NOISE_FLOOR: f32 = 0.02;
pub const MIP_GAMMA: f32 = 0.7;
/// Distance of the ray-origin plane from the box center at zoom 1.
pub const CAMERA_DISTANCE: f32 = 2.0;

pub const BACKGROUND: Vec3 = Vec3::new(0.05, 0.05, 0.08);
/// Added to the background, scaled by the normalized box-overlap length, for
/// rays that cross the volume without hitting anything visible.
pub const DIAGNOSTIC_TINT: Vec3 = Vec3::new(0.02, 0.05, 0.10);

const TEST_PATTERN_CELL: u32 = 32;
const TEST_PATTERN_DARK: u8 = 31;
const TEST_PATTERN_LIGHT: u8 = 46;

/// Everything a draw call reads. Passed explicitly to each backend.
pub struct Scene<'a> {
    pub volume: Option<&'a VolumeDataset>,
    pub lookup: &'a LookupTable,
    pub camera: &'a CameraState,
    pub num_steps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Per-frame ray generation parameters.
#[derive(Debug, Clone, Copy)]
pub struct RaySetup {
    pub rotation: Mat3,
    pub box_size: Vec3,
    pub zoom: f32,
    pub width: u32,
    pub height: u32,
    pub num_steps: u32,
    pub mode: RenderMode,
}

impl RaySetup {
    pub fn new(camera: &CameraState, box_size: Vec3, width: u32, height: u32, num_steps: u32) -> Self {
        Self {
            rotation: camera.rotation_matrix(),
            box_size,
            zoom: camera.zoom(),
            width: width.max(1),
            height: height.max(1),
            num_steps: num_steps.max(1),
            mode: camera.render_mode,
        }
    }

    /// Orthographic ray through the center of pixel `(x, y)`; row 0 is the top.
    pub fn ray(&self, x: u32, y: u32) -> Ray {
        let aspect = self.width as f32 / self.height as f32;
        let u = ((x as f32 + 0.5) / self.width as f32 * 2.0 - 1.0) * aspect;
        let v = 1.0 - (y as f32 + 0.5) / self.height as f32 * 2.0;
        let origin = Vec3::new(u, v, CAMERA_DISTANCE) / self.zoom;
        Ray {
            origin: self.rotation * origin,
            direction: self.rotation * Vec3::NEG_Z,
        }
    }
}

/// Slab test against the axis-aligned box `[-half, half]`.
///
/// Returns `(t_near, t_far)` if the ray overlaps the box in front of its
/// origin, `None` otherwise.
pub fn intersect_box(ray: &Ray, half: Vec3) -> Option<(f32, f32)> {
    let dir = Vec3::select(ray.direction.abs().cmplt(Vec3::splat(1e-8)), Vec3::splat(1e-8), ray.direction);
    let inv = dir.recip();
    let t0 = (-half - ray.origin) * inv;
    let t1 = (half - ray.origin) * inv;
    let t_near = t0.min(t1).max_element();
    let t_far = t0.max(t1).min_element();
    if t_near > t_far || t_far < 0.0 {
        None
    } else {
        Some((t_near, t_far))
    }
}

/// Result of tracing one ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayResult {
    pub color: Vec3,
    /// Accumulated opacity (VR) or projected normalized intensity (MIP/MinIP).
    pub value: f32,
}

impl RayResult {
    const MISS: RayResult = RayResult {
        color: BACKGROUND,
        value: 0.0,
    };
}

fn diagnostic_tint(span: f32) -> Vec3 {
    BACKGROUND + DIAGNOSTIC_TINT * (span / 3f32.sqrt()).clamp(0.0, 1.0)
}

/// Traces a single ray. `sample` reads the normalized field at texture
/// coordinates; it is never called when the ray misses the box.
pub fn trace_ray(
    setup: &RaySetup,
    ray: &Ray,
    lookup: &LookupTable,
    sample: impl Fn(Vec3) -> f32,
) -> RayResult {
    let Some((t_near, t_far)) = intersect_box(ray, setup.box_size * 0.5) else {
        return RayResult::MISS;
    };

    let t_start = t_near.max(0.0);
    let span = t_far - t_start;
    let step = span / setup.num_steps as f32;
    let to_coord = |pos: Vec3| pos / setup.box_size + 0.5;
    let position = |i: u32| ray.origin + ray.direction * (t_start + (i as f32 + 0.5) * step);

    match setup.mode {
        RenderMode::VolumeRendering => {
            let light = LIGHT_DIRECTION.normalize();
            let view = -ray.direction;
            let h = setup.box_size.max_element() / setup.num_steps as f32 * GRADIENT_STEP_SCALE;

            let mut accum_color = Vec3::ZERO;
            let mut accum_alpha = 0.0f32;
            for i in 0..setup.num_steps {
                let pos = position(i);
                let value = sample(to_coord(pos));
                let rgba = lookup.sample(value);
                let alpha = (rgba.w * step * OPACITY_BOOST).clamp(0.0, MAX_SAMPLE_OPACITY);
                if alpha <= SHADING_THRESHOLD {
                    continue;
                }

                let gradient = Vec3::new(
                    sample(to_coord(pos + Vec3::X * h)) - sample(to_coord(pos - Vec3::X * h)),
                    sample(to_coord(pos + Vec3::Y * h)) - sample(to_coord(pos - Vec3::Y * h)),
                    sample(to_coord(pos + Vec3::Z * h)) - sample(to_coord(pos - Vec3::Z * h)),
                );
                // outward normal points from dense material towards air
                let normal = if gradient.length() < 1e-6 {
                    Vec3::Z
                } else {
                    -gradient.normalize()
                };
                let diffuse = normal.dot(light).max(0.0);
                let half_vector = (light + view).normalize();
                let specular = normal.dot(half_vector).max(0.0).powf(SHININESS);
                let shaded = rgba.truncate() * (AMBIENT + DIFFUSE * diffuse) + Vec3::splat(SPECULAR * specular);

                accum_color += (1.0 - accum_alpha) * shaded * alpha;
                accum_alpha += (1.0 - accum_alpha) * alpha;
                if accum_alpha > EARLY_TERMINATION_ALPHA {
                    break;
                }
            }

            if accum_alpha < EMPTY_ALPHA {
                RayResult {
                    color: diagnostic_tint(span),
                    value: accum_alpha,
                }
            } else {
                RayResult {
                    color: accum_color + (1.0 - accum_alpha) * BACKGROUND,
                    value: accum_alpha,
                }
            }
        }
        RenderMode::MaximumIntensityProjection => {
            let max_value = (0..setup.num_steps)
                .map(|i| sample(to_coord(position(i))))
                .fold(0.0f32, f32::max);
            if max_value < EMPTY_MIP {
                RayResult {
                    color: diagnostic_tint(span),
                    value: max_value,
                }
            } else {
                RayResult {
                    color: Vec3::splat(max_value.powf(MIP_GAMMA)),
                    value: max_value,
                }
            }
        }
        RenderMode::MinimumIntensityProjection => {
            let min_value = (0..setup.num_steps)
                .map(|i| sample(to_coord(position(i))))
                .filter(|&v| v >= MINIP_NOISE_FLOOR)
                .reduce(f32::min)
                .unwrap_or(0.0);
            RayResult {
                color: Vec3::splat(min_value),
                value: min_value,
            }
        }
    }
}

/// A rendered image plus the per-pixel ray values that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: RgbaImage,
    pub ray_values: Vec<f32>,
}

impl Frame {
    pub(crate) fn from_parts(width: u32, height: u32, pixels: Vec<u8>, ray_values: Vec<f32>) -> Self {
        let image = ImageBuffer::from_raw(width, height, pixels)
            .unwrap_or_else(|| RgbaImage::new(width, height));
        Self { image, ray_values }
    }

    /// Checkerboard shown when no volume is bound.
    pub fn test_pattern(width: u32, height: u32) -> Self {
        let image = ImageBuffer::from_fn(width, height, |x, y| {
            let light = ((x / TEST_PATTERN_CELL) + (y / TEST_PATTERN_CELL)) % 2 == 1;
            let v = if light { TEST_PATTERN_LIGHT } else { TEST_PATTERN_DARK };
            Rgba([v, v, v, 255])
        });
        Self {
            image,
            ray_values: vec![0.0; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Ray value at `(x, y)`, or `None` outside the frame.
    pub fn ray_value(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        self.ray_values.get((y * self.width() + x) as usize).copied()
    }
}

/// Quantizes a linear color the way `pack4x8unorm` does.
#[inline]
pub fn to_rgba8(color: Vec3) -> [u8; 4] {
    let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(color.x), q(color.y), q(color.z), 255]
}

/// Row-parallel software ray caster.
pub struct CpuRaycaster {
    pub sampling: Sampling,
}

impl CpuRaycaster {
    pub fn new(sampling: Sampling) -> Self {
        Self { sampling }
    }

    pub fn render(&self, scene: &Scene<'_>, width: u32, height: u32) -> Frame {
        let Some(volume) = scene.volume else {
            return Frame::test_pattern(width, height);
        };
        let setup = RaySetup::new(scene.camera, volume.box_size(), width, height, scene.num_steps);
        let sampling = self.sampling;

        let traced: Vec<([u8; 4], f32)> = (0..height)
            .into_par_iter()
            .flat_map(|y| {
                (0..width)
                    .map(|x| {
                        let ray = setup.ray(x, y);
                        let result = trace_ray(&setup, &ray, scene.lookup, |coord| volume.sample(coord, sampling));
                        (to_rgba8(result.color), result.value)
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let (pixels, ray_values): (Vec<[u8; 4]>, Vec<f32>) = traced.into_iter().unzip();
        Frame::from_parts(width, height, pixels.into_iter().flatten().collect(), ray_values)
    }
}
