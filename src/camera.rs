use crate::enums::{RenderMode, StandardView};

use glam::{Mat3, Vec3};

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 5.0;
pub const MAX_PITCH: f32 = 89.0;

/// Degrees of rotation per pixel of drag.
pub const DRAG_SENSITIVITY: f32 = 0.5;
const WHEEL_ZOOM_OUT: f32 = 0.9;
const WHEEL_ZOOM_IN: f32 = 1.1;

pub const DEFAULT_PITCH: f32 = -20.0;
pub const DEFAULT_YAW: f32 = 30.0;

/// Orbit camera: pitch around local X, yaw around local Y, both in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pitch: f32,
    yaw: f32,
    zoom: f32,
    pub render_mode: RenderMode,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            pitch: DEFAULT_PITCH,
            yaw: DEFAULT_YAW,
            zoom: 1.0,
            render_mode: RenderMode::default(),
        }
    }
}

impl CameraState {
    /// `(pitch, yaw)` in degrees.
    pub fn rotation(&self) -> (f32, f32) {
        (self.pitch, self.yaw)
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Sets the orientation directly, clamping pitch.
    pub fn set_rotation(&mut self, pitch: f32, yaw: f32) {
        self.pitch = pitch.clamp(-MAX_PITCH, MAX_PITCH);
        self.yaw = yaw;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        // NaN falls back to the default rather than poisoning every ray
        self.zoom = if zoom.is_nan() {
            1.0
        } else {
            zoom.clamp(MIN_ZOOM, MAX_ZOOM)
        };
    }

    /// Applies a pointer drag of `(dx, dy)` pixels.
    pub fn drag(&mut self, dx: f32, dy: f32) {
        self.set_rotation(
            self.pitch + dy * DRAG_SENSITIVITY,
            self.yaw + dx * DRAG_SENSITIVITY,
        );
    }

    /// One wheel notch. Positive `delta` (scrolling down) zooms out.
    pub fn wheel(&mut self, delta: f32) {
        if delta > 0.0 {
            self.set_zoom(self.zoom * WHEEL_ZOOM_OUT);
        } else if delta < 0.0 {
            self.set_zoom(self.zoom * WHEEL_ZOOM_IN);
        }
    }

    /// Snaps to a named view. The presets are exact and bypass the drag
    /// pitch clamp (superior/inferior look straight down the Y axis).
    pub fn set_standard_view(&mut self, view: StandardView) {
        let (pitch, yaw) = view.rotation();
        self.pitch = pitch;
        self.yaw = yaw;
    }

    pub fn advance_yaw(&mut self, degrees: f32) {
        self.yaw = (self.yaw + degrees) % 360.0;
    }

    /// Restores rotation and zoom to the initial defaults; the render mode is kept.
    pub fn reset(&mut self) {
        self.pitch = DEFAULT_PITCH;
        self.yaw = DEFAULT_YAW;
        self.zoom = 1.0;
    }

    /// World-from-camera rotation: pitch is applied first, then yaw.
    pub fn rotation_matrix(&self) -> Mat3 {
        Mat3::from_rotation_y(self.yaw.to_radians()) * Mat3::from_rotation_x(self.pitch.to_radians())
    }

    /// Constant ray direction for the orthographic projection.
    pub fn view_direction(&self) -> Vec3 {
        self.rotation_matrix() * Vec3::NEG_Z
    }
}
