use glam::{Mat4, Vec3};

/// Orbit camera used by the preview viewport.
///
/// The camera is a plain value: the UI owns it and hands a reference to the
/// viewport every frame. The aspect ratio is not stored here because it
/// belongs to the render target, which may be resized independently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Create a new camera
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y: 55.0_f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }

    /// Get the view matrix (world → camera space)
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix (camera → clip space) for an aspect ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect.max(f32::EPSILON), self.near, self.far)
    }

    /// Distance from the eye to the orbit target
    pub fn distance(&self) -> f32 {
        (self.position - self.target).length()
    }

    /// Rotate the eye around the target.
    ///
    /// `delta_yaw` spins around the world up axis, `delta_pitch` tilts towards
    /// the poles. Pitch is clamped just short of straight up/down so the view
    /// matrix never degenerates.
    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        let offset = self.position - self.target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }

        let mut yaw = offset.x.atan2(offset.z);
        let mut pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();

        yaw += delta_yaw;
        let limit = std::f32::consts::FRAC_PI_2 - 0.01;
        pitch = (pitch + delta_pitch).clamp(-limit, limit);

        let dir = Vec3::new(
            pitch.cos() * yaw.sin(),
            pitch.sin(),
            pitch.cos() * yaw.cos(),
        );
        self.position = self.target + dir * radius;
    }

    /// Move the eye towards (negative) or away from (positive) the target
    pub fn dolly(&mut self, amount: f32) {
        let offset = self.position - self.target;
        let radius = (offset.length() + amount).max(self.near * 2.0);
        self.position = self.target + offset.try_normalize().unwrap_or(Vec3::Z) * radius;
    }

    /// Aim at the centre of a bounding box and back off so it fits the view.
    pub fn frame_bounds(&mut self, min: Vec3, max: Vec3) {
        let center = (min + max) * 0.5;
        let size = (max - min).length().max(f32::EPSILON);
        let distance = size * 1.5;

        let dir = (self.position - self.target).try_normalize().unwrap_or(Vec3::Z);
        self.target = center;
        self.position = center + dir * distance;
        self.near = distance * 0.01;
        self.far = distance * 20.0;
    }
}

/// Camera matrices for one frame, handed to the viewport by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
}

impl Camera {
    /// Snapshot the matrices for a target of the given aspect ratio
    pub fn state(&self, aspect: f32) -> CameraState {
        CameraState {
            view: self.view_matrix(),
            projection: self.projection_matrix(aspect),
            position: self.position,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(2.5, 2.0, 1.5), Vec3::ZERO)
    }
}
