use glam::{Mat4, Quat, Vec3, Vec4Swizzles};

/// Units per update the camera moves while a movement key is held
pub const CAMERA_SPEED: f32 = 0.3;
/// Pixels of cursor travel per radian of rotation
const MOUSE_SENSITIVITY: f32 = 1000.0;

const FOV_Y_DEG: f32 = 70.0;
// Reversed depth: the near plane maps to 1, the far plane to 0
const NEAR: f32 = 10000.0;
const FAR: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMove {
    Forward,
    Back,
    Left,
    Right,
}

/// First-person fly camera
#[derive(Debug, Clone, Default)]
pub struct Camera {
    pub position: Vec3,
    /// In camera space; -Z is forward
    pub velocity: Vec3,
    pub pitch: f32,
    pub yaw: f32,
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn process_key(&mut self, movement: CameraMove, pressed: bool) {
        let speed = if pressed { CAMERA_SPEED } else { 0.0 };
        match movement {
            CameraMove::Forward => self.velocity.z = -speed,
            CameraMove::Back => self.velocity.z = speed,
            CameraMove::Left => self.velocity.x = -speed,
            CameraMove::Right => self.velocity.x = speed,
        }
    }

    /// `dx`/`dy` are cursor travel in pixels since the last event
    pub fn process_mouse_delta(&mut self, dx: f32, dy: f32) {
        self.yaw += dx / MOUSE_SENSITIVITY;
        self.pitch -= dy / MOUSE_SENSITIVITY;
    }

    pub fn update(&mut self) {
        let rotation = self.rotation_matrix();
        self.position += (rotation * (self.velocity * 0.5).extend(0.0)).xyz();
    }

    pub fn rotation_matrix(&self) -> Mat4 {
        let pitch_rotation = Quat::from_axis_angle(Vec3::X, self.pitch);
        let yaw_rotation = Quat::from_axis_angle(Vec3::NEG_Y, self.yaw);
        Mat4::from_quat(yaw_rotation) * Mat4::from_quat(pitch_rotation)
    }

    /// Moves the world opposite to the camera
    pub fn view_matrix(&self) -> Mat4 {
        (Mat4::from_translation(self.position) * self.rotation_matrix()).inverse()
    }

    /// Reversed-Z perspective with Y flipped for Vulkan's downward clip-space Y
    pub fn projection(aspect_ratio: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(FOV_Y_DEG.to_radians(), aspect_ratio, NEAR, FAR);
        proj.y_axis.y *= -1.0;
        proj
    }
}
