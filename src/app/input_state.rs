use glam::Vec2;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use crate::renderer::camera::{Camera, CameraMove};

/// Maps WASD (by physical position, so it works on any layout) to camera movement
pub fn camera_move_for(key: PhysicalKey) -> Option<CameraMove> {
    match key {
        PhysicalKey::Code(KeyCode::KeyW) => Some(CameraMove::Forward),
        PhysicalKey::Code(KeyCode::KeyS) => Some(CameraMove::Back),
        PhysicalKey::Code(KeyCode::KeyA) => Some(CameraMove::Left),
        PhysicalKey::Code(KeyCode::KeyD) => Some(CameraMove::Right),
        _ => None,
    }
}

#[derive(Default)]
pub struct InputState {
    /// Cursor is grabbed and hidden while the right mouse button is held
    pub mouse_right_down: bool,
    pub mouse_right_just_pressed: bool,
    pub mouse_right_just_released: bool,
    /// Raw motion accumulated since the last `apply_to`
    pub mouse_delta: Vec2,
}

impl InputState {
    /// Feeds a window event to the camera. Returns true if the event was consumed.
    pub fn process_window_event(&mut self, event: &WindowEvent, camera: &mut Camera) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                let Some(movement) = camera_move_for(event.physical_key) else {
                    return false;
                };
                camera.process_key(movement, event.state == ElementState::Pressed);
                true
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                match state {
                    ElementState::Pressed => {
                        self.mouse_right_just_pressed = !self.mouse_right_down;
                        self.mouse_right_down = true;
                    }
                    ElementState::Released => {
                        self.mouse_right_just_released = self.mouse_right_down;
                        self.mouse_right_down = false;
                    }
                }
                true
            }
            WindowEvent::Focused(false) => {
                self.mouse_right_just_released = self.mouse_right_down;
                self.mouse_right_down = false;
                false
            }
            _ => false,
        }
    }

    /// Raw device motion, only counted while the cursor is captured
    pub fn process_mouse_motion(&mut self, dx: f64, dy: f64) {
        if self.mouse_right_down {
            self.mouse_delta += Vec2::new(dx as f32, dy as f32);
        }
    }

    /// Turns the accumulated motion into camera rotation
    pub fn apply_to(&mut self, camera: &mut Camera) {
        if self.mouse_delta != Vec2::ZERO {
            camera.process_mouse_delta(self.mouse_delta.x, self.mouse_delta.y);
        }
        self.mouse_delta = Vec2::ZERO;
    }

    /// Reset the edge-triggered states for the next frame.
    pub fn reset_frame(&mut self) {
        self.mouse_right_just_pressed = false;
        self.mouse_right_just_released = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasd_maps_to_camera_moves() {
        assert_eq!(camera_move_for(PhysicalKey::Code(KeyCode::KeyW)), Some(CameraMove::Forward));
        assert_eq!(camera_move_for(PhysicalKey::Code(KeyCode::KeyD)), Some(CameraMove::Right));
        assert_eq!(camera_move_for(PhysicalKey::Code(KeyCode::KeyE)), None);
    }

    #[test]
    fn motion_only_counts_while_captured() {
        let mut input = InputState::default();
        let mut camera = Camera::default();

        input.process_mouse_motion(100.0, 0.0);
        input.apply_to(&mut camera);
        assert_eq!(camera.yaw, 0.0);

        input.mouse_right_down = true;
        input.process_mouse_motion(100.0, 50.0);
        input.process_mouse_motion(100.0, 50.0);
        input.apply_to(&mut camera);
        assert!((camera.yaw - 0.2).abs() < 1e-6);
        assert!((camera.pitch + 0.1).abs() < 1e-6);
        assert_eq!(input.mouse_delta, Vec2::ZERO);
    }
}
