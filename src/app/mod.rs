mod input_state;

use std::sync::Arc;
use color_eyre::{Report, Result};
use glam::Vec3;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{CursorGrabMode, Window, WindowId};
use crate::app::input_state::InputState;
use crate::renderer::camera::Camera;
use crate::renderer::config::RenderConfig;
use crate::renderer::Renderer;

pub struct App {
    config: RenderConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    camera: Camera,

    // State
    input_state: InputState,
    request_redraws: bool,
    close_requested: bool,
    error: Option<Report>,
}

impl App {
    pub fn new(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            window: None,
            renderer: None,
            camera: Camera::new(Vec3::new(0.0, 0.0, 5.0)),

            input_state: InputState::default(),
            request_redraws: true,
            close_requested: false,
            error: None,
        })
    }

    /// Runs the event loop until the window closes or the renderer fails
    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;
        match self.error.take() {
            Some(report) => Err(report),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, report: Report) {
        log::error!("{report:?}");
        self.error.get_or_insert(report);
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_none() {
            let attributes = Window::default_attributes()
                .with_title(self.config.window_title.clone())
                .with_inner_size(PhysicalSize::new(
                    self.config.window_extent.width,
                    self.config.window_extent.height,
                ));
            self.window = Some(Arc::new(event_loop.create_window(attributes)?));
        }

        if self.renderer.is_none() {
            if let Some(window) = self.window.clone() {
                self.renderer = Some(Renderer::new(window, self.config.clone())?);
            }
        }
        Ok(())
    }

    fn set_cursor_captured(&self, captured: bool) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        let grabbed = if captured {
            window
                .set_cursor_grab(CursorGrabMode::Confined)
                .or_else(|_| window.set_cursor_grab(CursorGrabMode::Locked))
        } else {
            window.set_cursor_grab(CursorGrabMode::None)
        };
        if let Err(e) = grabbed {
            log::warn!("Failed to change cursor grab: {e}");
        }
        window.set_cursor_visible(!captured);
    }

    fn redraw(&mut self) -> Result<()> {
        self.input_state.apply_to(&mut self.camera);
        self.camera.update();
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.draw(&self.camera)?;
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(report) = self.init(event_loop) {
            self.fail(event_loop, report);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        if self.window.as_ref().map(|w| w.id()) != Some(window_id) {
            return;
        }

        if self.input_state.process_window_event(&event, &mut self.camera) {
            if self.input_state.mouse_right_just_pressed {
                self.set_cursor_captured(true);
            } else if self.input_state.mouse_right_just_released {
                self.set_cursor_captured(false);
            }
            self.input_state.reset_frame();
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            // The swapchain reports itself stale on the next acquire or present
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            WindowEvent::Focused(false) => {
                self.set_cursor_captured(false);
            }
            WindowEvent::RedrawRequested => {
                if let Err(report) = self.redraw() {
                    self.fail(event_loop, report);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: key,
                    state: ElementState::Pressed,
                    repeat: false,
                    ..
                },
                ..
            } => match key.as_ref() {
                Key::Character("r") => {
                    self.request_redraws = !self.request_redraws;
                    log::info!("request_redraws: {}", self.request_redraws);
                }
                Key::Character("e") => {
                    if let Some(renderer) = self.renderer.as_mut() {
                        renderer.cycle_background_effect();
                    }
                }
                Key::Named(NamedKey::Escape) => {
                    self.close_requested = true;
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.input_state.process_mouse_motion(dx, dy);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if self.request_redraws {
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // The renderer owns the surface, so it goes before the window
        if let Some(renderer) = self.renderer.take() {
            log::info!("Exiting after {} frames", renderer.frame_number());
        }
        self.window = None;
    }
}
