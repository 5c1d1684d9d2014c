pub mod camera;
pub mod config;
pub mod overlay;
pub mod scene;

mod core;
mod internals;
mod resources;
mod shader_data;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::camera::Camera;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::context::RenderContext;
use crate::renderer::core::frame_loop::FrameLoop;
use crate::renderer::overlay::UiOverlay;

pub use crate::renderer::core::frame_loop::FrameOutcome;

static RENDERER_ALIVE: AtomicBool = AtomicBool::new(false);

/// Held by the one live renderer of the process
struct RendererGuard(());

impl RendererGuard {
    fn acquire() -> Result<Self> {
        RENDERER_ALIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| eyre!("A renderer already exists in this process"))?;
        Ok(Self(()))
    }
}

impl Drop for RendererGuard {
    fn drop(&mut self) {
        RENDERER_ALIVE.store(false, Ordering::Release);
    }
}

pub struct Renderer {
    ctx: RenderContext,
    frame_loop: FrameLoop,
    // Declared last so it is released after the context is torn down
    _guard: RendererGuard,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        let guard = RendererGuard::acquire()?;
        let frame_loop = FrameLoop::new();
        let ctx = RenderContext::new(window, config)?;
        Ok(Self {
            ctx,
            frame_loop,
            _guard: guard,
        })
    }

    pub fn draw(&mut self, camera: &Camera) -> Result<FrameOutcome> {
        self.ctx.update_scene(camera)?;
        let outcome = self.frame_loop.tick(&mut self.ctx)?;
        if outcome != FrameOutcome::Presented {
            log::debug!("Frame {} skipped: {outcome:?}", self.frame_loop.state().frame_number);
        }
        Ok(outcome)
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_loop.state().frame_number
    }

    pub fn window(&self) -> &Arc<Window> {
        self.ctx.window()
    }

    pub fn cycle_background_effect(&mut self) -> &'static str {
        self.ctx.cycle_background_effect()
    }

    pub fn set_overlay(&mut self, overlay: Box<dyn UiOverlay>) -> Result<()> {
        self.ctx.set_overlay(overlay)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.ctx.destroy();
    }
}
