use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::internals::swapchain::Swapchain;

/// Presentation target of the renderer, encapsulating the window, surface, and swapchain
pub struct RenderTarget {
    pub window: Arc<Window>,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,

    pub swapchain: Swapchain,
    vsync: bool,
}

impl RenderTarget {
    pub fn new(
        window: Arc<Window>,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        instance: &ash::Instance,
        device: &RenderDevice,
        vsync: bool,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(
            instance,
            &device.logical,
            device.physical,
            surface,
            &surface_loader,
            window_extent(&window),
            vsync,
        )?;

        Ok(Self {
            window,
            surface,
            surface_loader,
            swapchain,
            vsync,
        })
    }

    pub fn window_extent(&self) -> vk::Extent2D {
        window_extent(&self.window)
    }

    /// Replaces the swapchain with a fresh one of `extent`. The GPU must be idle.
    pub fn recreate(
        &mut self,
        instance: &ash::Instance,
        device: &RenderDevice,
        extent: vk::Extent2D,
    ) -> Result<vk::Extent2D> {
        self.swapchain.destroy(&device.logical);
        self.swapchain = Swapchain::new(
            instance,
            &device.logical,
            device.physical,
            self.surface,
            &self.surface_loader,
            extent,
            self.vsync,
        )?;
        Ok(self.swapchain.extent)
    }

    pub fn destroy_swapchain(&mut self, device: &ash::Device) {
        self.swapchain.destroy(device);
    }

    /// Must run after the device that rendered to it is gone
    pub fn destroy_surface(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        self.surface = vk::SurfaceKHR::null();
    }
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}
