//! Seam for an immediate-mode UI drawn on top of the final swapchain image.
//!
//! The core owns the descriptor pool the UI library allocates from and opens the
//! rendering pass; the overlay only records its draws.

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::device::Queue;
use crate::renderer::core::immediate::ImmediateSubmit;
use crate::renderer::resources::allocator::ResourceAllocator;

const DESCRIPTORS_PER_TYPE: u32 = 1000;

const OVERLAY_DESCRIPTOR_TYPES: [vk::DescriptorType; 11] = [
    vk::DescriptorType::SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
    vk::DescriptorType::STORAGE_TEXEL_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    vk::DescriptorType::INPUT_ATTACHMENT,
];

/// Everything a UI backend needs to set itself up against the renderer
pub struct OverlayInitInfo<'a> {
    pub device: &'a Arc<ash::Device>,
    pub physical_device: vk::PhysicalDevice,
    pub queue: Queue,
    pub descriptor_pool: vk::DescriptorPool,
    pub color_format: vk::Format,
    pub image_count: u32,
    /// For font atlas uploads
    pub immediate: &'a ImmediateSubmit,
    pub resources: &'a ResourceAllocator,
}

pub trait UiOverlay {
    fn init(&mut self, info: OverlayInitInfo<'_>) -> Result<()>;

    /// Records draws into an already open rendering pass targeting `target_view`
    fn record(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        target_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<()>;

    fn destroy(&mut self, device: &ash::Device);
}

pub fn overlay_pool_sizes() -> [vk::DescriptorPoolSize; 11] {
    OVERLAY_DESCRIPTOR_TYPES.map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: DESCRIPTORS_PER_TYPE,
    })
}

/// Oversized pool with individually freeable sets, the way UI libraries expect it
pub struct OverlayDescriptorPool {
    pub pool: vk::DescriptorPool,
}

impl OverlayDescriptorPool {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let pool_sizes = overlay_pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(DESCRIPTORS_PER_TYPE)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };
        Ok(Self { pool })
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.pool, None);
        }
        self.pool = vk::DescriptorPool::null();
    }
}

/// Opens a load-preserving pass on `target_view` (in COLOR_ATTACHMENT_OPTIMAL) around the overlay
pub fn record_overlay_pass(
    overlay: &mut dyn UiOverlay,
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target_view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<()> {
    let color_attachment = vk::RenderingAttachmentInfo::default()
        .image_view(target_view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE);
    let color_attachments = [color_attachment];
    let rendering_info = vk::RenderingInfo::default()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        })
        .layer_count(1)
        .color_attachments(&color_attachments);

    unsafe { device.cmd_begin_rendering(cmd, &rendering_info) };
    let recorded = overlay.record(device, cmd, target_view, extent);
    unsafe { device.cmd_end_rendering(cmd) };
    recorded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_covers_every_classic_descriptor_type() {
        let sizes = overlay_pool_sizes();
        assert_eq!(sizes.len(), 11);
        assert!(sizes.iter().all(|s| s.descriptor_count == 1000));
        for (i, a) in sizes.iter().enumerate() {
            assert!(sizes[i + 1..].iter().all(|b| b.ty != a.ty));
        }
        assert!(sizes.iter().any(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
    }
}
