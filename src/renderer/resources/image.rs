use ash::vk;
use gpu_allocator::vulkan::Allocation;

/// What to create. `mipmapped` asks for a full mip chain sized from the largest dimension.
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub name: String,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mipmapped: bool,
}

impl ImageDesc {
    pub fn new_2d(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name: name.into(),
            extent: vk::Extent3D { width, height, depth: 1 },
            format,
            usage,
            mipmapped: false,
        }
    }

    pub fn mipmapped(mut self, mipmapped: bool) -> Self {
        self.mipmapped = mipmapped;
        self
    }

    /// Bytes needed to fill mip 0 with 4-byte texels
    pub fn rgba8_size(&self) -> usize {
        self.extent.width as usize * self.extent.height as usize * self.extent.depth as usize * 4
    }
}

/// GPU-only image with a view covering all of its mips
#[derive(Debug)]
pub struct AllocatedImage {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub(super) allocation: Allocation,
}

impl AllocatedImage {
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    /// Plain handles for recording, so the image itself can be handed to a deletion queue
    pub fn handles(&self) -> ImageHandles {
        ImageHandles {
            image: self.handle,
            view: self.view,
            extent: self.extent_2d(),
            format: self.format,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageHandles {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_size_counts_four_bytes_per_texel() {
        let desc = ImageDesc::new_2d(
            "checker",
            32,
            16,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert_eq!(desc.rgba8_size(), 32 * 16 * 4);
        assert!(!desc.mipmapped);
        assert!(desc.mipmapped(true).mipmapped);
    }
}
