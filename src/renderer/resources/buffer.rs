use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocation;

/// A buffer and the memory bound to it.
///
/// Released only through [`ResourceAllocator::destroy_buffer`]; dropping it leaks the memory.
///
/// [`ResourceAllocator::destroy_buffer`]: crate::renderer::resources::allocator::ResourceAllocator::destroy_buffer
#[derive(Debug)]
pub struct AllocatedBuffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub(super) allocation: Allocation,
}

impl AllocatedBuffer {
    /// Copies `data` into the mapped allocation at byte `offset`
    pub fn write<T: Copy>(&mut self, data: &[T], offset: usize) -> Result<presser::CopyRecord> {
        Ok(presser::copy_from_slice_to_offset(data, &mut self.allocation, offset)?)
    }

    pub fn mapped_bytes(&self) -> Result<&[u8]> {
        self.allocation
            .mapped_slice()
            .ok_or_eyre("Buffer memory is not host visible")
    }
}
