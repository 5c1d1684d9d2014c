use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::core::device::Queue;
use crate::renderer::internals::deletion_queue::DeletionQueue;
use crate::renderer::internals::descriptors::{DescriptorAllocatorGrowable, PoolSizeRatio};

/// Fence and acquire waits block until signaled; a slow frame is not an error
pub const FENCE_TIMEOUT_NS: u64 = u64::MAX;

const FRAME_DESCRIPTOR_SETS: u32 = 1000;
const FRAME_DESCRIPTOR_RATIOS: [PoolSizeRatio; 4] = [
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
];

/// Synchronization primitives of one frame in flight
pub struct FrameSync {
    /// Signaled by acquire, waited on by the submit
    pub swapchain_semaphore: vk::Semaphore,
    /// Signaled by the submit, waited on by present
    pub render_semaphore: vk::Semaphore,
    /// Signaled when the frame's commands retire; created signaled so the first wait passes
    pub render_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        unsafe {
            Ok(Self {
                swapchain_semaphore: device.create_semaphore(&semaphore_info, None)?,
                render_semaphore: device.create_semaphore(&semaphore_info, None)?,
                render_fence: device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.swapchain_semaphore, None);
            device.destroy_semaphore(self.render_semaphore, None);
            device.destroy_fence(self.render_fence, None);
        }
        self.swapchain_semaphore = vk::Semaphore::null();
        self.render_semaphore = vk::Semaphore::null();
        self.render_fence = vk::Fence::null();
    }
}

/// Everything one frame in flight records into and releases after its fence signals
pub struct FrameContext {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub sync: FrameSync,
    pub deletion_queue: DeletionQueue,
    pub descriptors: DescriptorAllocatorGrowable,
}

impl FrameContext {
    pub fn new(device: &ash::Device, queue: &Queue) -> Result<Self> {
        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&command_pool_info, None)? };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe { device.allocate_command_buffers(&command_buffer_info)?[0] };

        Ok(Self {
            command_pool,
            command_buffer,
            sync: FrameSync::new(device)?,
            deletion_queue: DeletionQueue::new(),
            descriptors: DescriptorAllocatorGrowable::init(
                device,
                FRAME_DESCRIPTOR_SETS,
                &FRAME_DESCRIPTOR_RATIOS,
            )?,
        })
    }

    /// Runs pending teardown and frees the frame's objects. The GPU must be idle.
    pub fn destroy(&mut self, device: &ash::Device) {
        self.deletion_queue.flush();
        self.descriptors.destroy_pools(device);
        self.sync.destroy(device);
        unsafe {
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Fixed ring of per-frame state selected by `frame_number % len`
pub struct FrameRing<T> {
    frames: Vec<T>,
}

impl<T> FrameRing<T> {
    pub fn new(frames: Vec<T>) -> Result<Self> {
        if frames.is_empty() {
            return Err(eyre!("A frame ring needs at least one frame"));
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn index_for(&self, frame_number: u64) -> usize {
        (frame_number % self.frames.len() as u64) as usize
    }

    pub fn current(&self, frame_number: u64) -> &T {
        &self.frames[self.index_for(frame_number)]
    }

    pub fn current_mut(&mut self, frame_number: u64) -> &mut T {
        let index = self.index_for(frame_number);
        &mut self.frames[index]
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.frames.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_cycle_through_the_ring() {
        for frames_in_flight in [2usize, 3] {
            let ring = FrameRing::new((0..frames_in_flight).collect()).unwrap();
            let n = frames_in_flight as u64;
            for frame_number in 0..3 * n {
                let index = ring.index_for(frame_number);
                assert_eq!(index as u64, frame_number % n);
                assert_eq!(*ring.current(frame_number), index);
            }
        }
    }

    #[test]
    fn fence_waits_never_time_out() {
        assert_eq!(FENCE_TIMEOUT_NS, u64::MAX);
    }

    #[test]
    fn empty_ring_is_rejected() {
        assert!(FrameRing::<u32>::new(Vec::new()).is_err());
    }

    #[test]
    fn current_mut_touches_only_the_selected_frame() {
        let mut ring = FrameRing::new(vec![0u32; 3]).unwrap();
        for frame_number in 0..7 {
            *ring.current_mut(frame_number) += 1;
        }
        assert_eq!(ring.frames, vec![3, 2, 2]);
    }
}
