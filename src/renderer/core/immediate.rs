use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::core::device::Queue;
use crate::renderer::core::frame::FENCE_TIMEOUT_NS;

/// Blocking one-off submissions for setup work (uploads, mip generation, overlay fonts).
///
/// The CPU waits for the GPU on every call, so this must stay off the per-frame recording path.
pub struct ImmediateSubmit {
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,

    queue: Queue,
    device: Arc<ash::Device>,
}

impl ImmediateSubmit {
    pub fn new(
        queue: Queue,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let fence = unsafe {
            device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?
        };

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
            fence,
            command_pool,
            command_buffer,
            queue,
            device,
        })
    }

    /// Records `func` into the dedicated command buffer, submits it and waits for completion
    pub fn submit<F>(
        &self,
        func: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let cmd = self.command_buffer;

        unsafe {
            self.device.reset_fences(&[self.fence])?;
            self.device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(cmd, &begin_info)?;
        }

        func(cmd, &self.device)?;

        unsafe {
            self.device.end_command_buffer(cmd)?;

            let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
            let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
            self.device.queue_submit2(self.queue.handle, &[submit], self.fence)?;

            self.device.wait_for_fences(&[self.fence], true, FENCE_TIMEOUT_NS)?;
        }

        Ok(())
    }

    pub fn destroy(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_fence(self.fence, None);
        }
        self.command_pool = vk::CommandPool::null();
        self.fence = vk::Fence::null();
    }
}
