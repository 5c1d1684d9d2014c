use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{OptionExt, WrapErr};
use color_eyre::Result;
use glam::{Mat4, Vec4};
use gpu_allocator::MemoryLocation;
use winit::window::Window;
use crate::renderer::camera::Camera;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::frame::{FrameContext, FrameRing, FrameSync, FENCE_TIMEOUT_NS};
use crate::renderer::core::frame_loop::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::renderer::core::immediate::ImmediateSubmit;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::target::RenderTarget;
use crate::renderer::internals::deletion_queue::DeletionQueue;
use crate::renderer::internals::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;
use crate::renderer::internals::descriptors::{DescriptorAllocator, DescriptorWriter, PoolSizeRatio};
use crate::renderer::internals::util;
use crate::renderer::overlay::{self, OverlayDescriptorPool, OverlayInitInfo, UiOverlay};
use crate::renderer::resources::default_scene::{load_default_scene, SceneTargets};
use crate::renderer::resources::effects::BackgroundEffects;
use crate::renderer::resources::image::{ImageDesc, ImageHandles};
use crate::renderer::resources::mesh::MeshDrawInfo;
use crate::renderer::scene::{DrawContext, RenderObject, Scene};
use crate::renderer::shader_data::{GpuDrawPushConstants, GpuSceneData};

const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
const DEPTH_IMAGE_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const GLOBAL_DESCRIPTOR_SETS: u32 = 10;
const GLOBAL_DESCRIPTOR_RATIOS: [PoolSizeRatio; 3] = [
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2.0),
];

/// Size the scene is rendered at: the smaller of swapchain and draw image, scaled
pub fn scaled_draw_extent(
    swapchain: vk::Extent2D,
    draw_image: vk::Extent2D,
    render_scale: f32,
) -> vk::Extent2D {
    let scale = |a: u32, b: u32| ((a.min(b) as f32 * render_scale) as u32).max(1);
    vk::Extent2D {
        width: scale(swapchain.width, draw_image.width),
        height: scale(swapchain.height, draw_image.height),
    }
}

/// Owns every Vulkan object of a windowed renderer and records its frames
pub struct RenderContext {
    config: RenderConfig,

    instance: RenderInstance,
    device: RenderDevice,
    target: RenderTarget,
    immediate: ImmediateSubmit,
    frames: FrameRing<FrameContext>,
    main_deletion_queue: DeletionQueue,

    draw_image: ImageHandles,
    depth_image: ImageHandles,
    draw_image_descriptors: vk::DescriptorSet,
    scene_data_layout: vk::DescriptorSetLayout,
    background: BackgroundEffects,

    overlay: Option<Box<dyn UiOverlay>>,
    overlay_pool: OverlayDescriptorPool,

    scene: Scene,
    meshes: Vec<MeshDrawInfo>,
    draw_context: DrawContext,
    scene_data: GpuSceneData,
    destroyed: bool,
}

impl RenderContext {
    pub fn new(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        config.validate()?;

        let instance = RenderInstance::new(Some(&window), config.enable_validation)?;
        let (surface, surface_loader) = instance.create_surface(&window)?;
        let device = RenderDevice::new(&instance.instance, Some((surface, &surface_loader)))?;
        let target = RenderTarget::new(
            window,
            surface,
            surface_loader,
            &instance.instance,
            &device,
            config.vsync,
        )?;

        let resources = device.resources()?;
        let immediate = ImmediateSubmit::new(device.graphics_queue, device.logical.clone())?;

        let frames = FrameRing::new(
            (0..config.frames_in_flight)
                .map(|_| FrameContext::new(&device.logical, &device.graphics_queue))
                .collect::<Result<Vec<_>>>()?,
        )?;
        log::info!("Created {} frames in flight", frames.len());

        let mut main_deletion_queue = DeletionQueue::new();

        let draw_image = resources.create_image(&ImageDesc::new_2d(
            "draw image",
            config.window_extent.width,
            config.window_extent.height,
            DRAW_IMAGE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        ))?;
        let depth_image = resources.create_image(&ImageDesc::new_2d(
            "depth image",
            config.window_extent.width,
            config.window_extent.height,
            DEPTH_IMAGE_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ))?;
        let (draw_handles, depth_handles) = (draw_image.handles(), depth_image.handles());
        {
            let res = resources.clone();
            main_deletion_queue.push(move || {
                res.destroy_image(draw_image);
                res.destroy_image(depth_image);
            });
        }

        let logical = device.logical.clone();
        let mut global_descriptors = DescriptorAllocator::init(
            logical.as_ref(),
            GLOBAL_DESCRIPTOR_SETS,
            &GLOBAL_DESCRIPTOR_RATIOS,
        )?;
        let draw_image_layout = DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .build(&logical, vk::ShaderStageFlags::COMPUTE)?;
        let scene_data_layout = DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(&logical, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;

        let draw_image_descriptors = global_descriptors.allocate(logical.as_ref(), draw_image_layout)?;
        let mut writer = DescriptorWriter::new();
        writer.write_image(
            0,
            draw_handles.view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
            vk::DescriptorType::STORAGE_IMAGE,
        );
        writer.update_set(&logical, draw_image_descriptors);

        {
            let logical = logical.clone();
            main_deletion_queue.push(move || {
                global_descriptors.destroy(logical.as_ref());
                unsafe {
                    logical.destroy_descriptor_set_layout(draw_image_layout, None);
                    logical.destroy_descriptor_set_layout(scene_data_layout, None);
                }
            });
        }

        let background = BackgroundEffects::new(&logical, &config.shader_dir, draw_image_layout)?;
        let overlay_pool = OverlayDescriptorPool::new(&logical)?;

        let (scene, meshes) = load_default_scene(
            &resources,
            &immediate,
            &config.shader_dir,
            config.ground_texture.as_deref(),
            &SceneTargets {
                scene_data_layout,
                color_format: DRAW_IMAGE_FORMAT,
                depth_format: DEPTH_IMAGE_FORMAT,
            },
            &mut main_deletion_queue,
        )?;

        Ok(Self {
            config,
            instance,
            device,
            target,
            immediate,
            frames,
            main_deletion_queue,
            draw_image: draw_handles,
            depth_image: depth_handles,
            draw_image_descriptors,
            scene_data_layout,
            background,
            overlay: None,
            overlay_pool,
            scene,
            meshes,
            draw_context: DrawContext::default(),
            scene_data: GpuSceneData::default(),
            destroyed: false,
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.target.window
    }

    pub fn cycle_background_effect(&mut self) -> &'static str {
        self.background.cycle()
    }

    /// Installs a UI overlay, replacing (and destroying) any previous one
    pub fn set_overlay(&mut self, mut ui: Box<dyn UiOverlay>) -> Result<()> {
        let resources = self.device.resources()?;
        ui.init(OverlayInitInfo {
            device: &self.device.logical,
            physical_device: self.device.physical,
            queue: self.device.graphics_queue,
            descriptor_pool: self.overlay_pool.pool,
            color_format: self.target.swapchain.format,
            image_count: self.target.swapchain.images.len() as u32,
            immediate: &self.immediate,
            resources: &resources,
        })?;
        if let Some(mut previous) = self.overlay.replace(ui) {
            self.device.wait_idle()?;
            previous.destroy(&self.device.logical);
        }
        Ok(())
    }

    /// Collects draws from the scene and refreshes the per-frame scene uniforms
    pub fn update_scene(&mut self, camera: &Camera) -> Result<()> {
        self.draw_context.clear();
        self.scene.refresh_transforms();
        self.scene.draw(Mat4::IDENTITY, &self.meshes, &mut self.draw_context)?;

        let extent = self.target.swapchain.extent;
        let aspect_ratio = extent.width as f32 / extent.height.max(1) as f32;
        let view = camera.view_matrix();
        let proj = Camera::projection(aspect_ratio);
        self.scene_data = GpuSceneData {
            view,
            proj,
            viewproj: proj * view,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        };
        Ok(())
    }

    fn draw_extent(&self) -> vk::Extent2D {
        scaled_draw_extent(
            self.target.swapchain.extent,
            self.draw_image.extent,
            self.config.render_scale,
        )
    }

    fn draw_geometry(&mut self, frame_number: u64, cmd: vk::CommandBuffer) -> Result<()> {
        let resources = self.device.resources()?;
        let device = self.device.logical.clone();
        let draw_extent = self.draw_extent();
        let frame = self.frames.current_mut(frame_number);

        // Lives until this frame slot comes around again
        let mut scene_buffer = resources.create_buffer(
            size_of::<GpuSceneData>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "scene data",
        )?;
        let written = resources.write_buffer(&mut scene_buffer, &[self.scene_data], 0);
        let scene_buffer_handle = scene_buffer.handle;
        {
            let res = resources.clone();
            frame.deletion_queue.push(move || res.destroy_buffer(scene_buffer));
        }
        written?;

        let scene_set = frame.descriptors.allocate(device.as_ref(), self.scene_data_layout)?;
        let mut writer = DescriptorWriter::new();
        writer.write_buffer(
            0,
            scene_buffer_handle,
            size_of::<GpuSceneData>() as vk::DeviceSize,
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
        );
        writer.update_set(&device, scene_set);

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.draw_image.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE);
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth_image.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 0.0, stencil: 0 },
            });
        let color_attachments = [color_attachment];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: draw_extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: draw_extent.width as f32,
            height: draw_extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: draw_extent,
        };

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
        }

        let mut last_pipeline = vk::Pipeline::null();
        let mut last_material_set = vk::DescriptorSet::null();
        let mut last_index_buffer = vk::Buffer::null();
        let objects = self.draw_context.opaque.iter().chain(&self.draw_context.transparent);
        for object in objects {
            draw_object(
                &device,
                cmd,
                object,
                scene_set,
                &mut last_pipeline,
                &mut last_material_set,
                &mut last_index_buffer,
            );
        }

        unsafe {
            device.cmd_end_rendering(cmd);
        }
        Ok(())
    }

    /// Tears everything down in reverse dependency order. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle during teardown: {e}");
        }

        let device = self.device.logical.clone();
        if let Some(mut ui) = self.overlay.take() {
            ui.destroy(&device);
        }
        self.overlay_pool.destroy(&device);
        self.background.destroy(&device);
        self.main_deletion_queue.flush();
        for frame in self.frames.iter_mut() {
            frame.destroy(&device);
        }
        self.immediate.destroy();
        self.target.destroy_swapchain(&device);
        drop(device);
        self.device.destroy();
        self.target.destroy_surface();
        self.instance.destroy();
        log::info!("Renderer destroyed");
    }
}

fn draw_object(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    object: &RenderObject,
    scene_set: vk::DescriptorSet,
    last_pipeline: &mut vk::Pipeline,
    last_material_set: &mut vk::DescriptorSet,
    last_index_buffer: &mut vk::Buffer,
) {
    let material = &object.material;
    unsafe {
        if material.pipeline != *last_pipeline {
            *last_pipeline = material.pipeline;
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, material.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                material.layout,
                0,
                &[scene_set],
                &[],
            );
            // Rebinding set 0 can disturb set 1 across layouts
            *last_material_set = vk::DescriptorSet::null();
        }
        if material.descriptor_set != *last_material_set {
            *last_material_set = material.descriptor_set;
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                material.layout,
                1,
                &[material.descriptor_set],
                &[],
            );
        }
        if object.index_buffer != *last_index_buffer {
            *last_index_buffer = object.index_buffer;
            device.cmd_bind_index_buffer(cmd, object.index_buffer, 0, vk::IndexType::UINT32);
        }

        let push_constants = GpuDrawPushConstants::new(object.transform, object.vertex_buffer_address);
        device.cmd_push_constants(
            cmd,
            material.layout,
            vk::ShaderStageFlags::VERTEX,
            0,
            bytemuck::bytes_of(&push_constants),
        );
        device.cmd_draw_indexed(cmd, object.index_count, 1, object.first_index, 0, 0);
    }
}

impl FrameBackend for RenderContext {
    fn wait_for_frame(&mut self, frame_number: u64) -> Result<()> {
        let fence = self.frames.current(frame_number).sync.render_fence;
        unsafe {
            self.device
                .logical
                .wait_for_fences(&[fence], true, FENCE_TIMEOUT_NS)
                .wrap_err_with(|| format!("Waiting on the render fence of frame {frame_number}"))?;
        }
        Ok(())
    }

    fn reclaim_frame(&mut self, frame_number: u64) -> Result<()> {
        let device = self.device.logical.clone();
        let frame = self.frames.current_mut(frame_number);
        frame.deletion_queue.flush();
        frame.descriptors.clear_pools(device.as_ref())
    }

    fn acquire_image(&mut self, frame_number: u64) -> Result<AcquireOutcome> {
        let semaphore = self.frames.current(frame_number).sync.swapchain_semaphore;
        let swapchain = &self.target.swapchain;
        let acquired = unsafe {
            swapchain.loader.acquire_next_image(
                swapchain.handle,
                FENCE_TIMEOUT_NS,
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image_index, false)) => Ok(AcquireOutcome::Ready(image_index)),
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(e).wrap_err("Failed to acquire a swapchain image"),
        }
    }

    fn record_frame(&mut self, frame_number: u64, image_index: u32) -> Result<()> {
        let device = self.device.logical.clone();
        let (cmd, fence) = {
            let frame = self.frames.current(frame_number);
            (frame.command_buffer, frame.sync.render_fence)
        };
        let swapchain_image = *self
            .target
            .swapchain
            .images
            .get(image_index as usize)
            .ok_or_eyre("Acquired image index out of range")?;
        let swapchain_view = self.target.swapchain.image_views[image_index as usize];
        let swapchain_extent = self.target.swapchain.extent;
        let draw_extent = self.draw_extent();
        let draw = self.draw_image.image;

        unsafe {
            device.reset_fences(&[fence])?;
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        util::transition_image(&device, cmd, draw, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
        self.background.record(&device, cmd, self.draw_image_descriptors, draw_extent)?;

        util::transition_image(
            &device,
            cmd,
            draw,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        util::transition_image(
            &device,
            cmd,
            self.depth_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );
        self.draw_geometry(frame_number, cmd)?;

        util::transition_image(
            &device,
            cmd,
            draw,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        util::transition_image(
            &device,
            cmd,
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        util::copy_image_to_image(&device, cmd, draw, swapchain_image, draw_extent, swapchain_extent);

        util::transition_image(
            &device,
            cmd,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        if let Some(ui) = self.overlay.as_deref_mut() {
            overlay::record_overlay_pass(ui, &device, cmd, swapchain_view, swapchain_extent)?;
        }
        util::transition_image(
            &device,
            cmd,
            swapchain_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        unsafe {
            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit_frame(&mut self, frame_number: u64) -> Result<()> {
        let frame = self.frames.current(frame_number);

        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(frame.command_buffer)];
        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.sync.swapchain_semaphore)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .value(1)];
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.sync.render_semaphore)
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)
            .value(1)];
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&command_buffer_infos);

        unsafe {
            self.device.logical.queue_submit2(
                self.device.graphics_queue.handle,
                &[submit_info],
                frame.sync.render_fence,
            )?;
        }
        Ok(())
    }

    fn present_frame(&mut self, frame_number: u64, image_index: u32) -> Result<PresentOutcome> {
        let render_semaphore = self.frames.current(frame_number).sync.render_semaphore;
        let swapchain = &self.target.swapchain;

        let swapchains = [swapchain.handle];
        let wait_semaphores = [render_semaphore];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices);

        let presented = unsafe {
            swapchain
                .loader
                .queue_present(self.device.graphics_queue.handle, &present_info)
        };
        match presented {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(e).wrap_err("Failed to present"),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn window_extent(&self) -> vk::Extent2D {
        self.target.window_extent()
    }

    fn rebuild_swapchain(&mut self, window_extent: vk::Extent2D) -> Result<vk::Extent2D> {
        let device = self.device.logical.clone();

        self.target.destroy_swapchain(&device);
        for frame in self.frames.iter_mut() {
            frame.sync.destroy(&device);
        }

        let extent = self
            .target
            .recreate(&self.instance.instance, &self.device, window_extent)?;
        for frame in self.frames.iter_mut() {
            frame.sync = FrameSync::new(&device)?;
        }
        Ok(extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn draw_extent_is_clamped_to_the_smaller_image() {
        let e = scaled_draw_extent(extent(2560, 1440), extent(1700, 900), 1.0);
        assert_eq!((e.width, e.height), (1700, 900));

        let e = scaled_draw_extent(extent(800, 600), extent(1700, 900), 1.0);
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn draw_extent_applies_render_scale() {
        let e = scaled_draw_extent(extent(1700, 900), extent(1700, 900), 0.5);
        assert_eq!((e.width, e.height), (850, 450));

        let e = scaled_draw_extent(extent(1, 1), extent(1700, 900), 0.1);
        assert_eq!((e.width, e.height), (1, 1));
    }
}
