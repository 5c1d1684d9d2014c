use std::path::Path;
use ash::vk;
use color_eyre::Result;
use crate::renderer::internals::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;
use crate::renderer::internals::descriptors::{DescriptorAllocatorGrowable, DescriptorWriter};
use crate::renderer::internals::pipeline_builder::PipelineBuilder;
use crate::renderer::resources::shader::load_shader_module;
use crate::renderer::shader_data::{GpuDrawPushConstants, MaterialConstants};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialPass {
    MainColor,
    Transparent,
}

/// Everything a draw needs to bind a material; owns nothing
#[derive(Debug, Clone, Copy)]
pub struct MaterialInstance {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub pass: MaterialPass,
}

/// Inputs of one metallic-roughness material
pub struct MaterialResources {
    pub color_view: vk::ImageView,
    pub color_sampler: vk::Sampler,
    pub metal_rough_view: vk::ImageView,
    pub metal_rough_sampler: vk::Sampler,
    pub data_buffer: vk::Buffer,
    pub data_buffer_offset: vk::DeviceSize,
}

/// The two mesh pipelines (opaque and additive transparent) and their shared layouts
pub struct MetallicRoughnessMaterial {
    opaque_pipeline: vk::Pipeline,
    transparent_pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    material_layout: vk::DescriptorSetLayout,
    writer: DescriptorWriter,
}

impl MetallicRoughnessMaterial {
    pub fn new(
        device: &ash::Device,
        shader_dir: &Path,
        scene_data_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let vertex_shader = load_shader_module(device, shader_dir, "mesh.vert.spv")?;
        let fragment_shader = match load_shader_module(device, shader_dir, "mesh.frag.spv") {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vertex_shader, None) };
                return Err(e);
            }
        };

        let material = Self::build(
            device,
            vertex_shader,
            fragment_shader,
            scene_data_layout,
            color_format,
            depth_format,
        );

        unsafe {
            device.destroy_shader_module(vertex_shader, None);
            device.destroy_shader_module(fragment_shader, None);
        }

        material
    }

    fn build(
        device: &ash::Device,
        vertex_shader: vk::ShaderModule,
        fragment_shader: vk::ShaderModule,
        scene_data_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let material_layout = DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .build(device, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;

        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: size_of::<GpuDrawPushConstants>() as u32,
        }];
        let set_layouts = [scene_data_layout, material_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

        let builder = PipelineBuilder::new()
            .shaders(vertex_shader, fragment_shader)
            .input_topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::CLOCKWISE)
            .multisampling_none()
            .disable_blending()
            // Reversed depth: near is 1, far is 0
            .enable_depth_test(true, vk::CompareOp::GREATER_OR_EQUAL)
            .color_attachment_format(color_format)
            .depth_format(depth_format)
            .layout(pipeline_layout);
        let opaque_pipeline = builder.build(device)?;

        let transparent_pipeline = builder
            .enable_blending_additive()
            .enable_depth_test(false, vk::CompareOp::GREATER_OR_EQUAL)
            .build(device)?;

        Ok(Self {
            opaque_pipeline,
            transparent_pipeline,
            pipeline_layout,
            material_layout,
            writer: DescriptorWriter::new(),
        })
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn write_material(
        &mut self,
        device: &ash::Device,
        pass: MaterialPass,
        resources: &MaterialResources,
        descriptor_allocator: &mut DescriptorAllocatorGrowable,
    ) -> Result<MaterialInstance> {
        let pipeline = match pass {
            MaterialPass::MainColor => self.opaque_pipeline,
            MaterialPass::Transparent => self.transparent_pipeline,
        };
        let descriptor_set = descriptor_allocator.allocate(device, self.material_layout)?;

        self.writer.clear();
        self.writer
            .write_buffer(
                0,
                resources.data_buffer,
                size_of::<MaterialConstants>() as vk::DeviceSize,
                resources.data_buffer_offset,
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .write_image(
                1,
                resources.color_view,
                resources.color_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            )
            .write_image(
                2,
                resources.metal_rough_view,
                resources.metal_rough_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
        self.writer.update_set(device, descriptor_set);

        Ok(MaterialInstance {
            pipeline,
            layout: self.pipeline_layout,
            descriptor_set,
            pass,
        })
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.opaque_pipeline, None);
            device.destroy_pipeline(self.transparent_pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.material_layout, None);
        }
    }
}
