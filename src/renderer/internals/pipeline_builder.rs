use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;

const SHADER_ENTRY_POINT: &std::ffi::CStr = c"main";

/// Graphics pipeline setup targeting dynamic rendering, with viewport and scissor left dynamic
pub struct PipelineBuilder {
    shader_stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'static>,
    rasterizer: vk::PipelineRasterizationStateCreateInfo<'static>,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    multisampling: vk::PipelineMultisampleStateCreateInfo<'static>,
    depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'static>,
    color_attachment_format: vk::Format,
    depth_attachment_format: vk::Format,
    pipeline_layout: vk::PipelineLayout,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            shader_stages: Vec::new(),
            input_assembly: vk::PipelineInputAssemblyStateCreateInfo::default(),
            rasterizer: vk::PipelineRasterizationStateCreateInfo::default()
                .line_width(1.0),
            color_blend_attachment: vk::PipelineColorBlendAttachmentState::default(),
            multisampling: vk::PipelineMultisampleStateCreateInfo::default(),
            depth_stencil: vk::PipelineDepthStencilStateCreateInfo::default(),
            color_attachment_format: vk::Format::UNDEFINED,
            depth_attachment_format: vk::Format::UNDEFINED,
            pipeline_layout: vk::PipelineLayout::null(),
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(mut self, layout: vk::PipelineLayout) -> Self {
        self.pipeline_layout = layout;
        self
    }

    pub fn shaders(mut self, vertex: vk::ShaderModule, fragment: vk::ShaderModule) -> Self {
        self.shader_stages.clear();
        self.shader_stages.push((vk::ShaderStageFlags::VERTEX, vertex));
        self.shader_stages.push((vk::ShaderStageFlags::FRAGMENT, fragment));
        self
    }

    pub fn input_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.input_assembly = self.input_assembly
            .topology(topology)
            .primitive_restart_enable(false);
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.rasterizer = self.rasterizer
            .polygon_mode(mode)
            .line_width(1.0);
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.rasterizer = self.rasterizer
            .cull_mode(cull_mode)
            .front_face(front_face);
        self
    }

    pub fn multisampling_none(mut self) -> Self {
        self.multisampling = self.multisampling
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);
        self
    }

    pub fn disable_blending(mut self) -> Self {
        self.color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false);
        self
    }

    /// `src * src_alpha + dst`
    pub fn enable_blending_additive(mut self) -> Self {
        self.color_blend_attachment = Self::blend_attachment(vk::BlendFactor::ONE);
        self
    }

    /// `src * src_alpha + dst * (1 - src_alpha)`
    pub fn enable_blending_alpha_blend(mut self) -> Self {
        self.color_blend_attachment = Self::blend_attachment(vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        self
    }

    fn blend_attachment(dst_color_factor: vk::BlendFactor) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(dst_color_factor)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    pub fn color_attachment_format(mut self, format: vk::Format) -> Self {
        self.color_attachment_format = format;
        self
    }

    pub fn depth_format(mut self, format: vk::Format) -> Self {
        self.depth_attachment_format = format;
        self
    }

    pub fn disable_depth_test(mut self) -> Self {
        self.depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_compare_op(vk::CompareOp::NEVER)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);
        self
    }

    pub fn enable_depth_test(mut self, depth_write: bool, compare_op: vk::CompareOp) -> Self {
        self.depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(depth_write)
            .depth_compare_op(compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);
        self
    }

    pub fn build(&self, device: &ash::Device) -> Result<vk::Pipeline> {
        let stages = self
            .shader_stages
            .iter()
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(*module)
                    .name(SHADER_ENTRY_POINT)
            })
            .collect::<Vec<_>>();

        // Vertices are pulled from a storage buffer, so no fixed-function vertex input
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let attachments = [self.color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let color_formats = [self.color_attachment_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(self.depth_attachment_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterizer)
            .multisample_state(&self.multisampling)
            .color_blend_state(&color_blending)
            .depth_stencil_state(&self.depth_stencil)
            .dynamic_state(&dynamic_info)
            .layout(self.pipeline_layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, err)| err)?
        };

        pipelines
            .into_iter()
            .next()
            .ok_or_eyre("Graphics pipeline creation returned no pipeline")
    }
}

pub fn create_compute_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    shader: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader)
        .name(SHADER_ENTRY_POINT);
    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .layout(layout)
        .stage(stage_info);

    let pipelines = unsafe {
        device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, err)| err)?
    };

    pipelines
        .into_iter()
        .next()
        .ok_or_eyre("Compute pipeline creation returned no pipeline")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_modes_differ_only_in_destination_factor() {
        let additive = PipelineBuilder::new().enable_blending_additive().color_blend_attachment;
        let alpha = PipelineBuilder::new().enable_blending_alpha_blend().color_blend_attachment;

        assert_eq!(additive.blend_enable, vk::TRUE);
        assert_eq!(additive.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(additive.dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(alpha.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);

        let opaque = PipelineBuilder::new().disable_blending().color_blend_attachment;
        assert_eq!(opaque.blend_enable, vk::FALSE);
        assert_eq!(opaque.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn depth_test_toggles() {
        let on = PipelineBuilder::new()
            .enable_depth_test(true, vk::CompareOp::GREATER_OR_EQUAL)
            .depth_stencil;
        assert_eq!(on.depth_test_enable, vk::TRUE);
        assert_eq!(on.depth_write_enable, vk::TRUE);
        assert_eq!(on.depth_compare_op, vk::CompareOp::GREATER_OR_EQUAL);

        let off = PipelineBuilder::new().disable_depth_test().depth_stencil;
        assert_eq!(off.depth_test_enable, vk::FALSE);
        assert_eq!(off.depth_compare_op, vk::CompareOp::NEVER);
    }
}
