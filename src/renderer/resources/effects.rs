use std::path::Path;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use glam::Vec4;
use crate::renderer::internals::pipeline_builder::create_compute_pipeline;
use crate::renderer::resources::shader::load_shader_module;
use crate::renderer::shader_data::ComputePushConstants;

/// Work group edge used by the background shaders (`local_size_x/y = 16`)
pub const WORKGROUP_SIZE: u32 = 16;

/// A compute shader that paints the whole draw image, plus the push constants it is fed
#[derive(Debug, Clone, Copy)]
pub struct ComputeEffect {
    pub name: &'static str,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub data: ComputePushConstants,
}

pub fn dispatch_size(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// The selectable background effects. They share one pipeline layout whose only set is
/// the draw image as a storage image.
pub struct BackgroundEffects {
    layout: vk::PipelineLayout,
    effects: Vec<ComputeEffect>,
    current: usize,
}

impl BackgroundEffects {
    pub fn new(
        device: &ash::Device,
        shader_dir: &Path,
        draw_image_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: size_of::<ComputePushConstants>() as u32,
        }];
        let set_layouts = [draw_image_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

        let mut background = Self {
            layout,
            effects: Vec::new(),
            current: 0,
        };

        let specs = [
            (
                "gradient",
                "gradient_color.comp.spv",
                ComputePushConstants {
                    data1: Vec4::new(1.0, 0.0, 0.0, 1.0),
                    data2: Vec4::new(0.0, 0.0, 1.0, 1.0),
                    ..Default::default()
                },
            ),
            (
                "sky",
                "sky.comp.spv",
                ComputePushConstants {
                    data1: Vec4::new(0.1, 0.2, 0.4, 0.97),
                    ..Default::default()
                },
            ),
        ];

        for (name, file_name, data) in specs {
            match Self::create_effect(device, shader_dir, layout, name, file_name, data) {
                Ok(effect) => background.effects.push(effect),
                Err(e) => {
                    background.destroy(device);
                    return Err(e);
                }
            }
        }

        Ok(background)
    }

    fn create_effect(
        device: &ash::Device,
        shader_dir: &Path,
        layout: vk::PipelineLayout,
        name: &'static str,
        file_name: &str,
        data: ComputePushConstants,
    ) -> Result<ComputeEffect> {
        let shader = load_shader_module(device, shader_dir, file_name)?;
        let pipeline = create_compute_pipeline(device, layout, shader);
        unsafe { device.destroy_shader_module(shader, None) };

        Ok(ComputeEffect {
            name,
            pipeline: pipeline?,
            layout,
            data,
        })
    }

    pub fn current(&self) -> Result<&ComputeEffect> {
        self.effects
            .get(self.current)
            .ok_or_eyre("No background effect loaded")
    }

    pub fn current_mut(&mut self) -> Result<&mut ComputeEffect> {
        self.effects
            .get_mut(self.current)
            .ok_or_eyre("No background effect loaded")
    }

    /// Switches to the next effect, wrapping around, and returns its name
    pub fn cycle(&mut self) -> &'static str {
        if self.effects.is_empty() {
            return "";
        }
        self.current = next_index(self.current, self.effects.len());
        let name = self.effects[self.current].name;
        log::info!("Background effect: {name}");
        name
    }

    /// Binds the current effect and fills `extent` of the draw image, which must be in GENERAL
    pub fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        draw_image_set: vk::DescriptorSet,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let effect = self.current()?;
        let (groups_x, groups_y) = dispatch_size(extent);
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, effect.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                effect.layout,
                0,
                &[draw_image_set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                effect.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&effect.data),
            );
            device.cmd_dispatch(cmd, groups_x, groups_y, 1);
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for effect in self.effects.drain(..) {
                device.destroy_pipeline(effect.pipeline, None);
            }
            device.destroy_pipeline_layout(self.layout, None);
        }
        self.layout = vk::PipelineLayout::null();
    }
}

fn next_index(current: usize, len: usize) -> usize {
    (current + 1) % len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_partial_tiles() {
        assert_eq!(dispatch_size(vk::Extent2D { width: 1700, height: 900 }), (107, 57));
        assert_eq!(dispatch_size(vk::Extent2D { width: 16, height: 32 }), (1, 2));
        assert_eq!(dispatch_size(vk::Extent2D { width: 1, height: 1 }), (1, 1));
    }

    #[test]
    fn cycling_wraps_around() {
        assert_eq!(next_index(0, 2), 1);
        assert_eq!(next_index(1, 2), 0);
        assert_eq!(next_index(0, 1), 0);
    }
}
