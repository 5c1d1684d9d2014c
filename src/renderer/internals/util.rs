use ash::vk;

/// Number of mip levels in a full chain down to 1x1
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Aspect used when viewing an image of the given format
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM
        | vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D32_SFLOAT
        | vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Aspect touched by a barrier that moves an image into `layout`
pub fn aspect_for_layout(layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    match layout {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// Records a full-pipeline barrier moving every mip and layer of `image` from `old_layout` to `new_layout`
pub fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let image_barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .subresource_range(subresource_range(aspect_for_layout(new_layout)))
        .image(image);

    let barriers = [image_barrier];
    let dep_info = vk::DependencyInfo::default()
        .image_memory_barriers(&barriers);

    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dep_info);
    }
}

fn blit_offsets(size: vk::Extent2D) -> [vk::Offset3D; 2] {
    [
        vk::Offset3D { x: 0, y: 0, z: 0 },
        vk::Offset3D {
            x: size.width as i32,
            y: size.height as i32,
            z: 1,
        },
    ]
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Blits mip 0 of `src` (TRANSFER_SRC_OPTIMAL) onto mip 0 of `dst` (TRANSFER_DST_OPTIMAL), scaling as needed
pub fn copy_image_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_size: vk::Extent2D,
    dst_size: vk::Extent2D,
) {
    let blit_region = vk::ImageBlit2::default()
        .src_offsets(blit_offsets(src_size))
        .dst_offsets(blit_offsets(dst_size))
        .src_subresource(color_layers(0))
        .dst_subresource(color_layers(0));

    let regions = [blit_region];
    let blit_info = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(&regions);

    unsafe {
        device.cmd_blit_image2(cmd, &blit_info);
    }
}

/// Fills every mip level of `image` by successive half-size blits.
///
/// Expects the whole image in TRANSFER_DST_OPTIMAL with mip 0 populated; leaves it in
/// SHADER_READ_ONLY_OPTIMAL.
pub fn generate_mipmaps(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    extent: vk::Extent2D,
) {
    let mip_count = mip_levels(extent.width, extent.height);
    let mut size = extent;

    for mip in 0..mip_count {
        let half_size = vk::Extent2D {
            width: (size.width / 2).max(1),
            height: (size.height / 2).max(1),
        };

        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: mip,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image(image);
        let barriers = [barrier];
        let dep_info = vk::DependencyInfo::default()
            .image_memory_barriers(&barriers);
        unsafe {
            device.cmd_pipeline_barrier2(cmd, &dep_info);
        }

        if mip + 1 < mip_count {
            let blit_region = vk::ImageBlit2::default()
                .src_offsets(blit_offsets(size))
                .dst_offsets(blit_offsets(half_size))
                .src_subresource(color_layers(mip))
                .dst_subresource(color_layers(mip + 1));
            let regions = [blit_region];
            let blit_info = vk::BlitImageInfo2::default()
                .src_image(image)
                .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .dst_image(image)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .filter(vk::Filter::LINEAR)
                .regions(&regions);
            unsafe {
                device.cmd_blit_image2(cmd, &blit_info);
            }

            size = half_size;
        }
    }

    transition_image(
        device,
        cmd,
        image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_levels_follow_largest_dimension() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(32, 32), 6);
        assert_eq!(mip_levels(17, 9), 5);
        assert_eq!(mip_levels(9, 17), 5);
        assert_eq!(mip_levels(1024, 1), 11);
        assert_eq!(mip_levels(1700, 900), 11);
    }

    #[test]
    fn zero_extent_still_has_one_level() {
        assert_eq!(mip_levels(0, 0), 1);
    }

    #[test]
    fn depth_formats_get_depth_aspect() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_for_format(vk::Format::D24_UNORM_S8_UINT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_for_format(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_for_format(vk::Format::R16G16B16A16_SFLOAT), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn barrier_aspect_follows_target_layout() {
        assert_eq!(
            aspect_for_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH,
        );
        assert_eq!(aspect_for_layout(vk::ImageLayout::GENERAL), vk::ImageAspectFlags::COLOR);
        assert_eq!(
            aspect_for_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::ImageAspectFlags::COLOR,
        );
    }
}
