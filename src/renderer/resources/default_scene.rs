use std::path::Path;
use ash::vk;
use color_eyre::Result;
use glam::{Mat4, Vec3, Vec4};
use gpu_allocator::MemoryLocation;
use crate::renderer::core::immediate::ImmediateSubmit;
use crate::renderer::internals::deletion_queue::DeletionQueue;
use crate::renderer::internals::descriptors::{DescriptorAllocatorGrowable, PoolSizeRatio};
use crate::renderer::resources::allocator::ResourceAllocator;
use crate::renderer::resources::material::{MaterialPass, MaterialResources, MetallicRoughnessMaterial};
use crate::renderer::resources::image::AllocatedImage;
use crate::renderer::resources::mesh::{GeoSurface, MeshDrawInfo, MeshData};
use crate::renderer::resources::texture::{load_texture, DefaultTextures};
use crate::renderer::scene::{MeshId, NodeKind, Scene};
use crate::renderer::shader_data::MaterialConstants;

const MATERIAL_DESCRIPTOR_SETS: u32 = 16;
const MATERIAL_DESCRIPTOR_RATIOS: [PoolSizeRatio; 3] = [
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 1.0),
];

const GROUND: MeshId = MeshId(0);
const CRATE: MeshId = MeshId(1);
const GLASS: MeshId = MeshId(2);

/// Formats and layouts the scene's pipelines must match
pub struct SceneTargets {
    pub scene_data_layout: vk::DescriptorSetLayout,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

/// Loads the optional ground texture, logging and skipping it when it cannot be read
fn load_ground_texture(
    path: Option<&Path>,
    resources: &ResourceAllocator,
    immediate: &ImmediateSubmit,
) -> Option<AllocatedImage> {
    let path = path?;
    match load_texture(path, resources, immediate) {
        Ok(image) => Some(image),
        Err(e) => {
            log::warn!("Ground texture {} unusable, using the error texture: {e:#}", path.display());
            None
        }
    }
}

/// Built-in scene: a checkered ground plane, a row of crates and one additive glass cube.
///
/// Every GPU object it creates is handed to `deletion_queue`; the returned scene and draw
/// infos only hold plain handles.
pub fn load_default_scene(
    resources: &ResourceAllocator,
    immediate: &ImmediateSubmit,
    shader_dir: &Path,
    ground_texture: Option<&Path>,
    targets: &SceneTargets,
    deletion_queue: &mut DeletionQueue,
) -> Result<(Scene, Vec<MeshDrawInfo>)> {
    let device = resources.device().clone();

    let textures = DefaultTextures::new(resources, immediate)?;
    let ground_image = load_ground_texture(ground_texture, resources, immediate);
    let (ground_view, ground_sampler) = match &ground_image {
        Some(image) => (image.view, textures.sampler_linear),
        None => (textures.error_checkerboard.view, textures.sampler_nearest),
    };

    let mut material = MetallicRoughnessMaterial::new(
        &device,
        shader_dir,
        targets.scene_data_layout,
        targets.color_format,
        targets.depth_format,
    )?;
    let mut material_descriptors = DescriptorAllocatorGrowable::init(
        device.as_ref(),
        MATERIAL_DESCRIPTOR_SETS,
        &MATERIAL_DESCRIPTOR_RATIOS,
    )?;

    let constants = [
        MaterialConstants::new(Vec4::ONE, Vec4::new(1.0, 0.5, 0.0, 0.0)),
        MaterialConstants::new(Vec4::new(0.9, 0.6, 0.3, 1.0), Vec4::new(0.0, 0.8, 0.0, 0.0)),
        MaterialConstants::new(Vec4::new(0.2, 0.5, 1.0, 0.4), Vec4::new(0.0, 0.1, 0.0, 0.0)),
    ];
    let mut material_data = resources.create_buffer(
        size_of_val(&constants) as vk::DeviceSize,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        MemoryLocation::CpuToGpu,
        "material constants",
    )?;
    resources.write_buffer(&mut material_data, &constants, 0)?;

    let stride = size_of::<MaterialConstants>() as vk::DeviceSize;
    let material_inputs = |index: u64, color_view, color_sampler| MaterialResources {
        color_view,
        color_sampler,
        metal_rough_view: textures.white.view,
        metal_rough_sampler: textures.sampler_linear,
        data_buffer: material_data.handle,
        data_buffer_offset: index * stride,
    };

    let ground_material = material.write_material(
        &device,
        MaterialPass::MainColor,
        &material_inputs(0, ground_view, ground_sampler),
        &mut material_descriptors,
    )?;
    let crate_material = material.write_material(
        &device,
        MaterialPass::MainColor,
        &material_inputs(1, textures.white.view, textures.sampler_linear),
        &mut material_descriptors,
    )?;
    let glass_material = material.write_material(
        &device,
        MaterialPass::Transparent,
        &material_inputs(2, textures.grey.view, textures.sampler_linear),
        &mut material_descriptors,
    )?;

    let plane = MeshData::plane(200.0, 50.0, Vec4::ONE);
    let ground_buffers = resources.upload_mesh(&plane.indices, &plane.vertices, immediate)?;
    let cube = MeshData::cube(2.0, Vec4::ONE);
    let cube_buffers = resources.upload_mesh(&cube.indices, &cube.vertices, immediate)?;

    let whole = |index_count, instance| {
        vec![GeoSurface {
            start_index: 0,
            count: index_count,
            material: instance,
        }]
    };
    // Indexed by MeshId
    let meshes = vec![
        MeshDrawInfo {
            index_buffer: ground_buffers.index_buffer.handle,
            vertex_buffer_address: ground_buffers.vertex_buffer_address,
            surfaces: whole(ground_buffers.index_count, ground_material),
        },
        MeshDrawInfo {
            index_buffer: cube_buffers.index_buffer.handle,
            vertex_buffer_address: cube_buffers.vertex_buffer_address,
            surfaces: whole(cube_buffers.index_count, crate_material),
        },
        MeshDrawInfo {
            index_buffer: cube_buffers.index_buffer.handle,
            vertex_buffer_address: cube_buffers.vertex_buffer_address,
            surfaces: whole(cube_buffers.index_count, glass_material),
        },
    ];

    let mut scene = Scene::new();
    let root = scene.add_node(None, Mat4::IDENTITY, NodeKind::Empty)?;
    scene.add_node(
        Some(root),
        Mat4::from_translation(Vec3::new(0.0, -2.0, 0.0)),
        NodeKind::Mesh(GROUND),
    )?;
    let row = scene.add_node(
        Some(root),
        Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0)),
        NodeKind::Empty,
    )?;
    for x in -3..3 {
        scene.add_node(
            Some(row),
            Mat4::from_translation(Vec3::new(x as f32 * 4.0 + 2.0, -1.2, 0.0))
                * Mat4::from_scale(Vec3::splat(0.8)),
            NodeKind::Mesh(CRATE),
        )?;
    }
    scene.add_node(
        Some(row),
        Mat4::from_translation(Vec3::new(0.0, 3.0, -4.0)) * Mat4::from_scale(Vec3::splat(1.5)),
        NodeKind::Mesh(GLASS),
    )?;

    let res = resources.clone();
    deletion_queue.push(move || {
        res.destroy_mesh(ground_buffers);
        res.destroy_mesh(cube_buffers);
        res.destroy_buffer(material_data);
        material_descriptors.destroy_pools(res.device().as_ref());
        material.destroy(res.device());
        if let Some(image) = ground_image {
            res.destroy_image(image);
        }
        textures.destroy(&res);
    });

    log::info!("Default scene loaded: {} nodes, {} meshes", scene.len(), meshes.len());
    Ok((scene, meshes))
}
