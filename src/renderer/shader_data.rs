use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Vertex as read by the mesh shader through a buffer device address.
/// The UVs are split to keep each row 16 bytes for std430.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

/// Data unique to each draw call passed as a push constant
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct GpuDrawPushConstants {
    pub world_matrix: Mat4,
    pub vertex_buffer_address: u64,
    _padding: u64,
}

impl GpuDrawPushConstants {
    pub fn new(world_matrix: Mat4, vertex_buffer_address: u64) -> Self {
        Self {
            world_matrix,
            vertex_buffer_address,
            _padding: 0,
        }
    }
}

/// Scene-wide values, written once per frame into a fresh uniform buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct GpuSceneData {
    pub view: Mat4,
    pub proj: Mat4,
    pub viewproj: Mat4,
    pub ambient_color: Vec4,
    /// `w` is the sun power
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

/// Four free-form vectors handed to the background compute effects
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ComputePushConstants {
    pub data1: Vec4,
    pub data2: Vec4,
    pub data3: Vec4,
    pub data4: Vec4,
}

/// Per-material uniform block, padded to 256 bytes so instances can share one buffer
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct MaterialConstants {
    pub color_factors: Vec4,
    pub metal_rough_factors: Vec4,
    _padding: [Vec4; 14],
}

impl MaterialConstants {
    pub fn new(color_factors: Vec4, metal_rough_factors: Vec4) -> Self {
        Self {
            color_factors,
            metal_rough_factors,
            _padding: [Vec4::ZERO; 14],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layouts_match_shader_expectations() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        assert_eq!(std::mem::size_of::<ComputePushConstants>(), 64);
        assert_eq!(std::mem::size_of::<GpuSceneData>(), 240);
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 256);
        // Push constants must fit in the guaranteed minimum of 128 bytes
        assert!(std::mem::size_of::<GpuDrawPushConstants>() <= 128);
    }

    #[test]
    fn vertex_address_follows_the_matrix() {
        let constants = GpuDrawPushConstants::new(Mat4::IDENTITY, 0xABCD_0000);
        let bytes = bytemuck::bytes_of(&constants);
        let address = u64::from_ne_bytes(bytes[64..72].try_into().unwrap());
        assert_eq!(address, 0xABCD_0000);
    }
}
