use ash::vk;
use glam::{Vec3, Vec4};
use crate::renderer::resources::buffer::AllocatedBuffer;
use crate::renderer::resources::material::MaterialInstance;
use crate::renderer::shader_data::Vertex;

/// GPU-resident index and vertex buffers of one mesh
#[derive(Debug)]
pub struct GpuMeshBuffers {
    pub index_buffer: AllocatedBuffer,
    pub vertex_buffer: AllocatedBuffer,
    pub vertex_buffer_address: vk::DeviceAddress,
    pub index_count: u32,
}

/// A range of indices drawn with one material
#[derive(Debug, Clone, Copy)]
pub struct GeoSurface {
    pub start_index: u32,
    pub count: u32,
    pub material: MaterialInstance,
}

/// The plain handles a draw needs; the scene traversal never touches the allocations
#[derive(Debug, Clone)]
pub struct MeshDrawInfo {
    pub index_buffer: vk::Buffer,
    pub vertex_buffer_address: vk::DeviceAddress,
    pub surfaces: Vec<GeoSurface>,
}

/// CPU-side geometry ready for `upload_mesh`
#[derive(Debug, Default, Clone)]
pub struct MeshData {
    pub indices: Vec<u32>,
    pub vertices: Vec<Vertex>,
}

impl MeshData {
    /// Axis-aligned cube of the given edge length, four vertices per face so normals stay flat
    pub fn cube(size: f32, color: Vec4) -> Self {
        let half = size * 0.5;
        let faces = [
            (Vec3::X, Vec3::Y),
            (Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::Z),
            (Vec3::Z, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y),
        ];

        let mut mesh = Self::default();
        for (normal, up) in faces {
            let right = up.cross(normal);
            let center = normal * half;
            let corners = [
                (center - right * half - up * half, 0.0, 1.0),
                (center + right * half - up * half, 1.0, 1.0),
                (center + right * half + up * half, 1.0, 0.0),
                (center - right * half + up * half, 0.0, 0.0),
            ];
            mesh.push_quad(corners, normal, color);
        }
        mesh
    }

    /// Flat square in the XZ plane facing +Y, with `tiles` texture repeats per side
    pub fn plane(size: f32, tiles: f32, color: Vec4) -> Self {
        let half = size * 0.5;
        let corners = [
            (Vec3::new(-half, 0.0, half), 0.0, tiles),
            (Vec3::new(half, 0.0, half), tiles, tiles),
            (Vec3::new(half, 0.0, -half), tiles, 0.0),
            (Vec3::new(-half, 0.0, -half), 0.0, 0.0),
        ];
        let mut mesh = Self::default();
        mesh.push_quad(corners, Vec3::Y, color);
        mesh
    }

    fn push_quad(&mut self, corners: [(Vec3, f32, f32); 4], normal: Vec3, color: Vec4) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(corners.iter().map(|(position, uv_x, uv_y)| Vertex {
            position: *position,
            uv_x: *uv_x,
            normal,
            uv_y: *uv_y,
            color,
        }));
        self.indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_normal(mesh: &MeshData, triangle: usize) -> Vec3 {
        let [a, b, c] = [0, 1, 2].map(|i| mesh.vertices[mesh.indices[triangle * 3 + i] as usize].position);
        (b - a).cross(c - a).normalize()
    }

    #[test]
    fn cube_has_six_flat_faces() {
        let mesh = MeshData::cube(2.0, Vec4::ONE);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert!(mesh.indices.iter().all(|i| (*i as usize) < mesh.vertices.len()));

        for vertex in &mesh.vertices {
            assert!(vertex.position.abs().max_element() <= 1.0 + f32::EPSILON);
            // Each vertex sits on the face its normal points at
            assert!((vertex.position.dot(vertex.normal) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn cube_winding_matches_normals() {
        let mesh = MeshData::cube(1.0, Vec4::ONE);
        for triangle in 0..mesh.indices.len() / 3 {
            let expected = mesh.vertices[mesh.indices[triangle * 3] as usize].normal;
            assert!(triangle_normal(&mesh, triangle).abs_diff_eq(expected, 1e-5));
        }
    }

    #[test]
    fn plane_faces_up_and_tiles_uvs() {
        let mesh = MeshData::plane(10.0, 4.0, Vec4::ONE);
        assert_eq!(mesh.indices.len(), 6);
        assert!(mesh.vertices.iter().all(|v| v.normal == Vec3::Y && v.position.y == 0.0));
        assert_eq!(mesh.vertices.iter().map(|v| v.uv_x).fold(0.0, f32::max), 4.0);
        assert!(triangle_normal(&mesh, 0).abs_diff_eq(Vec3::Y, 1e-5));
    }
}
