use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use glam::Mat4;
use crate::renderer::resources::material::{MaterialInstance, MaterialPass};
use crate::renderer::resources::mesh::MeshDrawInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Index into the mesh list handed to [`Scene::draw`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Empty,
    Mesh(MeshId),
}

/// One indexed draw, flattened out of the scene for the geometry pass
#[derive(Debug, Clone, Copy)]
pub struct RenderObject {
    pub index_count: u32,
    pub first_index: u32,
    pub index_buffer: vk::Buffer,
    pub vertex_buffer_address: vk::DeviceAddress,
    pub material: MaterialInstance,
    pub transform: Mat4,
}

#[derive(Debug, Default)]
pub struct DrawContext {
    pub opaque: Vec<RenderObject>,
    pub transparent: Vec<RenderObject>,
}

impl DrawContext {
    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local_transform: Mat4,
    world_transform: Mat4,
    kind: NodeKind,
}

/// Flat node arena. A parent is always stored before its children, so one forward
/// pass is enough to propagate transforms.
#[derive(Debug, Default)]
pub struct Scene {
    nodes: Vec<Node>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        parent: Option<NodeId>,
        local_transform: Mat4,
        kind: NodeKind,
    ) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        let parent_world = match parent {
            Some(parent_id) => {
                let parent_node = self
                    .nodes
                    .get_mut(parent_id.0)
                    .ok_or_else(|| eyre!("Parent node {:?} does not exist", parent_id))?;
                parent_node.children.push(id);
                parent_node.world_transform
            }
            None => Mat4::IDENTITY,
        };

        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            local_transform,
            world_transform: parent_world * local_transform,
            kind,
        });
        Ok(id)
    }

    pub fn set_local_transform(&mut self, id: NodeId, local_transform: Mat4) -> Result<()> {
        let node = self.nodes.get_mut(id.0).ok_or_eyre("No such scene node")?;
        node.local_transform = local_transform;
        Ok(())
    }

    pub fn world_transform(&self, id: NodeId) -> Option<Mat4> {
        self.nodes.get(id.0).map(|node| node.world_transform)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Recomputes every world transform from the local ones
    pub fn refresh_transforms(&mut self) {
        for index in 0..self.nodes.len() {
            let parent_world = self.nodes[index]
                .parent
                .map_or(Mat4::IDENTITY, |parent| self.nodes[parent.0].world_transform);
            let node = &mut self.nodes[index];
            node.world_transform = parent_world * node.local_transform;
        }
    }

    /// Appends one render object per mesh surface, sorted into the context by material pass
    pub fn draw(&self, top: Mat4, meshes: &[MeshDrawInfo], ctx: &mut DrawContext) -> Result<()> {
        for node in &self.nodes {
            let mesh_id = match node.kind {
                NodeKind::Empty => continue,
                NodeKind::Mesh(mesh_id) => mesh_id,
            };
            let mesh = meshes
                .get(mesh_id.0)
                .ok_or_else(|| eyre!("Scene references missing mesh {:?}", mesh_id))?;

            let transform = top * node.world_transform;
            for surface in &mesh.surfaces {
                let object = RenderObject {
                    index_count: surface.count,
                    first_index: surface.start_index,
                    index_buffer: mesh.index_buffer,
                    vertex_buffer_address: mesh.vertex_buffer_address,
                    material: surface.material,
                    transform,
                };
                match surface.material.pass {
                    MaterialPass::MainColor => ctx.opaque.push(object),
                    MaterialPass::Transparent => ctx.transparent.push(object),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use crate::renderer::resources::mesh::GeoSurface;

    fn material(pass: MaterialPass) -> MaterialInstance {
        MaterialInstance {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            descriptor_set: vk::DescriptorSet::null(),
            pass,
        }
    }

    fn mesh(passes: &[MaterialPass]) -> MeshDrawInfo {
        MeshDrawInfo {
            index_buffer: vk::Buffer::null(),
            vertex_buffer_address: 0x1000,
            surfaces: passes
                .iter()
                .enumerate()
                .map(|(i, pass)| GeoSurface {
                    start_index: i as u32 * 6,
                    count: 6,
                    material: material(*pass),
                })
                .collect(),
        }
    }

    #[test]
    fn transforms_propagate_to_descendants() {
        let mut scene = Scene::new();
        let root = scene
            .add_node(None, Mat4::from_translation(Vec3::X), NodeKind::Empty)
            .unwrap();
        let child = scene
            .add_node(Some(root), Mat4::from_translation(Vec3::Y), NodeKind::Empty)
            .unwrap();
        let grandchild = scene
            .add_node(Some(child), Mat4::from_translation(Vec3::Z), NodeKind::Empty)
            .unwrap();

        assert_eq!(scene.children(root), &[child]);
        let origin = |id| scene.world_transform(id).unwrap().transform_point3(Vec3::ZERO);
        assert!(origin(grandchild).abs_diff_eq(Vec3::ONE, 1e-6));

        scene
            .set_local_transform(root, Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)))
            .unwrap();
        scene.refresh_transforms();
        let origin = |id| scene.world_transform(id).unwrap().transform_point3(Vec3::ZERO);
        assert!(origin(grandchild).abs_diff_eq(Vec3::new(10.0, 1.0, 1.0), 1e-6));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut scene = Scene::new();
        assert!(scene.add_node(Some(NodeId(3)), Mat4::IDENTITY, NodeKind::Empty).is_err());
    }

    #[test]
    fn draw_sorts_surfaces_by_pass() {
        let mut scene = Scene::new();
        let root = scene.add_node(None, Mat4::IDENTITY, NodeKind::Empty).unwrap();
        scene
            .add_node(
                Some(root),
                Mat4::from_translation(Vec3::Y),
                NodeKind::Mesh(MeshId(0)),
            )
            .unwrap();
        scene
            .add_node(Some(root), Mat4::IDENTITY, NodeKind::Mesh(MeshId(1)))
            .unwrap();
        let meshes = [
            mesh(&[MaterialPass::MainColor, MaterialPass::Transparent]),
            mesh(&[MaterialPass::MainColor]),
        ];

        let mut ctx = DrawContext::default();
        let top = Mat4::from_translation(Vec3::Z);
        scene.draw(top, &meshes, &mut ctx).unwrap();

        assert_eq!(ctx.opaque.len(), 2);
        assert_eq!(ctx.transparent.len(), 1);
        assert_eq!(ctx.transparent[0].first_index, 6);
        let position = ctx.opaque[0].transform.transform_point3(Vec3::ZERO);
        assert!(position.abs_diff_eq(Vec3::new(0.0, 1.0, 1.0), 1e-6));

        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn missing_mesh_is_an_error() {
        let mut scene = Scene::new();
        scene.add_node(None, Mat4::IDENTITY, NodeKind::Mesh(MeshId(5))).unwrap();
        let mut ctx = DrawContext::default();
        assert!(scene.draw(Mat4::IDENTITY, &[], &mut ctx).is_err());
    }
}
