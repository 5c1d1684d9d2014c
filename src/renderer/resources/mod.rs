/// "Resources" refers to middle-level objects created through the "Core" objects.
/// They are relatively intuitive and owned by whoever asked for them.

pub mod allocator;
pub mod buffer;
pub mod default_scene;
pub mod effects;
pub mod image;
pub mod material;
pub mod mesh;
pub mod shader;
pub mod texture;
