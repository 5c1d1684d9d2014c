/// "Internals" refers to low-level helpers the "Core" and "Resources" objects are built from.

pub mod deletion_queue;
pub mod descriptor_set_layout_builder;
pub mod descriptors;
pub mod pipeline_builder;
pub mod swapchain;
pub mod util;
