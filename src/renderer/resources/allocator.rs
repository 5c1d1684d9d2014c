use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use crate::renderer::core::immediate::ImmediateSubmit;
use crate::renderer::internals::util;
use crate::renderer::resources::buffer::AllocatedBuffer;
use crate::renderer::resources::image::{AllocatedImage, ImageDesc};
use crate::renderer::resources::mesh::GpuMeshBuffers;
use crate::renderer::shader_data::Vertex;

/// Creates and releases buffers and images on top of `gpu-allocator`.
///
/// Cheap to clone; teardown closures capture a clone so they can release what they own.
#[derive(Clone)]
pub struct ResourceAllocator {
    device: Arc<ash::Device>,
    memory_allocator: Arc<Mutex<Allocator>>,
}

impl ResourceAllocator {
    pub fn new(device: Arc<ash::Device>, memory_allocator: Arc<Mutex<Allocator>>) -> Self {
        Self { device, memory_allocator }
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<AllocatedBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(handle) };

        let allocation = self
            .memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(handle, None) };
                return Err(e.into());
            }
        };

        unsafe {
            self.device.bind_buffer_memory(handle, allocation.memory(), allocation.offset())?;
        }

        Ok(AllocatedBuffer { handle, size, allocation })
    }

    pub fn destroy_buffer(&self, buffer: AllocatedBuffer) {
        let AllocatedBuffer { handle, allocation, .. } = buffer;
        match self.memory_allocator.lock() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    log::error!("Failed to free buffer allocation: {e}");
                }
            }
            Err(e) => log::error!("Memory allocator lock poisoned while freeing a buffer: {e}"),
        }
        unsafe {
            self.device.destroy_buffer(handle, None);
        }
    }

    /// Host write into a CpuToGpu buffer
    pub fn write_buffer<T: Copy>(
        &self,
        buffer: &mut AllocatedBuffer,
        data: &[T],
        offset: usize,
    ) -> Result<()> {
        buffer.write(data, offset)?;
        log::trace!("Wrote {} bytes at offset {offset}", size_of_val(data));
        Ok(())
    }

    pub fn buffer_device_address(&self, buffer: &AllocatedBuffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer.handle);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    pub fn create_image(&self, desc: &ImageDesc) -> Result<AllocatedImage> {
        let mip_levels = if desc.mipmapped {
            util::mip_levels(desc.extent.width, desc.extent.height)
        } else {
            1
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage);
        let handle = unsafe { self.device.create_image(&image_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(handle) };

        let allocation = self
            .memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name: &desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(handle, None) };
                return Err(e.into());
            }
        };

        unsafe {
            self.device.bind_image_memory(handle, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .image(handle)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: util::aspect_for_format(desc.format),
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&view_info, None)? };

        Ok(AllocatedImage {
            handle,
            view,
            extent: desc.extent,
            format: desc.format,
            mip_levels,
            allocation,
        })
    }

    /// Creates a shader-readable image and fills mip 0 from `data` (tightly packed 4-byte texels)
    pub fn create_image_with_data(
        &self,
        data: &[u8],
        desc: &ImageDesc,
        immediate: &ImmediateSubmit,
    ) -> Result<AllocatedImage> {
        let expected = desc.rgba8_size();
        if data.len() != expected {
            return Err(eyre!(
                "Image '{}' expects {} bytes of texel data, got {}",
                desc.name,
                expected,
                data.len(),
            ));
        }

        let mut staging = self.create_buffer(
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "image staging",
        )?;
        if let Err(e) = staging.write(data, 0) {
            self.destroy_buffer(staging);
            return Err(e);
        }

        let mut upload_desc = desc.clone();
        upload_desc.usage |= vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC;
        let image = match self.create_image(&upload_desc) {
            Ok(image) => image,
            Err(e) => {
                self.destroy_buffer(staging);
                return Err(e);
            }
        };

        let upload = immediate.submit(|cmd, device| {
            util::transition_image(
                device,
                cmd,
                image.handle,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let copy_region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(desc.extent);
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle,
                    image.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy_region],
                );
            }

            if desc.mipmapped {
                util::generate_mipmaps(device, cmd, image.handle, image.extent_2d());
            } else {
                util::transition_image(
                    device,
                    cmd,
                    image.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
            Ok(())
        });

        self.destroy_buffer(staging);

        match upload {
            Ok(()) => Ok(image),
            Err(e) => {
                self.destroy_image(image);
                Err(e)
            }
        }
    }

    /// Copies mip 0 of a shader-readable image back to the host
    pub fn read_image_rgba8(
        &self,
        image: &AllocatedImage,
        immediate: &ImmediateSubmit,
    ) -> Result<Vec<u8>> {
        let size = image.extent.width as usize * image.extent.height as usize * 4;
        let readback = self.create_buffer(
            size as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "image readback",
        )?;

        let copied = immediate.submit(|cmd, device| {
            util::transition_image(
                device,
                cmd,
                image.handle,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );
            let copy_region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(image.extent);
            unsafe {
                device.cmd_copy_image_to_buffer(
                    cmd,
                    image.handle,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    readback.handle,
                    &[copy_region],
                );
            }
            util::transition_image(
                device,
                cmd,
                image.handle,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
            Ok(())
        });

        let bytes = copied.and_then(|()| Ok(readback.mapped_bytes()?[..size].to_vec()));
        self.destroy_buffer(readback);
        bytes
    }

    pub fn destroy_image(&self, image: AllocatedImage) {
        let AllocatedImage { handle, view, allocation, .. } = image;
        unsafe {
            self.device.destroy_image_view(view, None);
        }
        match self.memory_allocator.lock() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    log::error!("Failed to free image allocation: {e}");
                }
            }
            Err(e) => log::error!("Memory allocator lock poisoned while freeing an image: {e}"),
        }
        unsafe {
            self.device.destroy_image(handle, None);
        }
    }

    /// Uploads mesh data into GPU-only buffers through a single staging buffer.
    ///
    /// Vertices are read in the shader through the returned buffer device address.
    pub fn upload_mesh(
        &self,
        indices: &[u32],
        vertices: &[Vertex],
        immediate: &ImmediateSubmit,
    ) -> Result<GpuMeshBuffers> {
        let vertex_bytes = std::mem::size_of_val(vertices);
        let index_bytes = std::mem::size_of_val(indices);
        if vertex_bytes == 0 || index_bytes == 0 {
            return Err(eyre!("Cannot upload an empty mesh"));
        }

        let vertex_buffer = self.create_buffer(
            vertex_bytes as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "mesh vertices",
        )?;
        let vertex_buffer_address = self.buffer_device_address(&vertex_buffer);

        let index_buffer = match self.create_buffer(
            index_bytes as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "mesh indices",
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.destroy_buffer(vertex_buffer);
                return Err(e);
            }
        };

        let mesh = GpuMeshBuffers {
            index_buffer,
            vertex_buffer,
            vertex_buffer_address,
            index_count: indices.len() as u32,
        };

        let staged = self
            .create_buffer(
                (vertex_bytes + index_bytes) as vk::DeviceSize,
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::CpuToGpu,
                "mesh staging",
            )
            .and_then(|mut staging| {
                let written = staging
                    .write(vertices, 0)
                    .and_then(|_| staging.write(indices, vertex_bytes));
                match written {
                    Ok(_) => Ok(staging),
                    Err(e) => {
                        self.destroy_buffer(staging);
                        Err(e)
                    }
                }
            });
        let staging = match staged {
            Ok(staging) => staging,
            Err(e) => {
                self.destroy_mesh(mesh);
                return Err(e);
            }
        };

        let copied = immediate.submit(|cmd, device| {
            let vertex_copy = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: vertex_bytes as vk::DeviceSize,
            };
            let index_copy = vk::BufferCopy {
                src_offset: vertex_bytes as vk::DeviceSize,
                dst_offset: 0,
                size: index_bytes as vk::DeviceSize,
            };
            unsafe {
                device.cmd_copy_buffer(cmd, staging.handle, mesh.vertex_buffer.handle, &[vertex_copy]);
                device.cmd_copy_buffer(cmd, staging.handle, mesh.index_buffer.handle, &[index_copy]);
            }
            Ok(())
        });

        self.destroy_buffer(staging);

        match copied {
            Ok(()) => Ok(mesh),
            Err(e) => {
                self.destroy_mesh(mesh);
                Err(e)
            }
        }
    }

    pub fn destroy_mesh(&self, mesh: GpuMeshBuffers) {
        self.destroy_buffer(mesh.index_buffer);
        self.destroy_buffer(mesh.vertex_buffer);
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use crate::renderer::core::device::RenderDevice;
    use crate::renderer::core::immediate::ImmediateSubmit;
    use crate::renderer::core::instance::RenderInstance;
    use crate::renderer::resources::image::ImageDesc;
    use crate::renderer::resources::texture::{rgba_bytes, MAGENTA};

    #[test]
    #[ignore = "needs a Vulkan 1.3 device"]
    fn staged_texel_reads_back_unchanged() {
        let mut instance = RenderInstance::new(None, false).unwrap();
        let mut device = RenderDevice::new(&instance.instance, None).unwrap();
        let mut immediate =
            ImmediateSubmit::new(device.graphics_queue, device.logical.clone()).unwrap();
        let resources = device.resources().unwrap();

        let desc = ImageDesc::new_2d(
            "magenta texel",
            1,
            1,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        );
        let image = resources
            .create_image_with_data(&rgba_bytes(MAGENTA), &desc, &immediate)
            .unwrap();
        let texels = resources.read_image_rgba8(&image, &immediate).unwrap();
        assert_eq!(texels, rgba_bytes(MAGENTA));

        resources.destroy_image(image);
        drop(resources);
        immediate.destroy();
        device.destroy();
        instance.destroy();
    }
}
