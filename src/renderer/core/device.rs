use std::ffi::{c_char, CStr};
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::renderer::resources::allocator::ResourceAllocator;

/// A device queue and the family it was taken from
#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family_index: u32,
}

/// Logical device, its graphics queue and the memory allocator living on top of it
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,

    // For now, require the graphics queue to support presentation
    pub graphics_queue: Queue,

    memory_allocator: Option<Arc<Mutex<Allocator>>>,
}

impl RenderDevice {
    /// Picks a physical device and creates the logical one. Without a surface any
    /// graphics-capable queue is accepted (headless).
    pub fn new(
        instance: &ash::Instance,
        surface: Option<(vk::SurfaceKHR, &ash::khr::surface::Instance)>,
    ) -> Result<Self> {
        let (physical_device, graphics_family) = Self::select_physical_device(instance, surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {:?} ({:?})",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            properties.device_type,
        );

        let (logical_device, graphics_queue) =
            Self::create_logical_device(instance, physical_device, graphics_family)?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            logical: Arc::new(logical_device),
            physical: physical_device,
            graphics_queue,
            memory_allocator: Some(Arc::new(Mutex::new(memory_allocator))),
        })
    }

    /// Handle for creating and releasing buffers and images
    pub fn resources(&self) -> Result<ResourceAllocator> {
        let memory_allocator = self
            .memory_allocator
            .as_ref()
            .ok_or_eyre("Memory allocator already released")?;
        Ok(ResourceAllocator::new(self.logical.clone(), memory_allocator.clone()))
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.logical.device_wait_idle()? };
        Ok(())
    }

    /// Releases the memory allocator, then the device.
    ///
    /// Every `ResourceAllocator` handed out must be dropped before this is called.
    pub fn destroy(&mut self) {
        if let Some(memory_allocator) = self.memory_allocator.take() {
            let outstanding = Arc::strong_count(&memory_allocator) - 1;
            if outstanding > 0 {
                log::warn!("{outstanding} resource allocator handles outlive the device");
            }
            drop(memory_allocator);
        }
        unsafe {
            self.logical.destroy_device(None);
        }
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: Option<(vk::SurfaceKHR, &ash::khr::surface::Instance)>,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let req_device_exts = Self::get_required_device_extensions(surface.is_some());
        unsafe {
            instance
                .enumerate_physical_devices()?
                .into_iter()
                // Filter out devices that do not contain the required device extensions
                .filter(|device| {
                    let supported_extensions = instance
                        .enumerate_device_extension_properties(*device)
                        .unwrap_or_default();

                    req_device_exts.iter().all(|req_ext| {
                        supported_extensions
                            .iter()
                            .any(|sup_ext| sup_ext.extension_name_as_c_str() == Ok(*req_ext))
                    })
                })
                // Filter out devices that cannot run the renderer
                .filter(|device| RequiredDeviceFeatures::new(*device, instance).has_all())
                // Filter out devices without a graphics queue that can present
                .filter_map(|device| {
                    instance
                        .get_physical_device_queue_family_properties(device)
                        .iter()
                        .enumerate()
                        .position(|(i, q)| {
                            let supports_graphics = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                            if let Some((surface, surface_loader)) = surface {
                                let supports_present = surface_loader
                                    .get_physical_device_surface_support(device, i as u32, surface)
                                    .unwrap_or(false);
                                supports_graphics && supports_present
                            } else {
                                supports_graphics
                            }
                        })
                        .map(|index| (device, index as u32))
                })
                .min_by_key(|(device, _)| {
                    let props = instance.get_physical_device_properties(*device);
                    match props.device_type {
                        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                        vk::PhysicalDeviceType::CPU => 3,
                        vk::PhysicalDeviceType::OTHER => 4,
                        _ => 5,
                    }
                })
                .ok_or_eyre("No suitable physical device found")
        }
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_family: u32,
    ) -> Result<(ash::Device, Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_family)
            .queue_priorities(&queue_priorities)];

        // Headless devices still get the swapchain extension when it exists; selection
        // already checked what is required.
        let enabled_extension_names = Self::get_required_device_extensions(true)
            .into_iter()
            .filter(|ext| Self::device_supports(instance, physical_device, ext))
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let mut enabled_features = RequiredDeviceFeatures::new(physical_device, instance);

        // Check if the device supports the required features
        if !enabled_features.has_all() {
            return Err(eyre!("Required features not supported"));
        }

        // Create device
        let device = {
            let mut features = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut enabled_features.vulkan_12_features)
                .push_next(&mut enabled_features.vulkan_13_features);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names)
                .push_next(&mut features);

            unsafe { instance.create_device(physical_device, &device_create_info, None)? }
        };

        let graphics_queue = Queue {
            handle: unsafe { device.get_device_queue(graphics_family, 0) },
            family_index: graphics_family,
        };

        Ok((device, graphics_queue))
    }

    fn device_supports(instance: &ash::Instance, device: vk::PhysicalDevice, ext: &CStr) -> bool {
        unsafe { instance.enumerate_device_extension_properties(device) }
            .unwrap_or_default()
            .iter()
            .any(|props| props.extension_name_as_c_str() == Ok(ext))
    }

    fn get_required_device_extensions(presenting: bool) -> Vec<&'static CStr> {
        let mut exts = Vec::new();
        if presenting {
            exts.push(ash::khr::swapchain::NAME);
        }

        #[cfg(target_os = "macos")]
        exts.push(ash::khr::portability_subset::NAME);

        exts
    }
}

/// Vulkan 1.2 and 1.3 features the renderer cannot run without
struct RequiredDeviceFeatures<'a> {
    pub vulkan_12_features: vk::PhysicalDeviceVulkan12Features<'a>,
    pub vulkan_13_features: vk::PhysicalDeviceVulkan13Features<'a>,
}

impl RequiredDeviceFeatures<'_> {
    pub fn new(physical_device: vk::PhysicalDevice, instance: &ash::Instance) -> Self {
        let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default();

        {
            let mut features = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut vulkan_12_features)
                .push_next(&mut vulkan_13_features);

            // Query physical device features
            unsafe {
                instance.get_physical_device_features2(physical_device, &mut features);
            }
        }

        // Enable only what is used
        Self {
            vulkan_12_features: vk::PhysicalDeviceVulkan12Features::default()
                .buffer_device_address(vulkan_12_features.buffer_device_address == vk::TRUE)
                .descriptor_indexing(vulkan_12_features.descriptor_indexing == vk::TRUE),
            vulkan_13_features: vk::PhysicalDeviceVulkan13Features::default()
                .synchronization2(vulkan_13_features.synchronization2 == vk::TRUE)
                .dynamic_rendering(vulkan_13_features.dynamic_rendering == vk::TRUE),
        }
    }

    pub fn has_all(&self) -> bool {
        self.vulkan_12_features.buffer_device_address == vk::TRUE
            && self.vulkan_12_features.descriptor_indexing == vk::TRUE
            && self.vulkan_13_features.synchronization2 == vk::TRUE
            && self.vulkan_13_features.dynamic_rendering == vk::TRUE
    }
}
