//! The set of core Vulkan objects every demo starts from

use std::ffi::CStr;

use ash::vk;
use log::info;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use super::surface::required_surface_extensions;
use super::{
    CommandPool, Device, DeviceRequest, Instance, InstanceConfig, MemoryAllocator, PhysicalDevice,
    Surface,
};

/// What a demo needs from its Vulkan context.
#[derive(Debug, Clone)]
pub struct ContextConfig<'a> {
    pub application_name: &'a str,
    pub api_version: u32,
    pub validation: bool,
    /// Capabilities the single queue must offer
    pub queue_flags: vk::QueueFlags,
    /// Device extensions that must be present and are enabled
    pub device_extensions: Vec<&'a CStr>,
}

impl Default for ContextConfig<'_> {
    fn default() -> Self {
        Self {
            application_name: "vkdemos",
            api_version: vk::API_VERSION_1_1,
            validation: false,
            queue_flags: vk::QueueFlags::GRAPHICS,
            device_extensions: Vec::new(),
        }
    }
}

/// Holds the core Vulkan objects needed for rendering.
///
/// Fields drop in declaration order: everything created from the device goes before the device,
/// and the surface goes before the instance.
pub struct VulkanContext {
    command_pool: CommandPool,
    allocator: MemoryAllocator,
    device: Device,
    physical_device: PhysicalDevice,
    surface: Option<Surface>,
    instance: Instance,
}

impl VulkanContext {
    /// Creates a context without presentation support.
    pub fn new_headless(config: &ContextConfig) -> anyhow::Result<Self> {
        let instance = Instance::new(&InstanceConfig {
            application_name: config.application_name,
            api_version: config.api_version,
            validation: config.validation,
            ..Default::default()
        })?;
        Self::with_instance(instance, None, config)
    }

    /// Creates a context presenting to `window`.
    ///
    /// The selected queue family can present to the window surface and `VK_KHR_swapchain` is
    /// enabled in addition to the configured extensions.
    pub fn new_for_window(
        config: &ContextConfig,
        window: &(impl HasDisplayHandle + HasWindowHandle),
    ) -> anyhow::Result<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| anyhow::anyhow!("Failed to get display handle: {e}"))?
            .as_raw();
        let instance = Instance::new(&InstanceConfig {
            application_name: config.application_name,
            api_version: config.api_version,
            validation: config.validation,
            required_extensions: required_surface_extensions(display_handle)?,
            ..Default::default()
        })?;
        let surface = Surface::new(&instance, window)?;

        let mut config = config.clone();
        if !config.device_extensions.contains(&ash::khr::swapchain::NAME) {
            config.device_extensions.push(ash::khr::swapchain::NAME);
        }
        Self::with_instance(instance, Some(surface), &config)
    }

    fn with_instance(
        instance: Instance,
        surface: Option<Surface>,
        config: &ContextConfig,
    ) -> anyhow::Result<Self> {
        let physical_device = PhysicalDevice::select(
            &instance,
            &DeviceRequest {
                queue_flags: config.queue_flags,
                extensions: &config.device_extensions,
                surface: surface.as_ref(),
            },
        )?;
        let device = Device::new(&instance, &physical_device, &config.device_extensions)?;
        let allocator = MemoryAllocator::new(&instance, &device, &physical_device)?;
        let command_pool = CommandPool::new(&device)?;

        info!(
            "Vulkan context ready on {} (queue family {})",
            physical_device.name(),
            physical_device.queue_family()
        );

        Ok(Self {
            command_pool,
            allocator,
            device,
            physical_device,
            surface,
            instance,
        })
    }

    /// Returns the instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Returns the selected physical device.
    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    /// Returns the logical device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns the memory allocator.
    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    /// Returns the command pool of the device queue family.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Returns the window surface, if the context was created for a window.
    pub fn surface(&self) -> anyhow::Result<&Surface> {
        self.surface
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Vulkan context was created without a surface"))
    }
}
