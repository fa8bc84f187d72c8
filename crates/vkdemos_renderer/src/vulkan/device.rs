//! Logical device creation and queue submission

use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use log::{debug, info};

use super::{Instance, PhysicalDevice};

/// A Vulkan logical device with the single queue the demos submit to.
pub struct Device {
    handle: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
}

impl Device {
    /// Creates a logical device with one queue from the family picked during device selection.
    ///
    /// `extensions` must already have been checked by [`PhysicalDevice::select`].
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDevice,
        extensions: &[&CStr],
    ) -> anyhow::Result<Self> {
        let queue_family = physical_device.queue_family();

        let queue_priorities = [1.0_f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];

        for ext in extensions {
            debug!("Enabling device extension: {:?}", ext);
        }
        let extension_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let device_features = vk::PhysicalDeviceFeatures::default();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&device_features);

        let handle = unsafe {
            instance
                .handle()
                .create_device(physical_device.handle(), &device_create_info, None)
        }
        .context("Failed to create logical device")?;

        info!("Vulkan logical device created");

        let queue = unsafe { handle.get_device_queue(queue_family, 0) };
        debug!("Got queue from family {}", queue_family);

        Ok(Self {
            handle,
            queue,
            queue_family,
        })
    }

    /// Returns the raw Vulkan device handle.
    pub fn handle(&self) -> &ash::Device {
        &self.handle
    }

    /// Returns the queue.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Returns the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Waits for the device to become idle.
    pub fn wait_idle(&self) -> anyhow::Result<()> {
        unsafe { self.handle.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }

    /// Submits command buffers to the queue.
    ///
    /// Waits for `wait_semaphores` at `wait_stages`, signals `signal_semaphores` and `fence`
    /// once the commands complete.
    pub fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> anyhow::Result<()> {
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe { self.handle.queue_submit(self.queue, &[submit_info], fence) }
            .context("Failed to submit to queue")?;

        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        debug!("Destroying Vulkan logical device");
        unsafe {
            let _ = self.handle.device_wait_idle();
            self.handle.destroy_device(None);
        }
    }
}
