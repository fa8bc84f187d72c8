//! Window surface creation

use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use log::{debug, info};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};

use super::Instance;

/// Returns the instance extensions needed to create a surface on `display`.
pub fn required_surface_extensions(display: RawDisplayHandle) -> anyhow::Result<Vec<&'static CStr>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .context("Failed to query the surface extensions for this display")?;
    // SAFETY: ash-window returns pointers to static NUL terminated extension names
    Ok(extensions
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect())
}

/// A presentation surface bound to a window.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for `window`.
    ///
    /// The instance must have been created with [`required_surface_extensions`] enabled and must
    /// outlive the surface.
    pub fn new(
        instance: &Instance,
        window: &(impl HasDisplayHandle + HasWindowHandle),
    ) -> anyhow::Result<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| anyhow::anyhow!("Failed to get display handle: {e}"))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("Failed to get window handle: {e}"))?
            .as_raw();

        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;

        info!("Created window surface");

        Ok(Self {
            handle,
            loader: ash::khr::surface::Instance::new(instance.entry(), instance.handle()),
        })
    }

    /// Returns the surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Whether `queue_family` of `physical_device` can present to this surface.
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> anyhow::Result<bool> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.handle,
            )
        }
        .context("Failed to check surface support")
    }

    /// Returns the surface capabilities for `physical_device`.
    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }
        .context("Failed to get surface capabilities")
    }

    /// Returns the surface formats supported by `physical_device`.
    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
        }
        .context("Failed to get surface formats")
    }

    /// Returns the present modes supported by `physical_device`.
    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }
        .context("Failed to get surface present modes")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Destroyed window surface");
    }
}
