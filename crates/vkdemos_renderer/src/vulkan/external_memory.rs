//! Images backed by memory shared between Vulkan instances through opaque file descriptors
//!
//! One side allocates exportable memory and hands out a file descriptor for it. The other side
//! imports that descriptor into an identically described image of its own.

use std::ffi::CStr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};

use anyhow::Context;
use ash::vk;
use log::{debug, info};

use super::image::create_view;
use super::{Device, ImageDesc, Instance, PhysicalDevice};

/// Device extensions both sides of a memory share need.
pub const EXTERNAL_MEMORY_EXTENSIONS: [&CStr; 4] = [
    ash::khr::external_memory::NAME,
    ash::khr::external_memory_fd::NAME,
    ash::khr::dedicated_allocation::NAME,
    ash::khr::get_memory_requirements2::NAME,
];

const HANDLE_TYPE: vk::ExternalMemoryHandleTypeFlags =
    vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD;

/// An image bound to a dedicated allocation that is either exportable or imported.
pub struct ExternalImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: Option<vk::ImageView>,
    desc: ImageDesc,
    device: ash::Device,
}

impl ExternalImage {
    /// Creates an image whose memory can be exported with [`ExternalImage::export_fd`].
    pub fn new_exportable(
        device: &Device,
        physical_device: &PhysicalDevice,
        desc: &ImageDesc,
    ) -> anyhow::Result<Self> {
        let image = create_external_image(device, desc)?;
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::default().image(image);
        let mut export_info = vk::ExportMemoryAllocateInfo::default().handle_types(HANDLE_TYPE);

        let memory = physical_device
            .memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::default()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index)
                    .push_next(&mut dedicated_info)
                    .push_next(&mut export_info);
                unsafe { device.handle().allocate_memory(&alloc_info, None) }
                    .context("Failed to allocate exportable memory")
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(err);
            }
        };

        let external = Self::bind(device, image, memory, desc)?;
        info!(
            "Created exportable image: {}x{} format={:?} ({} bytes)",
            desc.extent.width, desc.extent.height, desc.format, requirements.size
        );
        Ok(external)
    }

    /// Imports memory exported by another instance into an image described by `desc`.
    ///
    /// `desc` must match the exporting side. The file descriptor is closed if the import fails;
    /// otherwise the driver owns it from then on.
    pub fn import(
        device: &Device,
        physical_device: &PhysicalDevice,
        fd: OwnedFd,
        desc: &ImageDesc,
    ) -> anyhow::Result<Self> {
        let image = create_external_image(device, desc)?;
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::default().image(image);
        let mut import_info = vk::ImportMemoryFdInfoKHR::default()
            .handle_type(HANDLE_TYPE)
            .fd(fd.as_raw_fd());

        let memory = physical_device
            .memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::default()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index)
                    .push_next(&mut dedicated_info)
                    .push_next(&mut import_info);
                unsafe { device.handle().allocate_memory(&alloc_info, None) }
                    .context("Failed to import memory from file descriptor")
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(err);
            }
        };

        // A successful import transfers ownership of the descriptor to the driver
        let _ = fd.into_raw_fd();

        let external = Self::bind(device, image, memory, desc)?;
        info!(
            "Imported image: {}x{} format={:?}",
            desc.extent.width, desc.extent.height, desc.format
        );
        Ok(external)
    }

    fn bind(
        device: &Device,
        image: vk::Image,
        memory: vk::DeviceMemory,
        desc: &ImageDesc,
    ) -> anyhow::Result<Self> {
        let mut external = Self {
            image,
            memory,
            view: None,
            desc: *desc,
            device: device.handle().clone(),
        };

        unsafe { device.handle().bind_image_memory(image, memory, 0) }
            .context("Failed to bind external memory to image")?;

        if desc.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
            external.view = Some(create_view(device.handle(), image, desc.format)?);
        }

        Ok(external)
    }

    /// Exports the image memory as a new file descriptor.
    pub fn export_fd(&self, instance: &Instance, device: &Device) -> anyhow::Result<OwnedFd> {
        let loader = ash::khr::external_memory_fd::Device::new(instance.handle(), device.handle());
        let get_info = vk::MemoryGetFdInfoKHR::default()
            .memory(self.memory)
            .handle_type(HANDLE_TYPE);

        let raw_fd = unsafe { loader.get_memory_fd(&get_info) }
            .context("Failed to export memory file descriptor")?;
        if raw_fd < 0 {
            anyhow::bail!("Driver returned an invalid file descriptor {raw_fd}");
        }

        debug!("Exported memory as fd {raw_fd}");

        // SAFETY: vkGetMemoryFdKHR returns a new descriptor owned by the caller
        Ok(unsafe { OwnedFd::from_raw_fd(raw_fd) })
    }

    /// Returns the Vulkan image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Returns the image view.
    pub fn view(&self) -> anyhow::Result<vk::ImageView> {
        self.view.context("External image was created without a view")
    }

    /// Returns the image extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Returns the image format.
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }
}

impl Drop for ExternalImage {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.view.take() {
                self.device.destroy_image_view(view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
        debug!("Destroyed external image");
    }
}

fn create_external_image(device: &Device, desc: &ImageDesc) -> anyhow::Result<vk::Image> {
    let mut external_memory_info =
        vk::ExternalMemoryImageCreateInfo::default().handle_types(HANDLE_TYPE);
    let image_info = desc.create_info().push_next(&mut external_memory_info);

    unsafe { device.handle().create_image(&image_info, None) }
        .context("Failed to create image with external memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_memory_extensions_are_distinct() {
        for (index, name) in EXTERNAL_MEMORY_EXTENSIONS.iter().enumerate() {
            assert!(!EXTERNAL_MEMORY_EXTENSIONS[index + 1..].contains(name));
        }
        assert!(EXTERNAL_MEMORY_EXTENSIONS.contains(&c"VK_KHR_external_memory_fd"));
    }
}
