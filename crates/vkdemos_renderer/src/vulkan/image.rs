//! Image and image view management

use anyhow::Context;
use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use log::{debug, warn};

use super::{Device, MemoryAllocator};

/// Usages that need an image view.
const VIEW_USAGES: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::INPUT_ATTACHMENT.as_raw(),
);

/// Describes a single-mip 2D image.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub tiling: vk::ImageTiling,
    pub location: MemoryLocation,
    pub initial_layout: vk::ImageLayout,
}

impl ImageDesc {
    /// An optimally tiled image in device local memory.
    pub fn device_local(
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            format,
            extent,
            usage,
            tiling: vk::ImageTiling::OPTIMAL,
            location: MemoryLocation::GpuOnly,
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }

    /// A linearly tiled image the CPU can read and write through a mapping.
    ///
    /// `location` selects whether the CPU mostly writes (`CpuToGpu`) or reads (`GpuToCpu`).
    pub fn linear(
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        location: MemoryLocation,
    ) -> Self {
        Self {
            format,
            extent,
            usage,
            tiling: vk::ImageTiling::LINEAR,
            location,
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }

    /// Starts the image in `PREINITIALIZED` so host writes survive the first transition.
    pub fn preinitialized(mut self) -> Self {
        self.initial_layout = vk::ImageLayout::PREINITIALIZED;
        self
    }

    /// The `VkImageCreateInfo` for this description.
    pub fn create_info<'a>(&self) -> vk::ImageCreateInfo<'a> {
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(self.tiling)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(self.initial_layout)
    }
}

/// A Vulkan image with its memory allocation and, when the usage needs one, a view.
pub struct Image {
    image: vk::Image,
    allocation: Option<Allocation>,
    view: Option<vk::ImageView>,
    desc: ImageDesc,
    allocator: MemoryAllocator,
    device: ash::Device,
}

impl Image {
    /// Creates an image as described by `desc` and binds freshly allocated memory to it.
    pub fn new(
        device: &Device,
        allocator: &MemoryAllocator,
        name: &str,
        desc: &ImageDesc,
    ) -> anyhow::Result<Self> {
        let image = unsafe { device.handle().create_image(&desc.create_info(), None) }
            .with_context(|| format!("Failed to create image {name}"))?;

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };
        let linear = desc.tiling == vk::ImageTiling::LINEAR;
        let allocation = match allocator.allocate(name, requirements, desc.location, linear) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(err);
            }
        };

        let mut result = Self {
            image,
            allocation: Some(allocation),
            view: None,
            desc: *desc,
            allocator: allocator.clone(),
            device: device.handle().clone(),
        };

        if let Some(allocation) = &result.allocation {
            unsafe {
                device
                    .handle()
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
            }
            .with_context(|| format!("Failed to bind memory of image {name}"))?;
        }

        if desc.usage.intersects(VIEW_USAGES) {
            result.view = Some(create_view(device.handle(), image, desc.format)?);
        }

        debug!(
            "Created image {name}: {}x{} format={:?} tiling={:?}",
            desc.extent.width, desc.extent.height, desc.format, desc.tiling
        );

        Ok(result)
    }

    /// Returns the Vulkan image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Returns the image view.
    pub fn view(&self) -> anyhow::Result<vk::ImageView> {
        self.view
            .with_context(|| format!("Image with usage {:?} has no view", self.desc.usage))
    }

    /// Returns the image format.
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Returns the image extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Returns the layout of the color aspect. Only meaningful for linear images.
    pub fn subresource_layout(&self) -> vk::SubresourceLayout {
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        unsafe {
            self.device
                .get_image_subresource_layout(self.image, subresource)
        }
    }

    /// The mapped memory of a host visible image, starting at the image's binding offset.
    pub fn mapped_bytes(&self) -> anyhow::Result<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .context("Image memory is not host visible")
    }

    /// Mutable access to the mapped memory of a host visible image.
    pub fn mapped_bytes_mut(&mut self) -> anyhow::Result<&mut [u8]> {
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Image memory is not host visible")
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.view.take() {
                self.device.destroy_image_view(view, None);
            }
            // The image must go before its memory
            self.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(err) = self.allocator.free(allocation) {
                warn!("{err:#}");
            }
        }
        debug!("Destroyed image");
    }
}

/// Creates a 2D color view of `image`.
pub fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> anyhow::Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(COLOR_RANGE);

    unsafe { device.create_image_view(&view_info, None) }.context("Failed to create image view")
}

/// The whole color aspect of a single-mip, single-layer image.
pub const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// The color aspect of mip 0, layer 0, for copies and blits.
pub const COLOR_LAYERS: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_description_is_host_accessible() {
        let desc = ImageDesc::linear(
            vk::Format::R8G8B8A8_UNORM,
            vk::Extent2D {
                width: 256,
                height: 128,
            },
            vk::ImageUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        );
        let info = desc.create_info();
        assert_eq!(info.tiling, vk::ImageTiling::LINEAR);
        assert_eq!(info.extent.width, 256);
        assert_eq!(info.extent.height, 128);
        assert_eq!(info.extent.depth, 1);
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn preinitialized_keeps_host_writes() {
        let desc = ImageDesc::linear(
            vk::Format::R8G8B8A8_UNORM,
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            vk::ImageUsageFlags::STORAGE,
            MemoryLocation::CpuToGpu,
        )
        .preinitialized();
        assert_eq!(
            desc.create_info().initial_layout,
            vk::ImageLayout::PREINITIALIZED
        );
    }

    #[test]
    fn transfer_only_images_need_no_view() {
        assert!(!vk::ImageUsageFlags::TRANSFER_DST.intersects(VIEW_USAGES));
        assert!(
            (vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .intersects(VIEW_USAGES)
        );
        assert!(vk::ImageUsageFlags::STORAGE.intersects(VIEW_USAGES));
    }
}
