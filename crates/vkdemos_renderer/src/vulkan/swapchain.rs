//! Swapchain management for window surfaces

use anyhow::Context;
use ash::vk;
use log::{debug, info};

use super::image::create_view;
use super::{Device, Instance, PhysicalDevice, Semaphore, Surface};

/// Manages a Vulkan swapchain for presenting to a window surface.
pub struct Swapchain {
    /// The swapchain handle
    handle: vk::SwapchainKHR,
    /// Swapchain images
    images: Vec<vk::Image>,
    /// Image views for the swapchain images
    image_views: Vec<vk::ImageView>,
    /// The swapchain image format
    format: vk::Format,
    /// The swapchain extent
    extent: vk::Extent2D,
    /// Swapchain extension loader
    swapchain_loader: ash::khr::swapchain::Device,
    /// The device that owns this swapchain
    device: ash::Device,
}

impl Swapchain {
    /// Creates a FIFO swapchain for `surface`.
    ///
    /// `window_extent` is used when the surface leaves the extent to the application.
    pub fn new(
        instance: &Instance,
        device: &Device,
        physical_device: &PhysicalDevice,
        surface: &Surface,
        window_extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> anyhow::Result<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let surface_caps = surface.capabilities(physical_device.handle())?;
        let surface_formats = surface.formats(physical_device.handle())?;
        let present_modes = surface.present_modes(physical_device.handle())?;

        let format = choose_surface_format(&surface_formats)
            .context("Surface reports no formats")?;
        info!(
            "Using surface format: {:?} ({:?})",
            format.format, format.color_space
        );

        let present_mode = choose_present_mode(&present_modes, vk::PresentModeKHR::FIFO);
        let extent = choose_extent(&surface_caps, window_extent);
        let image_count = choose_image_count(&surface_caps);
        debug!("Swapchain image count: {}", image_count);

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe { swapchain_loader.create_swapchain(&swapchain_create_info, None) }
            .context("Failed to create swapchain")?;

        info!(
            "Created swapchain: {}x{} {:?}",
            extent.width, extent.height, present_mode
        );

        let mut swapchain = Self {
            handle,
            images: Vec::new(),
            image_views: Vec::new(),
            format: format.format,
            extent,
            swapchain_loader,
            device: device.handle().clone(),
        };

        swapchain.images = unsafe { swapchain.swapchain_loader.get_swapchain_images(handle) }
            .context("Failed to get swapchain images")?;
        debug!("Got {} swapchain images", swapchain.images.len());

        for &image in &swapchain.images {
            let view = create_view(device.handle(), image, format.format)
                .context("Failed to create swapchain image view")?;
            swapchain.image_views.push(view);
        }

        Ok(swapchain)
    }

    /// Acquires the next image from the swapchain.
    ///
    /// Returns the index of the acquired image.
    pub fn acquire_next_image(&self, semaphore: &Semaphore) -> anyhow::Result<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.handle,
                u64::MAX, // timeout
                semaphore.handle(),
                vk::Fence::null(),
            )
        }
        .context("Failed to acquire next swapchain image")?;

        if suboptimal {
            debug!("Swapchain is suboptimal for the surface");
        }

        Ok(index)
    }

    /// Presents an image to the surface.
    pub fn present(
        &self,
        image_index: u32,
        wait_semaphore: &Semaphore,
        queue: vk::Queue,
    ) -> anyhow::Result<()> {
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore.handle()];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
            .context("Failed to present")?;

        Ok(())
    }

    /// Returns the swapchain format.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Returns all swapchain images.
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Returns all image views.
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.handle, None);
        }
        info!("Destroyed swapchain");
    }
}

/// Prefers BGRA8 sRGB with the sRGB nonlinear color space, else the first reported format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Returns `preferred` if available. FIFO is always supported and is the fallback.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the window extent clamped to the surface limits when the
/// surface lets the swapchain decide.
pub fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window_extent
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_extent
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image more than the minimum, bounded by the maximum when the surface has one.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn prefers_bgra_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn current_extent_wins() {
        let current = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let window = vk::Extent2D {
            width: 512,
            height: 512,
        };
        assert_eq!(choose_extent(&caps(2, 3, current), window), current);
    }

    #[test]
    fn window_extent_is_clamped() {
        let window = vk::Extent2D {
            width: 2048,
            height: 32,
        };
        let extent = choose_extent(&caps(2, 3, UNDEFINED_EXTENT), window);
        assert_eq!(extent.width, 1024);
        assert_eq!(extent.height, 64);
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        assert_eq!(choose_image_count(&caps(2, 8, UNDEFINED_EXTENT)), 3);
        assert_eq!(choose_image_count(&caps(3, 3, UNDEFINED_EXTENT)), 3);
        // Zero means no upper bound
        assert_eq!(choose_image_count(&caps(4, 0, UNDEFINED_EXTENT)), 5);
    }
}
