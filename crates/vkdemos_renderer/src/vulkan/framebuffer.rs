//! Framebuffer management

use anyhow::Context;
use ash::vk;
use log::debug;

use super::{Device, RenderPass};

/// Represents a Vulkan framebuffer.
///
/// A framebuffer binds image views to the attachments of a render pass. The views are given
/// in attachment order.
pub struct Framebuffer {
    /// The Vulkan framebuffer handle
    handle: vk::Framebuffer,
    /// The extent (width, height) of the framebuffer
    extent: vk::Extent2D,
    /// The device that owns this framebuffer
    device: ash::Device,
}

impl Framebuffer {
    /// Creates a new framebuffer for `render_pass` from attachment views of size `extent`.
    pub fn new(
        device: &Device,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> anyhow::Result<Self> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let handle = unsafe { device.handle().create_framebuffer(&create_info, None) }
            .context("Failed to create framebuffer")?;

        debug!(
            "Created framebuffer: {}x{} with {} attachments",
            extent.width,
            extent.height,
            attachments.len()
        );

        Ok(Self {
            handle,
            extent,
            device: device.handle().clone(),
        })
    }

    /// Returns the framebuffer handle.
    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    /// Returns the framebuffer extent (width, height).
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.handle, None);
        }
        debug!("Destroyed framebuffer");
    }
}
