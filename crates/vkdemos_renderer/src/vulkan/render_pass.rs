//! Render pass management

use anyhow::Context;
use ash::vk;
use log::debug;

use super::Device;

/// Represents a Vulkan render pass.
///
/// A render pass describes the structure of framebuffer attachments and
/// how they are used during rendering operations.
pub struct RenderPass {
    /// The Vulkan render pass handle
    handle: vk::RenderPass,
    /// The device that owns this render pass
    device: ash::Device,
}

impl RenderPass {
    /// Creates a render pass from explicit attachments, subpasses and dependencies.
    pub fn new(
        device: &Device,
        attachments: &[vk::AttachmentDescription],
        subpasses: &[vk::SubpassDescription],
        dependencies: &[vk::SubpassDependency],
    ) -> anyhow::Result<Self> {
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let handle = unsafe { device.handle().create_render_pass(&create_info, None) }
            .context("Failed to create render pass")?;

        debug!(
            "Created render pass with {} attachments and {} subpasses",
            attachments.len(),
            subpasses.len()
        );

        Ok(Self {
            handle,
            device: device.handle().clone(),
        })
    }

    /// Creates a render pass for a single cleared color attachment.
    ///
    /// `final_layout` is the layout the attachment is left in, e.g. `PRESENT_SRC_KHR` for
    /// swapchain images.
    pub fn new_single_color(
        device: &Device,
        format: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> anyhow::Result<Self> {
        let attachments = [cleared_color_attachment(format, final_layout)];
        let color_attachment_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        // Wait for the previous user of the image before writing to it
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)];

        let render_pass = Self::new(device, &attachments, &subpasses, &dependencies)?;
        debug!(
            "Single color render pass: format {:?}, final layout {:?}",
            format, final_layout
        );
        Ok(render_pass)
    }

    /// Returns the render pass handle.
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.handle, None);
        }
        debug!("Destroyed render pass");
    }
}

/// A color attachment that is cleared on load and stored at the end of the pass.
pub fn cleared_color_attachment(
    format: vk::Format,
    final_layout: vk::ImageLayout,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(final_layout)
}

/// Clear value for an opaque black color attachment.
pub const CLEAR_BLACK: vk::ClearValue = vk::ClearValue {
    color: vk::ClearColorValue {
        float32: [0.0, 0.0, 0.0, 1.0],
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_attachment_starts_undefined() {
        let attachment = cleared_color_attachment(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            attachment.final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }
}
