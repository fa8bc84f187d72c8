//! Command pool and command buffer recording

use anyhow::Context;
use ash::vk;
use log::{debug, warn};

use super::image::{COLOR_LAYERS, COLOR_RANGE};
use super::{
    ComputePipeline, Device, Fence, Framebuffer, GraphicsPipeline, RenderPass, full_viewport,
};

/// Manages a Vulkan command pool and provides command buffer allocation.
pub struct CommandPool {
    handle: vk::CommandPool,
    device: ash::Device,
}

impl CommandPool {
    /// Creates a command pool for the device's queue family.
    ///
    /// The pool is created with the `RESET_COMMAND_BUFFER` flag, allowing individual command
    /// buffers to be reset and re-recorded.
    pub fn new(device: &Device) -> anyhow::Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let handle = unsafe { device.handle().create_command_pool(&create_info, None) }
            .context("Failed to create command pool")?;

        debug!(
            "Created command pool for queue family {}",
            device.queue_family()
        );

        Ok(Self {
            handle,
            device: device.handle().clone(),
        })
    }

    /// Allocates a single primary command buffer.
    pub fn allocate_command_buffer(&self) -> anyhow::Result<vk::CommandBuffer> {
        let buffers = self.allocate_command_buffers(1)?;
        buffers
            .into_iter()
            .next()
            .context("Driver returned no command buffer")
    }

    /// Allocates multiple primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> anyhow::Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let command_buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .context("Failed to allocate command buffers")?;

        debug!("Allocated {} primary command buffers", count);

        Ok(command_buffers)
    }

    /// Frees command buffers back to the pool.
    pub fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        unsafe {
            self.device.free_command_buffers(self.handle, buffers);
        }
    }

    /// Records commands with `record`, submits them and blocks until the GPU finished.
    pub fn run_one_time<T>(
        &self,
        device: &Device,
        record: impl FnOnce(&mut CommandBufferRecorder<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let command_buffer = self.allocate_command_buffer()?;
        let submitted: anyhow::Result<(T, Fence)> = (|| {
            let mut recorder = CommandBufferRecorder::begin_one_time(device, command_buffer)?;
            let value = record(&mut recorder)?;
            recorder.end()?;

            let fence = Fence::new(device, false)?;
            device.submit(&[command_buffer], &[], &[], &[], fence.handle())?;
            Ok((value, fence))
        })();
        let (value, fence) = match submitted {
            Ok(submitted) => submitted,
            Err(err) => {
                self.free_command_buffers(&[command_buffer]);
                return Err(err);
            }
        };

        finish_submission(
            || fence.wait(),
            || device.wait_idle(),
            || self.free_command_buffers(&[command_buffer]),
        )?;
        Ok(value)
    }
}

/// Waits for a submitted command buffer and frees it.
///
/// A failed fence wait leaves the buffer possibly pending, so the whole device is drained before
/// the buffer is freed. The wait error is returned either way.
fn finish_submission(
    wait: impl FnOnce() -> anyhow::Result<()>,
    wait_idle: impl FnOnce() -> anyhow::Result<()>,
    free: impl FnOnce(),
) -> anyhow::Result<()> {
    let waited = wait();
    if let Err(err) = &waited {
        debug!("Fence wait failed ({err:#}), waiting for the device");
        if let Err(idle_err) = wait_idle() {
            warn!("Failed to wait for device idle: {idle_err:#}");
        }
    }
    free();
    waited
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        debug!("Destroying command pool");
        unsafe {
            self.device.destroy_command_pool(self.handle, None);
        }
    }
}

/// A layout transition of the whole color aspect of an image.
#[derive(Debug, Clone, Copy)]
pub struct LayoutTransition {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl LayoutTransition {
    fn barrier(&self) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(COLOR_RANGE)
    }
}

/// Helper for recording commands into a command buffer.
pub struct CommandBufferRecorder<'a> {
    device: &'a Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> CommandBufferRecorder<'a> {
    /// Begins recording commands into a command buffer.
    pub fn begin(
        device: &'a Device,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> anyhow::Result<Self> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(usage);

        unsafe {
            device
                .handle()
                .begin_command_buffer(command_buffer, &begin_info)
        }
        .context("Failed to begin command buffer")?;

        Ok(Self {
            device,
            command_buffer,
        })
    }

    /// Begins recording with one-time submit usage.
    pub fn begin_one_time(
        device: &'a Device,
        command_buffer: vk::CommandBuffer,
    ) -> anyhow::Result<Self> {
        Self::begin(
            device,
            command_buffer,
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        )
    }

    /// Begins a render pass covering the whole framebuffer.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        clear_values: &[vk::ClearValue],
    ) {
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: framebuffer.extent(),
        };

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    /// Advances to the next subpass of the current render pass.
    pub fn next_subpass(&mut self) {
        unsafe {
            self.device
                .handle()
                .cmd_next_subpass(self.command_buffer, vk::SubpassContents::INLINE);
        }
    }

    /// Ends the current render pass.
    pub fn end_render_pass(&mut self) {
        unsafe {
            self.device
                .handle()
                .cmd_end_render_pass(self.command_buffer);
        }
    }

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&mut self, pipeline: &GraphicsPipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }
    }

    /// Binds a compute pipeline.
    pub fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.handle(),
            );
        }
    }

    /// Binds descriptor sets at `bind_point`.
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.command_buffer,
                bind_point,
                pipeline_layout,
                0,
                descriptor_sets,
                &[],
            );
        }
    }

    /// Binds vertex buffers starting at binding 0.
    pub fn bind_vertex_buffers(&mut self, buffers: &[vk::Buffer]) {
        let offsets = vec![0; buffers.len()];
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.command_buffer, 0, buffers, &offsets);
        }
    }

    /// Pushes constants at offset 0.
    pub fn push_constants(
        &mut self,
        pipeline_layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        bytes: &[u8],
    ) {
        unsafe {
            self.device.handle().cmd_push_constants(
                self.command_buffer,
                pipeline_layout,
                stages,
                0,
                bytes,
            );
        }
    }

    /// Draws vertices.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw(
                self.command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// Sets the dynamic viewport and scissor to cover `extent`.
    pub fn set_viewport_fullscreen(&mut self, extent: vk::Extent2D) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.command_buffer, 0, &[full_viewport(extent)]);
            self.device
                .handle()
                .cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
    }

    /// Dispatches compute work groups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_dispatch(self.command_buffer, x, y, z);
        }
    }

    /// Records image layout transitions between `src_stage` and `dst_stage`.
    pub fn transition_images(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        transitions: &[LayoutTransition],
    ) {
        let barriers: Vec<_> = transitions.iter().map(LayoutTransition::barrier).collect();
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
    }

    /// Copies the whole color aspect of `src` to `dst`, both of size `extent`.
    pub fn copy_image(&mut self, src: vk::Image, dst: vk::Image, extent: vk::Extent2D) {
        let region = vk::ImageCopy {
            src_subresource: COLOR_LAYERS,
            src_offset: vk::Offset3D::default(),
            dst_subresource: COLOR_LAYERS,
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.handle().cmd_copy_image(
                self.command_buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Blits `src` scaled onto the whole of `dst`.
    pub fn blit_image(
        &mut self,
        src: vk::Image,
        src_extent: vk::Extent2D,
        dst: vk::Image,
        dst_extent: vk::Extent2D,
    ) {
        let corner = |extent: vk::Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let region = vk::ImageBlit {
            src_subresource: COLOR_LAYERS,
            src_offsets: [vk::Offset3D::default(), corner(src_extent)],
            dst_subresource: COLOR_LAYERS,
            dst_offsets: [vk::Offset3D::default(), corner(dst_extent)],
        };
        unsafe {
            self.device.handle().cmd_blit_image(
                self.command_buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }
    }

    /// Ends recording and returns the command buffer.
    pub fn end(self) -> anyhow::Result<vk::CommandBuffer> {
        unsafe { self.device.handle().end_command_buffer(self.command_buffer) }
            .context("Failed to end command buffer")?;

        Ok(self.command_buffer)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn successful_wait_frees_without_draining() {
        let calls = RefCell::new(Vec::new());
        finish_submission(
            || {
                calls.borrow_mut().push("wait");
                Ok(())
            },
            || {
                calls.borrow_mut().push("wait_idle");
                Ok(())
            },
            || calls.borrow_mut().push("free"),
        )
        .unwrap();
        assert_eq!(*calls.borrow(), ["wait", "free"]);
    }

    #[test]
    fn failed_wait_drains_device_before_free() {
        let calls = RefCell::new(Vec::new());
        let result = finish_submission(
            || {
                calls.borrow_mut().push("wait");
                anyhow::bail!("device lost")
            },
            || {
                calls.borrow_mut().push("wait_idle");
                Ok(())
            },
            || calls.borrow_mut().push("free"),
        );
        assert_eq!(result.unwrap_err().to_string(), "device lost");
        assert_eq!(*calls.borrow(), ["wait", "wait_idle", "free"]);
    }

    #[test]
    fn failed_drain_keeps_wait_error() {
        let result = finish_submission(
            || anyhow::bail!("timeout"),
            || anyhow::bail!("device lost"),
            || {},
        );
        assert_eq!(result.unwrap_err().to_string(), "timeout");
    }
}
