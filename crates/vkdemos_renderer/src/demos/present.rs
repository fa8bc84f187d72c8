//! The swapchain frame loop shared by the windowed demos

use anyhow::Context;
use ash::vk;
use image::RgbImage;
use log::{debug, info};
use winit::window::Window;

use crate::readback::copy_to_rgb;
use crate::vulkan::{
    CommandBufferRecorder, Device, FrameSync, ImagesInFlight, Swapchain, VulkanContext, next_frame,
};

/// Frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// A swapchain with one pre-recorded command buffer per image, presented with
/// [`FRAMES_IN_FLIGHT`] frames in flight.
pub struct Presenter {
    command_buffers: Vec<vk::CommandBuffer>,
    frames: Vec<FrameSync>,
    images_in_flight: ImagesInFlight,
    current_frame: usize,
    wait_stage: vk::PipelineStageFlags,
    swapchain: Swapchain,
    device: ash::Device,
}

impl Presenter {
    /// Creates a swapchain for the context's surface, sized after `window`.
    ///
    /// Submissions wait for the acquired image at `wait_stage`.
    pub fn new(
        context: &VulkanContext,
        window: &Window,
        usage: vk::ImageUsageFlags,
        wait_stage: vk::PipelineStageFlags,
    ) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            context.instance(),
            context.device(),
            context.physical_device(),
            context.surface()?,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            usage,
        )?;

        let image_count = swapchain.image_count();
        let command_buffers = context
            .command_pool()
            .allocate_command_buffers(image_count as u32)?;
        let frames = FrameSync::new_frames(context.device(), FRAMES_IN_FLIGHT)?;

        Ok(Self {
            command_buffers,
            frames,
            images_in_flight: ImagesInFlight::new(image_count),
            current_frame: 0,
            wait_stage,
            swapchain,
            device: context.device().handle().clone(),
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Records the command buffer of every swapchain image. `record` gets the image index.
    pub fn record(
        &self,
        device: &Device,
        mut record: impl FnMut(&mut CommandBufferRecorder<'_>, usize) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        for (index, &command_buffer) in self.command_buffers.iter().enumerate() {
            let mut recorder = CommandBufferRecorder::begin(
                device,
                command_buffer,
                vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
            )?;
            record(&mut recorder, index)?;
            recorder.end()?;
        }
        debug!("Recorded {} swapchain command buffers", self.command_buffers.len());
        Ok(())
    }

    /// Acquires an image, submits its command buffer and presents it.
    pub fn draw_frame(&mut self, device: &Device) -> anyhow::Result<()> {
        let frame = &self.frames[self.current_frame];
        frame.in_flight.wait()?;

        let image_index = self.swapchain.acquire_next_image(&frame.image_available)?;
        if let Some(previous) = self
            .images_in_flight
            .claim(image_index as usize, self.current_frame)
        {
            self.frames[previous].in_flight.wait()?;
        }
        frame.in_flight.reset()?;

        let command_buffer = *self
            .command_buffers
            .get(image_index as usize)
            .with_context(|| format!("No command buffer for swapchain image {image_index}"))?;
        device.submit(
            &[command_buffer],
            &[frame.image_available.handle()],
            &[self.wait_stage],
            &[frame.render_finished.handle()],
            frame.in_flight.handle(),
        )?;
        self.swapchain
            .present(image_index, &frame.render_finished, device.queue())?;

        self.current_frame = next_frame(self.current_frame, FRAMES_IN_FLIGHT);
        Ok(())
    }

    /// Waits for the GPU and reads back swapchain image `index`, which must have been presented.
    pub fn read_image(&self, context: &VulkanContext, index: usize) -> anyhow::Result<RgbImage> {
        context.device().wait_idle()?;
        let image = *self
            .swapchain
            .images()
            .get(index)
            .with_context(|| format!("Swapchain has no image {index}"))?;
        info!("Reading back swapchain image {index}");
        copy_to_rgb(
            context,
            image,
            self.swapchain.format(),
            self.swapchain.extent(),
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        // Semaphores and fences may still be in use by the last frames
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}
