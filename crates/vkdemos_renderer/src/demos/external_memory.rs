//! `vktriangle_external_memory`: a producer thread renders into memory it exports, the main
//! thread imports that memory and blits it to a window
//!
//! Both sides own a separate instance and device. The only thing crossing the thread boundary is
//! the exported file descriptor together with the producer's device UUID.

use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use ash::vk;
use log::{debug, error, info, warn};
use vkdemos_shared::{DemoConfig, Handoff};
use winit::window::Window;

use super::present::Presenter;
use super::{RENDER_EXTENT, RENDER_FORMAT, context_config};
use crate::output::write_image;
use crate::readback::copy_to_rgb;
use crate::shaders::ShaderLocator;
use crate::vulkan::{
    CLEAR_BLACK, ContextConfig, EXTERNAL_MEMORY_EXTENSIONS, ExternalImage, Framebuffer,
    GraphicsPipeline, GraphicsPipelineBuilder, ImageDesc, LayoutTransition, RenderPass,
    VulkanContext,
};
use crate::window::{WindowConfig, WindowDemo, run_window};

/// How long the producer keeps a frame before rendering the next color.
const PRODUCER_INTERVAL: Duration = Duration::from_secs(1);

/// Colors `instance_color.vert` cycles through.
const COLOR_COUNT: u32 = 3;

/// What the producer hands to the consumer.
#[derive(Debug)]
pub struct ExportedImage {
    pub fd: OwnedFd,
    pub device_uuid: Option<[u8; vk::UUID_SIZE]>,
}

pub fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let producer = ProducerThread::spawn(config)?;
    let window = WindowConfig {
        title: "vktriangle external memory".to_string(),
        width: 1024,
        height: 512,
    };
    run_window(window, config.frames, move |window| {
        Consumer::new(config, window, producer)
    })
}

/// Both sides describe the shared image identically.
fn shared_image_desc() -> ImageDesc {
    ImageDesc::device_local(
        RENDER_FORMAT,
        RENDER_EXTENT,
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
    )
}

fn external_context_config<'a>(config: &DemoConfig, application_name: &'a str) -> ContextConfig<'a> {
    ContextConfig {
        device_extensions: EXTERNAL_MEMORY_EXTENSIONS.to_vec(),
        ..context_config(config, application_name)
    }
}

/// Fails when both sides know their device UUID and the UUIDs differ.
///
/// Memory can only be shared between instances that run on the same physical device.
pub fn check_same_device(
    producer: Option<[u8; vk::UUID_SIZE]>,
    consumer: Option<[u8; vk::UUID_SIZE]>,
) -> anyhow::Result<()> {
    match (producer, consumer) {
        (Some(producer), Some(consumer)) if producer != consumer => anyhow::bail!(
            "Producer and consumer run on different devices ({} vs {})",
            format_uuid(&producer),
            format_uuid(&consumer)
        ),
        (Some(_), Some(_)) => Ok(()),
        _ => {
            warn!("Device UUID unavailable, assuming both sides share a device");
            Ok(())
        }
    }
}

fn format_uuid(uuid: &[u8]) -> String {
    uuid.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// The color index after `counter`.
pub fn next_color(counter: u32) -> u32 {
    (counter + 1) % COLOR_COUNT
}

/// The producer thread together with the handoff it publishes through.
///
/// Dropping it stops and joins the thread.
struct ProducerThread {
    handoff: Arc<Handoff<ExportedImage>>,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl ProducerThread {
    fn spawn(config: &DemoConfig) -> anyhow::Result<Self> {
        let handoff = Arc::new(Handoff::new());
        let thread_handoff = Arc::clone(&handoff);
        let config = config.clone();
        let handle = std::thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || run_producer(&config, &thread_handoff))
            .context("Failed to spawn producer thread")?;
        Ok(Self {
            handoff,
            handle: Some(handle),
        })
    }

    /// Blocks until the producer published its image.
    fn take_image(&self) -> anyhow::Result<ExportedImage> {
        self.handoff.take()
    }

    /// Asks the producer to stop and waits for it. Later calls do nothing.
    fn stop(&mut self) -> anyhow::Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.handoff.request_stop();
        match handle.join() {
            Ok(result) => result.context("Producer thread failed"),
            Err(_) => anyhow::bail!("Producer thread panicked"),
        }
    }
}

impl Drop for ProducerThread {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("{err:#}");
        }
    }
}

fn run_producer(config: &DemoConfig, handoff: &Handoff<ExportedImage>) -> anyhow::Result<()> {
    let _unpublished = handoff.fail_unless_published("Producer thread exited before publishing");
    let setup = Producer::new(config).and_then(|producer| {
        let fd = producer
            .image
            .export_fd(producer.context.instance(), producer.context.device())?;
        Ok((producer, fd))
    });
    let (producer, fd) = match setup {
        Ok(setup) => setup,
        Err(err) => {
            handoff.fail(format!("{err:#}"));
            return Err(err);
        }
    };

    handoff.publish(ExportedImage {
        fd,
        device_uuid: producer.context.physical_device().device_uuid(),
    })?;
    info!("Published shared image");

    let mut counter = 0;
    loop {
        producer.render(counter)?;
        counter = next_color(counter);
        if handoff.wait_for_stop(PRODUCER_INTERVAL) {
            break;
        }
    }
    info!("Producer stopping");

    let pixels = copy_to_rgb(
        &producer.context,
        producer.image.handle(),
        producer.image.format(),
        producer.image.extent(),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    )?;
    write_image(&config.thread_output, &pixels)
}

struct Producer {
    pipeline: GraphicsPipeline,
    framebuffer: Framebuffer,
    render_pass: RenderPass,
    image: ExternalImage,
    context: VulkanContext,
}

impl Producer {
    fn new(config: &DemoConfig) -> anyhow::Result<Self> {
        let context = VulkanContext::new_headless(&external_context_config(
            config,
            "vktriangle_external_memory producer",
        ))?;
        let device = context.device();
        let shaders = ShaderLocator::new(config.shader_dir.as_deref());

        let image =
            ExternalImage::new_exportable(device, context.physical_device(), &shared_image_desc())?;
        let render_pass = RenderPass::new_single_color(
            device,
            image.format(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )?;
        let framebuffer = Framebuffer::new(device, &render_pass, &[image.view()?], image.extent())?;

        let vertex_shader = shaders.module(device, "instance_color.vert")?;
        let fragment_shader = shaders.module(device, "passthrough.frag")?;
        let pipeline = GraphicsPipelineBuilder::new(device, &render_pass)
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .fixed_viewport(image.extent())
            .build()?;

        Ok(Self {
            pipeline,
            framebuffer,
            render_pass,
            image,
            context,
        })
    }

    /// Renders the triangle in color `counter` and waits for it to finish.
    fn render(&self, counter: u32) -> anyhow::Result<()> {
        let device = self.context.device();
        self.context.command_pool().run_one_time(device, |recorder| {
            recorder.begin_render_pass(&self.render_pass, &self.framebuffer, &[CLEAR_BLACK]);
            recorder.bind_pipeline(&self.pipeline);
            recorder.draw(3, 1, 0, counter);
            recorder.end_render_pass();
            Ok(())
        })?;
        debug!("Producer rendered color {counter}");
        Ok(())
    }
}

struct Consumer {
    presenter: Presenter,
    _imported: ExternalImage,
    context: VulkanContext,
    producer: ProducerThread,
    output: std::path::PathBuf,
}

impl Consumer {
    fn new(config: &DemoConfig, window: &Window, producer: ProducerThread) -> anyhow::Result<Self> {
        let context = VulkanContext::new_for_window(
            &external_context_config(config, "vktriangle_external_memory"),
            window,
        )?;
        let device = context.device();

        let exported = producer.take_image()?;
        check_same_device(exported.device_uuid, context.physical_device().device_uuid())?;
        let imported = ExternalImage::import(
            device,
            context.physical_device(),
            exported.fd,
            &shared_image_desc(),
        )?;

        let presenter = Presenter::new(
            &context,
            window,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::PipelineStageFlags::TRANSFER,
        )?;
        let swapchain = presenter.swapchain();
        let swap_extent = swapchain.extent();
        let swap_images = swapchain.images();

        presenter.record(device, |recorder, index| {
            let swap_image = swap_images[index];
            recorder.transition_images(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                &[
                    LayoutTransition {
                        image: imported.handle(),
                        old_layout: vk::ImageLayout::UNDEFINED,
                        new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        src_access: vk::AccessFlags::TRANSFER_READ,
                        dst_access: vk::AccessFlags::TRANSFER_READ,
                    },
                    LayoutTransition {
                        image: swap_image,
                        old_layout: vk::ImageLayout::UNDEFINED,
                        new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        src_access: vk::AccessFlags::empty(),
                        dst_access: vk::AccessFlags::TRANSFER_WRITE,
                    },
                ],
            );
            recorder.blit_image(imported.handle(), imported.extent(), swap_image, swap_extent);
            recorder.transition_images(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                &[LayoutTransition {
                    image: swap_image,
                    old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_access: vk::AccessFlags::MEMORY_READ,
                }],
            );
            Ok(())
        })?;

        Ok(Self {
            presenter,
            _imported: imported,
            context,
            producer,
            output: config.output.clone(),
        })
    }
}

impl WindowDemo for Consumer {
    fn draw_frame(&mut self) -> anyhow::Result<()> {
        self.presenter.draw_frame(self.context.device())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.producer.stop()?;
        let pixels = self.presenter.read_image(&self.context, 0)?;
        write_image(&self.output, &pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_cycle_through_three_instances() {
        let mut counter = 0;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(counter);
            counter = next_color(counter);
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn different_devices_are_rejected() {
        let first = [1u8; vk::UUID_SIZE];
        let mut second = first;
        second[15] = 2;

        assert!(check_same_device(Some(first), Some(first)).is_ok());
        let err = check_same_device(Some(first), Some(second)).unwrap_err();
        assert!(err.to_string().contains("different devices"));
        assert!(err.to_string().contains("01010101"));
    }

    #[test]
    fn unknown_uuid_is_accepted() {
        assert!(check_same_device(None, Some([0; vk::UUID_SIZE])).is_ok());
        assert!(check_same_device(None, None).is_ok());
    }

    #[test]
    fn shared_image_is_renderable_and_copyable() {
        let desc = shared_image_desc();
        assert_eq!(desc.tiling, vk::ImageTiling::OPTIMAL);
        assert!(desc.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert_eq!(desc.extent, RENDER_EXTENT);
    }

    #[test]
    fn external_context_enables_memory_extensions() {
        let config = external_context_config(&DemoConfig::default(), "test");
        for name in EXTERNAL_MEMORY_EXTENSIONS {
            assert!(config.device_extensions.contains(&name));
        }
        assert!(!config.validation);
    }
}
