//! `vktriangle_window`: presents a triangle from a vertex buffer to a window

use std::path::PathBuf;
use std::time::Duration;

use ash::vk;
use vkdemos_shared::DemoConfig;
use winit::window::Window;

use super::present::Presenter;
use super::{context_config, position_input, triangle_vertex_buffer};
use crate::output::write_image;
use crate::shaders::ShaderLocator;
use crate::vulkan::{
    Buffer, CLEAR_BLACK, Framebuffer, GraphicsPipeline, GraphicsPipelineBuilder, RenderPass,
    VulkanContext,
};
use crate::window::{WindowConfig, WindowDemo, run_window};

/// Pause between presented frames.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(150);

pub fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let window = WindowConfig {
        title: "vktriangle window".to_string(),
        width: 512,
        height: 512,
    };
    run_window(window, config.frames, |window| TriangleWindow::new(config, window))
}

// Fields drop in declaration order. The underscored ones are only referenced by the recorded
// command buffers.
struct TriangleWindow {
    presenter: Presenter,
    _pipeline: GraphicsPipeline,
    _framebuffers: Vec<Framebuffer>,
    _render_pass: RenderPass,
    _vertex_buffer: Buffer,
    context: VulkanContext,
    output: PathBuf,
}

impl TriangleWindow {
    fn new(config: &DemoConfig, window: &Window) -> anyhow::Result<Self> {
        let context =
            VulkanContext::new_for_window(&context_config(config, "vktriangle_window"), window)?;
        let device = context.device();
        let shaders = ShaderLocator::new(config.shader_dir.as_deref());

        let presenter = Presenter::new(
            &context,
            window,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )?;
        let swapchain = presenter.swapchain();
        let extent = swapchain.extent();

        let render_pass = RenderPass::new_single_color(
            device,
            swapchain.format(),
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| Framebuffer::new(device, &render_pass, &[view], extent))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let vertex_buffer = triangle_vertex_buffer(&context)?;
        let vertex_shader = shaders.module(device, "passthrough.vert")?;
        let fragment_shader = shaders.module(device, "passthrough.frag")?;
        let (binding, attributes) = position_input();
        let pipeline = GraphicsPipelineBuilder::new(device, &render_pass)
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .vertex_binding(binding, &attributes)
            .build()?;

        presenter.record(device, |recorder, index| {
            recorder.begin_render_pass(&render_pass, &framebuffers[index], &[CLEAR_BLACK]);
            recorder.bind_pipeline(&pipeline);
            recorder.set_viewport_fullscreen(extent);
            recorder.bind_vertex_buffers(&[vertex_buffer.handle()]);
            recorder.draw(3, 1, 0, 0);
            recorder.end_render_pass();
            Ok(())
        })?;

        Ok(Self {
            presenter,
            _pipeline: pipeline,
            _framebuffers: framebuffers,
            _render_pass: render_pass,
            _vertex_buffer: vertex_buffer,
            context,
            output: config.output.clone(),
        })
    }
}

impl WindowDemo for TriangleWindow {
    fn draw_frame(&mut self) -> anyhow::Result<()> {
        self.presenter.draw_frame(self.context.device())
    }

    fn frame_interval(&self) -> Option<Duration> {
        Some(FRAME_INTERVAL)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        let pixels = self.presenter.read_image(&self.context, 0)?;
        write_image(&self.output, &pixels)
    }
}
