//! `vktriangle`: renders one triangle into an offscreen image

use ash::vk;
use log::info;
use vkdemos_shared::DemoConfig;

use super::{RENDER_EXTENT, RENDER_FORMAT, context_config};
use crate::output::write_image;
use crate::readback::copy_to_rgb;
use crate::shaders::ShaderLocator;
use crate::vulkan::{
    CLEAR_BLACK, Framebuffer, GraphicsPipelineBuilder, Image, ImageDesc, RenderPass, VulkanContext,
};

pub fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let context = VulkanContext::new_headless(&context_config(config, "vktriangle"))?;
    let device = context.device();
    let shaders = ShaderLocator::new(config.shader_dir.as_deref());

    let target = Image::new(
        device,
        context.allocator(),
        "render target",
        &ImageDesc::device_local(
            RENDER_FORMAT,
            RENDER_EXTENT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        ),
    )?;
    let render_pass = RenderPass::new_single_color(
        device,
        RENDER_FORMAT,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )?;
    let framebuffer = Framebuffer::new(device, &render_pass, &[target.view()?], RENDER_EXTENT)?;

    let vertex_shader = shaders.module(device, "triangle.vert")?;
    let fragment_shader = shaders.module(device, "passthrough.frag")?;
    let pipeline = GraphicsPipelineBuilder::new(device, &render_pass)
        .vertex_shader(&vertex_shader)
        .fragment_shader(&fragment_shader)
        .fixed_viewport(RENDER_EXTENT)
        .build()?;

    context.command_pool().run_one_time(device, |recorder| {
        recorder.begin_render_pass(&render_pass, &framebuffer, &[CLEAR_BLACK]);
        recorder.bind_pipeline(&pipeline);
        recorder.draw(3, 1, 0, 0);
        recorder.end_render_pass();
        Ok(())
    })?;
    info!("Rendered triangle");

    let pixels = copy_to_rgb(
        &context,
        target.handle(),
        target.format(),
        target.extent(),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )?;
    write_image(&config.output, &pixels)
}
