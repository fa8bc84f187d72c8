//! `vktriangle_subpass`: draws three colored triangles into intermediate attachments and
//! composes them onto the swapchain image in a third subpass
//!
//! Subpass 0 draws instances 0 and 1 into intermediates 1 and 2, subpass 1 draws instance 2
//! into intermediate 3. Subpass 2 reads all three as input attachments and sums them.

use std::path::PathBuf;
use std::time::Duration;

use ash::vk;
use log::debug;
use vkdemos_shared::DemoConfig;
use winit::window::Window;

use super::present::Presenter;
use super::triangle_window::FRAME_INTERVAL;
use super::{context_config, position_input, triangle_vertex_buffer};
use crate::output::write_image;
use crate::shaders::ShaderLocator;
use crate::vulkan::{
    BlendMode, Buffer, CLEAR_BLACK, DescriptorPool, DescriptorSetLayout, Framebuffer,
    GraphicsPipeline, GraphicsPipelineBuilder, Image, ImageDesc, RenderPass, VulkanContext,
    cleared_color_attachment, f32_bytes, layout_binding, pool_sizes_for,
};
use crate::window::{WindowConfig, WindowDemo, run_window};

const COMPOSE_SUBPASS: u32 = 2;

/// Intermediate attachments, after the swapchain image at attachment 0.
const INTERMEDIATE_COUNT: usize = 3;

/// Red, green and blue, one `vec4` per triangle instance.
pub const INITIAL_COLORS: [f32; 12] = [
    1.0, 0.0, 0.0, 1.0, //
    0.0, 1.0, 0.0, 1.0, //
    0.0, 0.0, 1.0, 1.0,
];

const UNUSED: vk::AttachmentReference = vk::AttachmentReference {
    attachment: vk::ATTACHMENT_UNUSED,
    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
};

const fn color(attachment: u32) -> vk::AttachmentReference {
    vk::AttachmentReference {
        attachment,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }
}

const fn input(attachment: u32) -> vk::AttachmentReference {
    vk::AttachmentReference {
        attachment,
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

// Fragment output location n writes the attachment at index n
static FIRST_COLORS: [vk::AttachmentReference; 3] = [UNUSED, color(1), color(2)];
static SECOND_COLORS: [vk::AttachmentReference; 4] = [UNUSED, UNUSED, UNUSED, color(3)];
static COMPOSE_INPUTS: [vk::AttachmentReference; 3] = [input(1), input(2), input(3)];
static COMPOSE_COLORS: [vk::AttachmentReference; 1] = [color(0)];

pub fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let window = WindowConfig {
        title: "vktriangle subpass".to_string(),
        width: 512,
        height: 512,
    };
    run_window(window, config.frames, |window| SubpassDemo::new(config, window))
}

/// The swapchain image followed by the three intermediates.
pub fn attachment_descriptions(format: vk::Format) -> [vk::AttachmentDescription; 4] {
    let intermediate = cleared_color_attachment(format, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    [
        cleared_color_attachment(format, vk::ImageLayout::PRESENT_SRC_KHR),
        intermediate,
        intermediate,
        intermediate,
    ]
}

pub fn subpass_descriptions() -> [vk::SubpassDescription<'static>; 3] {
    [
        vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&FIRST_COLORS),
        vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&SECOND_COLORS),
        vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .input_attachments(&COMPOSE_INPUTS)
            .color_attachments(&COMPOSE_COLORS),
    ]
}

/// Both drawing subpasses finish their color writes before the composition reads them, and the
/// composition waits until the presentation engine released the swapchain image.
pub fn subpass_dependencies() -> [vk::SubpassDependency; 3] {
    let into_compose = |src_subpass| {
        vk::SubpassDependency::default()
            .src_subpass(src_subpass)
            .dst_subpass(COMPOSE_SUBPASS)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .dependency_flags(vk::DependencyFlags::BY_REGION)
    };
    [
        into_compose(1),
        into_compose(0),
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(COMPOSE_SUBPASS)
            .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::MEMORY_READ)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    ]
}

/// Moves every color one instance back, so the first color becomes the last.
pub fn rotate_colors(colors: &mut [f32; 12]) {
    colors.rotate_left(4);
}

// Underscored fields stay alive for the recorded command buffers and drop in declaration order
struct SubpassDemo {
    presenter: Presenter,
    _colorizers: [GraphicsPipeline; 2],
    _compose: GraphicsPipeline,
    _descriptor_pool: DescriptorPool,
    _set_layout: DescriptorSetLayout,
    _framebuffers: Vec<Framebuffer>,
    _intermediates: Vec<Image>,
    _render_pass: RenderPass,
    _vertex_buffer: Buffer,
    uniform_buffer: Buffer,
    colors: [f32; 12],
    context: VulkanContext,
    output: PathBuf,
}

impl SubpassDemo {
    fn new(config: &DemoConfig, window: &Window) -> anyhow::Result<Self> {
        let context =
            VulkanContext::new_for_window(&context_config(config, "vktriangle_subpass"), window)?;
        let device = context.device();
        let shaders = ShaderLocator::new(config.shader_dir.as_deref());

        let presenter = Presenter::new(
            &context,
            window,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )?;
        let swapchain = presenter.swapchain();
        let format = swapchain.format();
        let extent = swapchain.extent();

        let intermediates = (0..INTERMEDIATE_COUNT)
            .map(|index| {
                Image::new(
                    device,
                    context.allocator(),
                    &format!("intermediate {}", index + 1),
                    &ImageDesc::device_local(
                        format,
                        extent,
                        vk::ImageUsageFlags::COLOR_ATTACHMENT
                            | vk::ImageUsageFlags::INPUT_ATTACHMENT
                            | vk::ImageUsageFlags::TRANSFER_SRC,
                    ),
                )
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let intermediate_views = intermediates
            .iter()
            .map(Image::view)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let render_pass = RenderPass::new(
            device,
            &attachment_descriptions(format),
            &subpass_descriptions(),
            &subpass_dependencies(),
        )?;
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                let mut attachments = vec![view];
                attachments.extend_from_slice(&intermediate_views);
                Framebuffer::new(device, &render_pass, &attachments, extent)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let vertex_buffer = triangle_vertex_buffer(&context)?;
        let colors = INITIAL_COLORS;
        let color_bytes = f32_bytes(&colors);
        let mut uniform_buffer = Buffer::new_host_visible(
            device,
            context.allocator(),
            "instance colors",
            color_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        uniform_buffer.write(&color_bytes)?;

        let fragment = vk::ShaderStageFlags::FRAGMENT;
        let bindings = [
            layout_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | fragment,
            ),
            layout_binding(1, vk::DescriptorType::INPUT_ATTACHMENT, fragment),
            layout_binding(2, vk::DescriptorType::INPUT_ATTACHMENT, fragment),
            layout_binding(3, vk::DescriptorType::INPUT_ATTACHMENT, fragment),
        ];
        let set_layout = DescriptorSetLayout::new(device, &bindings)?;
        let descriptor_pool = DescriptorPool::new(device, &pool_sizes_for(&bindings), 1)?;
        let sets = descriptor_pool.allocate(&[set_layout.handle()])?;
        descriptor_pool.write_uniform_buffer(sets[0], 0, uniform_buffer.handle());
        for (binding, &view) in (1..).zip(&intermediate_views) {
            descriptor_pool.write_input_attachment(sets[0], binding, view);
        }

        let colorizer_vert = shaders.module(device, "subpass_colorizer.vert")?;
        let colorizer_frag = shaders.module(device, "subpass_colorizer.frag")?;
        let compose_vert = shaders.module(device, "subpass_compose.vert")?;
        let compose_frag = shaders.module(device, "subpass_compose.frag")?;
        let (binding, attributes) = position_input();
        let colorizer = |subpass: u32, color_attachments: usize| {
            GraphicsPipelineBuilder::new(device, &render_pass)
                .vertex_shader(&colorizer_vert)
                .fragment_shader(&colorizer_frag)
                .descriptor_set_layout(set_layout.handle())
                .vertex_binding(binding, &attributes)
                .subpass(subpass)
                .color_attachments(color_attachments, BlendMode::Additive)
                .fixed_viewport(extent)
                .build()
        };
        let colorizers = [
            colorizer(0, FIRST_COLORS.len())?,
            colorizer(1, SECOND_COLORS.len())?,
        ];
        let compose = GraphicsPipelineBuilder::new(device, &render_pass)
            .vertex_shader(&compose_vert)
            .fragment_shader(&compose_frag)
            .descriptor_set_layout(set_layout.handle())
            .subpass(COMPOSE_SUBPASS)
            .color_attachments(COMPOSE_COLORS.len(), BlendMode::Replace)
            .fixed_viewport(extent)
            .build()?;

        let clear_values = [CLEAR_BLACK; 1 + INTERMEDIATE_COUNT];
        presenter.record(device, |recorder, index| {
            let graphics = vk::PipelineBindPoint::GRAPHICS;
            recorder.begin_render_pass(&render_pass, &framebuffers[index], &clear_values);

            recorder.bind_pipeline(&colorizers[0]);
            recorder.bind_descriptor_sets(graphics, colorizers[0].layout(), &sets);
            recorder.bind_vertex_buffers(&[vertex_buffer.handle()]);
            recorder.draw(3, 1, 0, 0);
            recorder.draw(3, 1, 0, 1);

            recorder.next_subpass();
            recorder.bind_pipeline(&colorizers[1]);
            recorder.bind_descriptor_sets(graphics, colorizers[1].layout(), &sets);
            recorder.bind_vertex_buffers(&[vertex_buffer.handle()]);
            recorder.draw(3, 1, 0, 2);

            recorder.next_subpass();
            recorder.bind_pipeline(&compose);
            recorder.bind_descriptor_sets(graphics, compose.layout(), &sets);
            recorder.draw(3, 1, 0, 0);

            recorder.end_render_pass();
            Ok(())
        })?;

        Ok(Self {
            presenter,
            _colorizers: colorizers,
            _compose: compose,
            _descriptor_pool: descriptor_pool,
            _set_layout: set_layout,
            _framebuffers: framebuffers,
            _intermediates: intermediates,
            _render_pass: render_pass,
            _vertex_buffer: vertex_buffer,
            uniform_buffer,
            colors,
            context,
            output: config.output.clone(),
        })
    }
}

impl WindowDemo for SubpassDemo {
    fn draw_frame(&mut self) -> anyhow::Result<()> {
        rotate_colors(&mut self.colors);
        // Every frame in flight reads the same uniform buffer
        self.context.device().wait_idle()?;
        self.uniform_buffer.write(&f32_bytes(&self.colors))?;
        debug!("Instance colors: {:?}", self.colors);

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapchain_image_is_presented_and_intermediates_are_read() {
        let attachments = attachment_descriptions(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        for intermediate in &attachments[1..] {
            assert_eq!(
                intermediate.final_layout,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            );
        }
        for attachment in &attachments {
            assert_eq!(attachment.format, vk::Format::B8G8R8A8_SRGB);
            assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
            assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        }
    }

    #[test]
    fn drawing_subpasses_target_their_intermediates() {
        let targets = |refs: &[vk::AttachmentReference]| -> Vec<u32> {
            refs.iter().map(|reference| reference.attachment).collect()
        };
        assert_eq!(
            targets(&FIRST_COLORS),
            vec![vk::ATTACHMENT_UNUSED, 1, 2]
        );
        assert_eq!(
            targets(&SECOND_COLORS),
            vec![
                vk::ATTACHMENT_UNUSED,
                vk::ATTACHMENT_UNUSED,
                vk::ATTACHMENT_UNUSED,
                3
            ]
        );
        assert_eq!(targets(&COMPOSE_INPUTS), vec![1, 2, 3]);
        assert_eq!(targets(&COMPOSE_COLORS), vec![0]);
        assert!(
            COMPOSE_INPUTS
                .iter()
                .all(|reference| reference.layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
    }

    #[test]
    fn only_compose_subpass_reads_inputs() {
        let subpasses = subpass_descriptions();
        assert_eq!(subpasses[0].color_attachment_count, 3);
        assert_eq!(subpasses[0].input_attachment_count, 0);
        assert_eq!(subpasses[1].color_attachment_count, 4);
        assert_eq!(subpasses[2].input_attachment_count, 3);
        assert_eq!(subpasses[2].color_attachment_count, 1);
    }

    #[test]
    fn composition_waits_for_both_drawing_subpasses() {
        let dependencies = subpass_dependencies();
        let sources: Vec<u32> = dependencies.iter().map(|d| d.src_subpass).collect();
        assert_eq!(sources, vec![1, 0, vk::SUBPASS_EXTERNAL]);
        assert!(dependencies.iter().all(|d| d.dst_subpass == COMPOSE_SUBPASS));
        assert!(
            dependencies
                .iter()
                .all(|d| d.dependency_flags == vk::DependencyFlags::BY_REGION)
        );

        for internal in &dependencies[..2] {
            assert_eq!(internal.src_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
            assert_eq!(internal.dst_access_mask, vk::AccessFlags::SHADER_READ);
            assert_eq!(internal.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        }
        let external = &dependencies[2];
        assert_eq!(external.src_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(external.src_access_mask, vk::AccessFlags::MEMORY_READ);
    }

    #[test]
    fn colors_rotate_by_one_instance() {
        let mut colors = INITIAL_COLORS;
        rotate_colors(&mut colors);
        // Instance 0 is green now, instance 2 red
        assert_eq!(&colors[..4], &[0.0, 1.0, 0.0, 1.0]);
        assert_eq!(&colors[8..], &[1.0, 0.0, 0.0, 1.0]);

        rotate_colors(&mut colors);
        rotate_colors(&mut colors);
        assert_eq!(colors, INITIAL_COLORS);
    }
}
