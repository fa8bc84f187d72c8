//! The demo programs. Each `run` is the whole body of one binary.

pub mod compute;
pub mod external_memory;
pub mod mininfo;
mod present;
pub mod subpass;
pub mod triangle;
pub mod triangle_window;

use ash::vk;
use vkdemos_shared::DemoConfig;

use crate::vulkan::{Buffer, ContextConfig, VulkanContext, f32_bytes};

/// Size of the offscreen render targets.
pub const RENDER_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 256,
    height: 256,
};

/// Format of the offscreen render targets.
pub const RENDER_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// `vec2` corners of the triangle drawn from a vertex buffer.
pub const TRIANGLE_POSITIONS: [f32; 6] = [0.0, -0.5, 0.5, 0.5, -0.5, 0.5];

fn context_config<'a>(config: &DemoConfig, application_name: &'a str) -> ContextConfig<'a> {
    ContextConfig {
        application_name,
        validation: config.validation,
        ..Default::default()
    }
}

/// Vertex binding 0 with a single `vec2` position at location 0.
fn position_input() -> (
    vk::VertexInputBindingDescription,
    [vk::VertexInputAttributeDescription; 1],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: 2 * std::mem::size_of::<f32>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = [vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: vk::Format::R32G32_SFLOAT,
        offset: 0,
    }];
    (binding, attributes)
}

/// Uploads [`TRIANGLE_POSITIONS`] into a new vertex buffer.
fn triangle_vertex_buffer(context: &VulkanContext) -> anyhow::Result<Buffer> {
    let bytes = f32_bytes(&TRIANGLE_POSITIONS);
    let mut buffer = Buffer::new_host_visible(
        context.device(),
        context.allocator(),
        "triangle vertices",
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::VERTEX_BUFFER,
    )?;
    buffer.write(&bytes)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_input_matches_vertex_data() {
        let (binding, attributes) = position_input();
        assert_eq!(binding.stride, 8);
        assert_eq!(attributes[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(TRIANGLE_POSITIONS.len() as u32 * 4 / binding.stride, 3);
    }

    #[test]
    fn context_follows_validation_setting() {
        let config = DemoConfig {
            validation: true,
            ..Default::default()
        };
        let context = context_config(&config, "test");
        assert!(context.validation);
        assert_eq!(context.application_name, "test");
        assert_eq!(context.queue_flags, vk::QueueFlags::GRAPHICS);
    }
}
