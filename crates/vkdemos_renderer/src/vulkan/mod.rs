//! Owning wrappers around the Vulkan objects the demos create
//!
//! Each wrapper releases its object when dropped, so destruction order follows ownership.

mod buffer;
mod command;
mod context;
mod descriptor;
mod device;
mod external_memory;
mod framebuffer;
mod image;
mod instance;
mod memory;
mod physical_device;
mod pipeline;
mod render_pass;
mod surface;
mod swapchain;
mod sync;

pub use buffer::{Buffer, f32_bytes};
pub use command::{CommandBufferRecorder, CommandPool, LayoutTransition};
pub use context::{ContextConfig, VulkanContext};
pub use descriptor::{DescriptorPool, DescriptorSetLayout, layout_binding, pool_sizes_for};
pub use device::Device;
pub use external_memory::{EXTERNAL_MEMORY_EXTENSIONS, ExternalImage};
pub use framebuffer::Framebuffer;
pub use image::{COLOR_LAYERS, COLOR_RANGE, Image, ImageDesc};
pub use instance::{Instance, InstanceConfig};
pub use memory::MemoryAllocator;
pub use physical_device::{
    DeviceRequest, PhysicalDevice, device_name, find_memory_type, find_queue_family, score_device,
};
pub use pipeline::{
    BlendMode, ComputePipeline, GraphicsPipeline, GraphicsPipelineBuilder, ShaderModule,
    full_viewport,
};
pub use render_pass::{CLEAR_BLACK, RenderPass, cleared_color_attachment};
pub use surface::{Surface, required_surface_extensions};
pub use swapchain::{
    Swapchain, choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
};
pub use sync::{Fence, FrameSync, ImagesInFlight, Semaphore, next_frame};
