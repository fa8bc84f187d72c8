//! `vkcompute`: blurs a checkerboard with a compute shader
//!
//! Both images are linear and host visible. The source is filled through its mapping and the
//! destination is read straight from its mapping once the dispatch finished.

use ash::vk;
use gpu_allocator::MemoryLocation;
use log::info;
use vkdemos_shared::DemoConfig;

use super::{RENDER_EXTENT, RENDER_FORMAT, context_config};
use crate::output::write_image;
use crate::readback::read_linear_rgb;
use crate::shaders::ShaderLocator;
use crate::vulkan::{
    ComputePipeline, ContextConfig, DescriptorPool, DescriptorSetLayout, Image, ImageDesc,
    LayoutTransition, VulkanContext, layout_binding, pool_sizes_for,
};

/// Edge length of a compute work group, matching `local_size` in `compute.comp`.
const GROUP_SIZE: u32 = 16;

/// Direction the box filter runs along.
const FILTER_DIRECTION: [i32; 2] = [1, 0];

pub fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let context = VulkanContext::new_headless(&ContextConfig {
        queue_flags: vk::QueueFlags::COMPUTE,
        ..context_config(config, "vkcompute")
    })?;
    let device = context.device();
    let shaders = ShaderLocator::new(config.shader_dir.as_deref());

    let usage = vk::ImageUsageFlags::STORAGE
        | vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST;
    let mut source = Image::new(
        device,
        context.allocator(),
        "compute source",
        &ImageDesc::linear(RENDER_FORMAT, RENDER_EXTENT, usage, MemoryLocation::CpuToGpu)
            .preinitialized(),
    )?;
    let destination = Image::new(
        device,
        context.allocator(),
        "compute destination",
        &ImageDesc::linear(RENDER_FORMAT, RENDER_EXTENT, usage, MemoryLocation::GpuToCpu),
    )?;

    let layout = source.subresource_layout();
    fill_checkerboard(
        source.mapped_bytes_mut()?,
        layout.offset as usize,
        layout.row_pitch as usize,
        RENDER_EXTENT,
    )?;

    let bindings = [
        layout_binding(
            0,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::ShaderStageFlags::COMPUTE,
        ),
        layout_binding(
            1,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::ShaderStageFlags::COMPUTE,
        ),
    ];
    let set_layout = DescriptorSetLayout::new(device, &bindings)?;
    let pool = DescriptorPool::new(device, &pool_sizes_for(&bindings), 1)?;
    let sets = pool.allocate(&[set_layout.handle()])?;
    pool.write_storage_image(sets[0], 0, source.view()?);
    pool.write_storage_image(sets[0], 1, destination.view()?);

    let shader = shaders.module(device, "compute.comp")?;
    let push_constants = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::COMPUTE,
        offset: 0,
        size: std::mem::size_of_val(&FILTER_DIRECTION) as u32,
    };
    let pipeline =
        ComputePipeline::new(device, &shader, &[set_layout.handle()], &[push_constants])?;

    let direction: Vec<u8> = FILTER_DIRECTION
        .iter()
        .flat_map(|value| value.to_ne_bytes())
        .collect();
    context.command_pool().run_one_time(device, |recorder| {
        recorder.transition_images(
            vk::PipelineStageFlags::HOST,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            &[
                LayoutTransition {
                    image: source.handle(),
                    old_layout: vk::ImageLayout::PREINITIALIZED,
                    new_layout: vk::ImageLayout::GENERAL,
                    src_access: vk::AccessFlags::HOST_WRITE,
                    dst_access: vk::AccessFlags::SHADER_READ,
                },
                LayoutTransition {
                    image: destination.handle(),
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::GENERAL,
                    src_access: vk::AccessFlags::empty(),
                    dst_access: vk::AccessFlags::SHADER_WRITE,
                },
            ],
        );
        recorder.bind_compute_pipeline(&pipeline);
        recorder.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, pipeline.layout(), &sets);
        recorder.push_constants(
            pipeline.layout(),
            vk::ShaderStageFlags::COMPUTE,
            &direction,
        );
        recorder.dispatch(
            RENDER_EXTENT.width / GROUP_SIZE,
            RENDER_EXTENT.height / GROUP_SIZE,
            1,
        );
        recorder.transition_images(
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::HOST,
            &[LayoutTransition {
                image: destination.handle(),
                old_layout: vk::ImageLayout::GENERAL,
                new_layout: vk::ImageLayout::GENERAL,
                src_access: vk::AccessFlags::SHADER_WRITE,
                dst_access: vk::AccessFlags::HOST_READ,
            }],
        );
        Ok(())
    })?;
    info!(
        "Dispatched {}x{} work groups",
        RENDER_EXTENT.width / GROUP_SIZE,
        RENDER_EXTENT.height / GROUP_SIZE
    );

    write_image(&config.sibling_output("src.ppm"), &read_linear_rgb(&source)?)?;
    write_image(&config.output, &read_linear_rgb(&destination)?)?;
    Ok(())
}

/// Writes the source checkerboard into a mapped `R8G8B8A8` image.
///
/// Squares are 8 texels wide and red marks every other one. Green grows down the rows and blue
/// across the columns, so the gradient sits transposed in the image. Alpha is opaque.
pub fn fill_checkerboard(
    mapped: &mut [u8],
    offset: usize,
    row_pitch: usize,
    extent: vk::Extent2D,
) -> anyhow::Result<()> {
    let width = extent.width as usize;
    let height = extent.height as usize;
    if width == 0 || height == 0 {
        return Ok(());
    }
    let needed = offset + (height - 1) * row_pitch + width * 4;
    if row_pitch < width * 4 || mapped.len() < needed {
        anyhow::bail!(
            "Mapping of {} bytes with row pitch {row_pitch} cannot hold {width}x{height} texels",
            mapped.len()
        );
    }

    for y in 0..extent.height {
        let row = &mut mapped[offset + y as usize * row_pitch..][..width * 4];
        for (x, texel) in (0..extent.width).zip(row.chunks_exact_mut(4)) {
            texel.copy_from_slice(&checker_texel(y, x).to_le_bytes());
        }
    }
    Ok(())
}

fn checker_texel(green: u32, blue: u32) -> u32 {
    let red = if ((green & 8) == 0) ^ ((blue & 8) == 0) { 255 } else { 0 };
    red | (green & 0xff) << 8 | (blue & 0xff) << 16 | 255 << 24
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texel(mapped: &[u8], row_pitch: usize, x: usize, y: usize) -> [u8; 4] {
        let start = y * row_pitch + x * 4;
        [
            mapped[start],
            mapped[start + 1],
            mapped[start + 2],
            mapped[start + 3],
        ]
    }

    #[test]
    fn squares_alternate_every_eight_texels() {
        let extent = vk::Extent2D {
            width: 32,
            height: 32,
        };
        let mut mapped = vec![0u8; 32 * 32 * 4];
        fill_checkerboard(&mut mapped, 0, 32 * 4, extent).unwrap();

        assert_eq!(texel(&mapped, 128, 0, 0), [0, 0, 0, 255]);
        assert_eq!(texel(&mapped, 128, 8, 0), [255, 0, 8, 255]);
        assert_eq!(texel(&mapped, 128, 0, 8), [255, 8, 0, 255]);
        assert_eq!(texel(&mapped, 128, 8, 8), [0, 8, 8, 255]);
        assert_eq!(texel(&mapped, 128, 17, 3), [0, 3, 17, 255]);
    }

    #[test]
    fn rows_are_written_at_row_pitch() {
        let extent = vk::Extent2D {
            width: 2,
            height: 2,
        };
        // 4 padding bytes after each row, 4 leading bytes
        let mut mapped = vec![0xAAu8; 4 + 12 + 8];
        fill_checkerboard(&mut mapped, 4, 12, extent).unwrap();

        assert_eq!(&mapped[..4], &[0xAA; 4]);
        assert_eq!(&mapped[4..8], &[0, 0, 0, 255]);
        assert_eq!(&mapped[8..12], &[0, 0, 1, 255]);
        assert_eq!(&mapped[12..16], &[0xAA; 4]);
        assert_eq!(&mapped[16..20], &[0, 1, 0, 255]);
    }

    #[test]
    fn gradient_is_transposed() {
        let extent = vk::Extent2D {
            width: 16,
            height: 4,
        };
        let mut mapped = vec![0u8; 16 * 4 * 4];
        fill_checkerboard(&mut mapped, 0, 64, extent).unwrap();
        // Green follows the row, blue the column
        assert_eq!(texel(&mapped, 64, 15, 2)[1..3], [2, 15]);
    }

    #[test]
    fn short_mapping_is_rejected() {
        let extent = vk::Extent2D {
            width: 4,
            height: 4,
        };
        let mut mapped = vec![0u8; 63];
        assert!(fill_checkerboard(&mut mapped, 0, 16, extent).is_err());
        assert!(fill_checkerboard(&mut vec![0u8; 64], 0, 8, extent).is_err());
    }
}
