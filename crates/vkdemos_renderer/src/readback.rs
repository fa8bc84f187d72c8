//! Copying rendered images back to the CPU

use ash::vk;
use gpu_allocator::MemoryLocation;
use image::RgbImage;
use log::debug;

use crate::vulkan::{Image, ImageDesc, LayoutTransition, VulkanContext};

/// Copies `image`, currently in `layout`, into a linear host visible image and returns its
/// pixels as RGB. The image is returned to `layout` afterwards.
pub fn copy_to_rgb(
    context: &VulkanContext,
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    layout: vk::ImageLayout,
) -> anyhow::Result<RgbImage> {
    let device = context.device();
    let linear = Image::new(
        device,
        context.allocator(),
        "readback",
        &ImageDesc::linear(
            format,
            extent,
            vk::ImageUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        ),
    )?;

    context.command_pool().run_one_time(device, |recorder| {
        recorder.transition_images(
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::TRANSFER,
            &[
                LayoutTransition {
                    image,
                    old_layout: layout,
                    new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    src_access: access_for_layout(layout),
                    dst_access: vk::AccessFlags::TRANSFER_READ,
                },
                LayoutTransition {
                    image: linear.handle(),
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    src_access: vk::AccessFlags::empty(),
                    dst_access: vk::AccessFlags::TRANSFER_WRITE,
                },
            ],
        );
        recorder.copy_image(image, linear.handle(), extent);
        recorder.transition_images(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST | vk::PipelineStageFlags::ALL_COMMANDS,
            &[
                LayoutTransition {
                    image: linear.handle(),
                    old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new_layout: vk::ImageLayout::GENERAL,
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_access: vk::AccessFlags::HOST_READ,
                },
                LayoutTransition {
                    image,
                    old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    new_layout: layout,
                    src_access: vk::AccessFlags::TRANSFER_READ,
                    dst_access: access_for_layout(layout),
                },
            ],
        );
        Ok(())
    })?;

    read_linear_rgb(&linear)
}

/// Reads the pixels of a host visible linear image as RGB.
pub fn read_linear_rgb(image: &Image) -> anyhow::Result<RgbImage> {
    let layout = image.subresource_layout();
    let extent = image.extent();
    debug!(
        "Reading {}x{} linear image: offset {} row pitch {}",
        extent.width, extent.height, layout.offset, layout.row_pitch
    );
    let rgb = extract_rgb(
        image.mapped_bytes()?,
        layout.offset as usize,
        layout.row_pitch as usize,
        extent,
        image.format(),
    )?;
    RgbImage::from_raw(extent.width, extent.height, rgb)
        .ok_or_else(|| anyhow::anyhow!("Pixel buffer does not match the image size"))
}

/// Extracts `width * height` RGB triples from a 4 byte per texel mapping whose rows start
/// `row_pitch` bytes apart, beginning at `offset`.
pub fn extract_rgb(
    mapped: &[u8],
    offset: usize,
    row_pitch: usize,
    extent: vk::Extent2D,
    format: vk::Format,
) -> anyhow::Result<Vec<u8>> {
    let swizzle = match format {
        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => [0, 1, 2],
        vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => [2, 1, 0],
        _ => anyhow::bail!("Cannot read back pixels of format {format:?}"),
    };
    let width = extent.width as usize;
    let height = extent.height as usize;
    if height == 0 || width == 0 {
        return Ok(Vec::new());
    }
    if row_pitch < width * 4 {
        anyhow::bail!("Row pitch {row_pitch} is smaller than a row of {width} texels");
    }

    let needed = offset + (height - 1) * row_pitch + width * 4;
    if mapped.len() < needed {
        anyhow::bail!(
            "Mapped image memory holds {} bytes, {} needed",
            mapped.len(),
            needed
        );
    }

    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = &mapped[offset + y * row_pitch..][..width * 4];
        for texel in row.chunks_exact(4) {
            rgb.extend(swizzle.iter().map(|&channel| texel[channel]));
        }
    }
    Ok(rgb)
}

/// The accesses that may touch an image in `layout` before or after a transfer.
fn access_for_layout(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::MEMORY_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::GENERAL => vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::SHADER_READ,
        _ => vk::AccessFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn tightly_packed_rgba() {
        let mapped = [1, 2, 3, 255, 4, 5, 6, 255];
        let rgb = extract_rgb(&mapped, 0, 8, extent(2, 1), vk::Format::R8G8B8A8_UNORM).unwrap();
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn honours_offset_and_row_padding() {
        // Two rows of one texel, 4 bytes of padding per row, 2 leading bytes
        let mapped = [
            9, 9, //
            10, 20, 30, 255, 0, 0, 0, 0, //
            40, 50, 60, 255, 0, 0, 0, 0,
        ];
        let rgb = extract_rgb(&mapped, 2, 8, extent(1, 2), vk::Format::R8G8B8A8_UNORM).unwrap();
        assert_eq!(rgb, vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn swizzles_bgra() {
        let mapped = [30, 20, 10, 255];
        let rgb = extract_rgb(&mapped, 0, 4, extent(1, 1), vk::Format::B8G8R8A8_SRGB).unwrap();
        assert_eq!(rgb, vec![10, 20, 30]);
    }

    #[test]
    fn rejects_short_mapping() {
        let mapped = [0u8; 15];
        let err = extract_rgb(&mapped, 0, 8, extent(2, 2), vk::Format::R8G8B8A8_UNORM);
        assert!(err.is_err());
    }

    #[test]
    fn last_row_needs_no_padding() {
        // The final row may end right after its texels
        let mapped = [1, 2, 3, 0, 0, 0, 0, 0, 4, 5, 6, 0];
        let rgb = extract_rgb(&mapped, 0, 8, extent(1, 2), vk::Format::R8G8B8A8_UNORM).unwrap();
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn rejects_unknown_format() {
        let mapped = [0u8; 16];
        assert!(extract_rgb(&mapped, 0, 8, extent(1, 1), vk::Format::R16G16_SFLOAT).is_err());
    }
}
