//! Host visible buffers for vertex and uniform data

use anyhow::Context;
use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;
use log::{debug, warn};

use super::{Device, MemoryAllocator};

/// A buffer backed by persistently mapped, host visible memory.
pub struct Buffer {
    handle: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    allocator: MemoryAllocator,
    device: ash::Device,
}

impl Buffer {
    /// Creates a buffer of `size` bytes the CPU writes and the GPU reads.
    pub fn new_host_visible(
        device: &Device,
        allocator: &MemoryAllocator,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> anyhow::Result<Self> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.handle().create_buffer(&create_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(handle) };
        let allocation = match allocator.allocate(name, requirements, MemoryLocation::CpuToGpu, true)
        {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.handle().destroy_buffer(handle, None) };
                return Err(err);
            }
        };

        let buffer = Self {
            handle,
            allocation: Some(allocation),
            size,
            allocator: allocator.clone(),
            device: device.handle().clone(),
        };

        let allocation = buffer.allocation()?;
        unsafe {
            device
                .handle()
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        }
        .context("Failed to bind buffer memory")?;

        debug!("Created buffer {name}: {size} bytes, usage {:?}", usage);

        Ok(buffer)
    }

    fn allocation(&self) -> anyhow::Result<&Allocation> {
        self.allocation
            .as_ref()
            .context("Buffer memory was already released")
    }

    /// Copies `bytes` to the start of the buffer.
    pub fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            anyhow::bail!(
                "Write of {} bytes exceeds buffer size {}",
                bytes.len(),
                self.size
            );
        }
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Returns the buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.handle, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(err) = self.allocator.free(allocation) {
                warn!("{err:#}");
            }
        }
        debug!("Destroyed buffer");
    }
}

/// Packs floats into their native byte representation for upload.
pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_ne_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_pack_in_order() {
        let bytes = f32_bytes(&[1.0, -0.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0_f32.to_ne_bytes());
        assert_eq!(&bytes[4..], &(-0.5_f32).to_ne_bytes());
    }
}
