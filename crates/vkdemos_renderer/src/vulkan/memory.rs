//! GPU memory allocation using gpu-allocator

use std::sync::{Arc, Mutex};

use anyhow::Context;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationSizes, AllocatorDebugSettings, MemoryLocation};
use log::debug;

use super::{Device, Instance, PhysicalDevice};

/// Shared handle to the gpu-allocator instance of a device.
///
/// Images and buffers keep a clone so they can return their memory when dropped. The allocator
/// must be dropped before the device.
#[derive(Clone)]
pub struct MemoryAllocator {
    allocator: Arc<Mutex<Allocator>>,
}

impl MemoryAllocator {
    /// Creates a new memory allocator for the given device.
    pub fn new(
        instance: &Instance,
        device: &Device,
        physical_device: &PhysicalDevice,
    ) -> anyhow::Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.handle().clone(),
            physical_device: physical_device.handle(),
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
            debug_settings: AllocatorDebugSettings::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        debug!("GPU memory allocator created");

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
        })
    }

    /// Allocates memory satisfying `requirements` at `location`.
    ///
    /// `linear` must be true for buffers and linearly tiled images.
    pub fn allocate(
        &self,
        name: &str,
        requirements: ash::vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> anyhow::Result<Allocation> {
        let mut allocator = self
            .allocator
            .lock()
            .map_err(|_| anyhow::anyhow!("GPU memory allocator lock poisoned"))?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for {name}"))
    }

    /// Returns an allocation to the allocator.
    pub fn free(&self, allocation: Allocation) -> anyhow::Result<()> {
        let mut allocator = self
            .allocator
            .lock()
            .map_err(|_| anyhow::anyhow!("GPU memory allocator lock poisoned"))?;
        allocator
            .free(allocation)
            .context("Failed to free GPU memory")
    }
}
