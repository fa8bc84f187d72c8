//! Physical device (GPU) selection

use std::ffi::CStr;

use anyhow::Context;
use ash::vk;
use log::{debug, info, warn};

use super::{Instance, Surface};

/// What a demo needs from the GPU it runs on.
#[derive(Clone, Copy)]
pub struct DeviceRequest<'a> {
    /// Capabilities the queue family must offer
    pub queue_flags: vk::QueueFlags,
    /// Device extensions the demo enables
    pub extensions: &'a [&'a CStr],
    /// The queue family must be able to present to this surface
    pub surface: Option<&'a Surface>,
}

impl Default for DeviceRequest<'_> {
    fn default() -> Self {
        Self {
            queue_flags: vk::QueueFlags::GRAPHICS,
            extensions: &[],
            surface: None,
        }
    }
}

/// A selected physical device and the properties the demos consult.
pub struct PhysicalDevice {
    handle: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_family: u32,
    device_uuid: Option<[u8; vk::UUID_SIZE]>,
}

impl PhysicalDevice {
    /// Selects the best available physical device for `request`.
    ///
    /// Devices without a matching queue family or without the requested extensions are skipped.
    /// Of the rest, discrete GPUs are preferred over integrated ones, then newer API versions.
    /// Ties keep enumeration order so two instances on the same machine pick the same GPU.
    pub fn select(instance: &Instance, request: &DeviceRequest) -> anyhow::Result<Self> {
        let raw = instance.handle();
        // SAFETY: Instance is valid and was created successfully
        let physical_devices = unsafe { raw.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if physical_devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPUs found");
        }

        debug!("Found {} Vulkan-capable device(s)", physical_devices.len());

        let mut best: Option<(vk::PhysicalDevice, vk::PhysicalDeviceProperties, u32, i32)> = None;

        for &physical_device in &physical_devices {
            // SAFETY: Physical device handle is valid from enumeration
            let properties = unsafe { raw.get_physical_device_properties(physical_device) };
            let name = device_name(&properties);

            debug!(
                "Evaluating device: {} (type: {:?}, API version: {}.{}.{})",
                name,
                properties.device_type,
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version),
                vk::api_version_patch(properties.api_version),
            );

            let families =
                unsafe { raw.get_physical_device_queue_family_properties(physical_device) };
            let queue_family = find_queue_family(&families, request.queue_flags, |index| {
                match request.surface {
                    Some(surface) => surface
                        .supports_present(physical_device, index)
                        .unwrap_or_else(|err| {
                            warn!("Present support query failed: {err:#}");
                            false
                        }),
                    None => true,
                }
            });
            let Some(queue_family) = queue_family else {
                debug!("  Skipping: no queue family with {:?}", request.queue_flags);
                continue;
            };

            let missing = missing_extensions(raw, physical_device, request.extensions)?;
            if !missing.is_empty() {
                debug!("  Skipping: missing extensions {:?}", missing);
                continue;
            }

            let score = score_device(&properties);
            debug!("  Score: {}, queue family: {}", score, queue_family);

            if best.as_ref().is_none_or(|(_, _, _, best_score)| score > *best_score) {
                best = Some((physical_device, properties, queue_family, score));
            }
        }

        let (handle, properties, queue_family, _score) = best.with_context(|| {
            format!(
                "No suitable GPU found (need {:?} queue and extensions {:?})",
                request.queue_flags, request.extensions
            )
        })?;

        let memory_properties = unsafe { raw.get_physical_device_memory_properties(handle) };
        let device_uuid = if properties.api_version >= vk::API_VERSION_1_1 {
            let mut id_properties = vk::PhysicalDeviceIDProperties::default();
            let mut properties2 =
                vk::PhysicalDeviceProperties2::default().push_next(&mut id_properties);
            unsafe { raw.get_physical_device_properties2(handle, &mut properties2) };
            Some(id_properties.device_uuid)
        } else {
            None
        };

        info!(
            "Selected GPU: {} (type: {:?})",
            device_name(&properties),
            properties.device_type
        );

        Ok(Self {
            handle,
            properties,
            memory_properties,
            queue_family,
            device_uuid,
        })
    }

    /// Returns the raw Vulkan physical device handle.
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    /// Returns the device properties.
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Returns the device name.
    pub fn name(&self) -> String {
        device_name(&self.properties)
    }

    /// Returns the index of the queue family matching the request.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// The device UUID, if the device reports Vulkan 1.1.
    pub fn device_uuid(&self) -> Option<[u8; vk::UUID_SIZE]> {
        self.device_uuid
    }

    /// Returns the memory type index for `type_bits` that has all of `flags`.
    pub fn memory_type_index(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> anyhow::Result<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags).with_context(|| {
            format!("No suitable memory type for bits {type_bits:#x} with {flags:?}")
        })
    }
}

/// Reads the NUL terminated device name.
pub fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_string())
}

fn missing_extensions<'a>(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    wanted: &[&'a CStr],
) -> anyhow::Result<Vec<&'a CStr>> {
    if wanted.is_empty() {
        return Ok(Vec::new());
    }
    // SAFETY: Physical device and instance are valid
    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .context("Failed to enumerate device extensions")?;
    Ok(wanted
        .iter()
        .copied()
        .filter(|wanted| {
            !available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *wanted))
        })
        .collect())
}

/// Returns the first queue family offering all of `flags` for which `supports_present` holds.
pub fn find_queue_family(
    families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| family.queue_count > 0 && family.queue_flags.contains(flags))
        .map(|(index, _)| index as u32)
        .find(|&index| supports_present(index))
}

/// Returns the first memory type allowed by `type_bits` that has all of `flags`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties
        .memory_types_as_slice()
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _)| index as u32)
}

/// Scores a physical device based on its properties. Higher scores are better.
pub fn score_device(properties: &vk::PhysicalDeviceProperties) -> i32 {
    let mut score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    let api_version = properties.api_version;
    score += (vk::api_version_major(api_version) * 10) as i32;
    score += vk::api_version_minor(api_version) as i32;

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn memory(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (index, flags) in types.iter().enumerate() {
            properties.memory_types[index] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        properties
    }

    #[test]
    fn first_graphics_family_wins() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(
            find_queue_family(&families, vk::QueueFlags::GRAPHICS, |_| true),
            Some(1)
        );
    }

    #[test]
    fn compute_family_lookup() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(
            find_queue_family(&families, vk::QueueFlags::COMPUTE, |_| true),
            Some(1)
        );
        assert_eq!(
            find_queue_family(&families, vk::QueueFlags::SPARSE_BINDING, |_| true),
            None
        );
    }

    #[test]
    fn present_support_is_required() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(
            find_queue_family(&families, vk::QueueFlags::GRAPHICS, |index| index == 1),
            Some(1)
        );
        assert_eq!(
            find_queue_family(&families, vk::QueueFlags::GRAPHICS, |_| false),
            None
        );
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(
            find_queue_family(&families, vk::QueueFlags::GRAPHICS, |_| true),
            Some(1)
        );
    }

    #[test]
    fn memory_type_honours_bits_and_flags() {
        let properties = memory(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&properties, 0b111, host), Some(2));
        assert_eq!(
            find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&properties, 0b101, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(2)
        );
        assert_eq!(
            find_memory_type(&properties, 0b001, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn memory_type_ignores_entries_past_count() {
        let mut properties = memory(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        properties.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(
            find_memory_type(&properties, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn discrete_gpus_score_highest() {
        let properties = |device_type, api_version| vk::PhysicalDeviceProperties {
            device_type,
            api_version,
            ..Default::default()
        };
        let discrete = score_device(&properties(
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::API_VERSION_1_0,
        ));
        let integrated = score_device(&properties(
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::API_VERSION_1_3,
        ));
        let cpu = score_device(&properties(vk::PhysicalDeviceType::CPU, vk::API_VERSION_1_3));
        assert!(discrete > integrated);
        assert!(integrated > cpu);
        assert_eq!(integrated, 100 + 10 + 3);
    }
}
