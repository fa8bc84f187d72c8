//! The Vulkan capability report printed by `vkmininfo`

use std::io::Write;

use anyhow::Context;
use ash::vk;

use crate::vulkan::{Instance, device_name};

/// Extension names are padded to at least this width, plus 2 columns.
const MIN_NAME_WIDTH: usize = 10;

const MEMORY_PROPERTY_NAMES: [(vk::MemoryPropertyFlags, &str); 6] = [
    (vk::MemoryPropertyFlags::DEVICE_LOCAL, "DEVICE_LOCAL"),
    (vk::MemoryPropertyFlags::HOST_VISIBLE, "HOST_VISIBLE"),
    (vk::MemoryPropertyFlags::HOST_COHERENT, "HOST_COHERENT"),
    (vk::MemoryPropertyFlags::HOST_CACHED, "HOST_CACHED"),
    (vk::MemoryPropertyFlags::LAZILY_ALLOCATED, "LAZILY_ALLOCATED"),
    (vk::MemoryPropertyFlags::PROTECTED, "PROTECTED"),
];

const MEMORY_HEAP_NAMES: [(vk::MemoryHeapFlags, &str); 2] = [
    (vk::MemoryHeapFlags::DEVICE_LOCAL, "DEVICE_LOCAL"),
    (vk::MemoryHeapFlags::MULTI_INSTANCE, "MULTI_INSTANCE"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub spec_version: u32,
    pub implementation_version: u32,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub properties: vk::PhysicalDeviceProperties,
    pub extensions: Vec<ExtensionInfo>,
    pub memory: vk::PhysicalDeviceMemoryProperties,
}

/// Everything the report shows, gathered up front.
#[derive(Debug, Clone, Default)]
pub struct InfoReport {
    pub instance_extensions: Vec<ExtensionInfo>,
    pub layers: Vec<LayerInfo>,
    pub devices: Vec<DeviceInfo>,
}

impl InfoReport {
    /// Queries the instance level extensions and layers, and every physical device of `instance`.
    pub fn query(instance: &Instance) -> anyhow::Result<Self> {
        let entry = instance.entry();
        let raw = instance.handle();

        let instance_extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("Failed to enumerate instance extensions")?
            .iter()
            .map(extension_info)
            .collect();

        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .context("Failed to enumerate instance layers")?
            .iter()
            .map(|layer| LayerInfo {
                name: c_str_lossy(layer.layer_name_as_c_str()),
                spec_version: layer.spec_version,
                implementation_version: layer.implementation_version,
                description: c_str_lossy(layer.description_as_c_str()),
            })
            .collect();

        let physical_devices = unsafe { raw.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;
        let devices = physical_devices
            .into_iter()
            .map(|physical_device| {
                let extensions =
                    unsafe { raw.enumerate_device_extension_properties(physical_device) }
                        .context("Failed to enumerate device extensions")?
                        .iter()
                        .map(extension_info)
                        .collect();
                Ok(DeviceInfo {
                    properties: unsafe { raw.get_physical_device_properties(physical_device) },
                    extensions,
                    memory: unsafe { raw.get_physical_device_memory_properties(physical_device) },
                })
            })
            .collect::<anyhow::Result<_>>()?;

        Ok(Self {
            instance_extensions,
            layers,
            devices,
        })
    }

    /// Writes the report.
    pub fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        write_extensions(out, "Instance Extensions", &self.instance_extensions)?;
        writeln!(out)?;

        write_layers(out, &self.layers)?;
        writeln!(out)?;

        writeln!(out, "Physical Devices (count = {})", self.devices.len())?;
        for (index, device) in self.devices.iter().enumerate() {
            write_device(out, index, device)?;
        }
        writeln!(out)
    }
}

fn extension_info(ext: &vk::ExtensionProperties) -> ExtensionInfo {
    ExtensionInfo {
        name: c_str_lossy(ext.extension_name_as_c_str()),
        version: ext.spec_version,
    }
}

fn c_str_lossy<E>(name: Result<&std::ffi::CStr, E>) -> String {
    name.map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn name_width<'a>(names: impl Iterator<Item = &'a str>) -> usize {
    names.map(str::len).fold(MIN_NAME_WIDTH, usize::max) + 2
}

fn write_extensions(
    out: &mut impl Write,
    header: &str,
    extensions: &[ExtensionInfo],
) -> std::io::Result<()> {
    let width = name_width(extensions.iter().map(|ext| ext.name.as_str()));
    writeln!(out, "{header} (count = {})", extensions.len())?;
    for ext in extensions {
        writeln!(out, "    {:<width$} : version {}", ext.name, ext.version)?;
    }
    Ok(())
}

fn write_layers(out: &mut impl Write, layers: &[LayerInfo]) -> std::io::Result<()> {
    let width = name_width(layers.iter().map(|layer| layer.name.as_str()));
    writeln!(out, "Instance Layers (count = {})", layers.len())?;
    for layer in layers {
        writeln!(
            out,
            "    {:<width$} : spec-version {} impl-version {}",
            layer.name,
            format_version(layer.spec_version),
            layer.implementation_version
        )?;
        writeln!(out, "    {:>width$}: {}", "Description", layer.description)?;
    }
    Ok(())
}

fn write_device(out: &mut impl Write, index: usize, device: &DeviceInfo) -> std::io::Result<()> {
    let props = &device.properties;
    writeln!(
        out,
        "  {index}: deviceName = {} vendorID = {:#x} deviceID = {:#x}",
        device_name(props),
        props.vendor_id,
        props.device_id
    )?;
    writeln!(
        out,
        "     deviceType = {} apiVersion = {} driverVersion = {}",
        device_type_name(props.device_type),
        format_version(props.api_version),
        format_version(props.driver_version)
    )?;
    writeln!(out)?;

    write_extensions(out, "    Device Extensions", &device.extensions)?;
    writeln!(out)?;

    let memory_types = device.memory.memory_types_as_slice();
    writeln!(out, "    Memory Types (count = {})", memory_types.len())?;
    for (index, memory_type) in memory_types.iter().enumerate() {
        writeln!(
            out,
            "     {index}: heapIndex = {} propertyFlags = {:#x}",
            memory_type.heap_index,
            memory_type.property_flags.as_raw()
        )?;
        for name in memory_property_names(memory_type.property_flags) {
            writeln!(out, "         | {name}")?;
        }
    }
    writeln!(out)?;

    let heaps = device.memory.memory_heaps_as_slice();
    writeln!(out, "    Memory Heaps (count = {})", heaps.len())?;
    for (index, heap) in heaps.iter().enumerate() {
        writeln!(
            out,
            "     {index}: size = {} ({} GiB) flags = {:#x}",
            heap.size,
            format_gib(heap.size),
            heap.flags.as_raw()
        )?;
        for name in memory_heap_names(heap.flags) {
            writeln!(out, "         | {name}")?;
        }
    }
    Ok(())
}

/// `major.minor.patch` of an encoded Vulkan version.
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

/// A bytes count in GiB with two decimals.
pub fn format_gib(bytes: vk::DeviceSize) -> String {
    format!("{:.2}", bytes as f64 / (1u64 << 30) as f64)
}

/// Human readable device type.
pub fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Names of the memory property bits set in `flags`, lowest bit first.
pub fn memory_property_names(flags: vk::MemoryPropertyFlags) -> Vec<&'static str> {
    MEMORY_PROPERTY_NAMES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| *name)
        .collect()
}

/// Names of the memory heap bits set in `flags`, lowest bit first.
pub fn memory_heap_names(flags: vk::MemoryHeapFlags) -> Vec<&'static str> {
    MEMORY_HEAP_NAMES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(report: &InfoReport) -> String {
        let mut out = Vec::new();
        report.write_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn versions_and_sizes() {
        assert_eq!(format_version(vk::make_api_version(0, 1, 3, 250)), "1.3.250");
        assert_eq!(format_gib(1 << 30), "1.00");
        assert_eq!(format_gib(3 << 29), "1.50");
        assert_eq!(format_gib(0), "0.00");
    }

    #[test]
    fn device_types() {
        assert_eq!(
            device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU),
            "Discrete GPU"
        );
        assert_eq!(device_type_name(vk::PhysicalDeviceType::CPU), "CPU");
        assert_eq!(device_type_name(vk::PhysicalDeviceType::OTHER), "Other");
    }

    #[test]
    fn flag_names_in_bit_order() {
        let flags = vk::MemoryPropertyFlags::HOST_COHERENT
            | vk::MemoryPropertyFlags::DEVICE_LOCAL
            | vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(
            memory_property_names(flags),
            vec!["DEVICE_LOCAL", "HOST_VISIBLE", "HOST_COHERENT"]
        );
        assert!(memory_property_names(vk::MemoryPropertyFlags::empty()).is_empty());
        assert_eq!(
            memory_heap_names(vk::MemoryHeapFlags::DEVICE_LOCAL),
            vec!["DEVICE_LOCAL"]
        );
    }

    #[test]
    fn extensions_are_padded_to_longest_name() {
        let report = InfoReport {
            instance_extensions: vec![
                ExtensionInfo {
                    name: "VK_KHR_surface".into(),
                    version: 25,
                },
                ExtensionInfo {
                    name: "VK_EXT_debug_utils".into(),
                    version: 2,
                },
            ],
            ..Default::default()
        };
        let text = render(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Instance Extensions (count = 2)");
        // Longest name is 18 characters, padded by 2
        assert_eq!(lines[1], "    VK_KHR_surface       : version 25");
        assert_eq!(lines[2], "    VK_EXT_debug_utils   : version 2");
    }

    #[test]
    fn short_names_use_minimum_width() {
        let report = InfoReport {
            instance_extensions: vec![ExtensionInfo {
                name: "VK_a".into(),
                version: 1,
            }],
            ..Default::default()
        };
        let text = render(&report);
        assert!(text.contains(&format!("    {:<12} : version 1", "VK_a")));
    }

    #[test]
    fn layer_lines() {
        let report = InfoReport {
            layers: vec![LayerInfo {
                name: "VK_LAYER_KHRONOS_validation".into(),
                spec_version: vk::make_api_version(0, 1, 3, 280),
                implementation_version: 1,
                description: "Khronos Validation Layer".into(),
            }],
            ..Default::default()
        };
        let text = render(&report);
        assert!(text.contains("Instance Layers (count = 1)"));
        assert!(text.contains(
            "    VK_LAYER_KHRONOS_validation   : spec-version 1.3.280 impl-version 1"
        ));
        assert!(text.contains("Description: Khronos Validation Layer"));
    }

    #[test]
    fn device_section() {
        let mut properties = vk::PhysicalDeviceProperties {
            vendor_id: 0x10de,
            device_id: 0x2684,
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::make_api_version(0, 1, 3, 0),
            ..Default::default()
        };
        for (dst, src) in properties.device_name.iter_mut().zip(b"Test GPU") {
            *dst = *src as std::ffi::c_char;
        }
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 1,
            memory_heap_count: 1,
            ..Default::default()
        };
        memory.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        memory.memory_heaps[0] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };

        let report = InfoReport {
            devices: vec![DeviceInfo {
                properties,
                extensions: Vec::new(),
                memory,
            }],
            ..Default::default()
        };
        let text = render(&report);
        assert!(text.contains("Physical Devices (count = 1)"));
        assert!(text.contains("  0: deviceName = Test GPU vendorID = 0x10de deviceID = 0x2684"));
        assert!(text.contains("deviceType = Discrete GPU apiVersion = 1.3.0"));
        assert!(text.contains("    Memory Types (count = 1)"));
        assert!(text.contains("     0: heapIndex = 0 propertyFlags = 0x1"));
        assert!(text.contains("         | DEVICE_LOCAL"));
        assert!(text.contains("     0: size = 8589934592 (8.00 GiB) flags = 0x1"));
    }
}
