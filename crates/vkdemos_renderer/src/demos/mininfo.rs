//! `vkmininfo`: prints the extensions, layers and devices the Vulkan installation offers

use std::io::Write;

use anyhow::Context;
use ash::vk;
use log::info;
use vkdemos_shared::DemoConfig;

use crate::info::InfoReport;
use crate::vulkan::{Instance, InstanceConfig};

pub fn run(config: &DemoConfig) -> anyhow::Result<()> {
    let instance = Instance::new(&InstanceConfig {
        application_name: "VkMinInfo",
        engine_name: "Raw",
        api_version: vk::API_VERSION_1_0,
        validation: config.validation,
        ..Default::default()
    })?;

    let report = InfoReport::query(&instance)?;
    info!(
        "Found {} instance extensions, {} layers and {} devices",
        report.instance_extensions.len(),
        report.layers.len(),
        report.devices.len()
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    report
        .write_to(&mut out)
        .and_then(|()| out.flush())
        .context("Failed to write the report")
}
