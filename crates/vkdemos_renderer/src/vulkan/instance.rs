//! Vulkan instance creation and the validation messenger

use std::ffi::{CStr, CString};

use anyhow::Context;
use ash::vk;
use log::{debug, info, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Parameters for [`Instance::new`].
#[derive(Debug, Clone)]
pub struct InstanceConfig<'a> {
    pub application_name: &'a str,
    pub engine_name: &'a str,
    pub api_version: u32,
    /// Enable the Khronos validation layer and route its messages to the logger
    pub validation: bool,
    /// Extensions the demo cannot run without
    pub required_extensions: Vec<&'a CStr>,
}

impl Default for InstanceConfig<'_> {
    fn default() -> Self {
        Self {
            application_name: "vkdemos",
            engine_name: "vkdemos",
            api_version: vk::API_VERSION_1_1,
            validation: false,
            required_extensions: Vec::new(),
        }
    }
}

struct DebugUtils {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// The Vulkan loader together with an instance created from it.
pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_utils: Option<DebugUtils>,
}

impl Instance {
    /// Loads Vulkan and creates an instance.
    ///
    /// Missing required extensions are an error. A missing validation layer only disables
    /// validation.
    pub fn new(config: &InstanceConfig) -> anyhow::Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .context("Failed to load Vulkan. Is a Vulkan driver installed?")?;

        // SAFETY: The entry point was successfully loaded above
        match unsafe { entry.try_enumerate_instance_version() }? {
            Some(version) => debug!(
                "Vulkan instance version: {}.{}.{}",
                vk::api_version_major(version),
                vk::api_version_minor(version),
                vk::api_version_patch(version)
            ),
            None => debug!("Vulkan instance version: 1.0"),
        }

        let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("Failed to enumerate instance extensions")?;
        let available_extension_names: Vec<&CStr> = available_extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();

        let mut extensions_to_enable = config.required_extensions.clone();
        if let Some(missing) = extensions_to_enable
            .iter()
            .find(|ext| !available_extension_names.contains(ext))
        {
            anyhow::bail!("Required instance extension not available: {:?}", missing);
        }

        let mut layers_to_enable: Vec<&CStr> = Vec::new();
        let mut validation = config.validation;
        if validation {
            let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
                .context("Failed to enumerate instance layers")?;
            let has_layer = available_layers
                .iter()
                .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
            let has_debug_utils = available_extension_names.contains(&ash::ext::debug_utils::NAME);

            if has_layer && has_debug_utils {
                layers_to_enable.push(VALIDATION_LAYER);
                extensions_to_enable.push(ash::ext::debug_utils::NAME);
                info!("Enabling Vulkan validation layers");
            } else {
                warn!("Vulkan validation layers not available, continuing without them");
                validation = false;
            }
        }

        for ext in &extensions_to_enable {
            debug!("Enabling instance extension: {:?}", ext);
        }

        let extension_ptrs: Vec<*const std::ffi::c_char> = extensions_to_enable
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();
        let layer_ptrs: Vec<*const std::ffi::c_char> =
            layers_to_enable.iter().map(|layer| layer.as_ptr()).collect();

        let app_name = CString::new(config.application_name)
            .context("Application name contains a NUL byte")?;
        let engine_name =
            CString::new(config.engine_name).context("Engine name contains a NUL byte")?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(config.api_version);

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let handle = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        info!("Vulkan instance created ({})", config.application_name);

        let debug_utils = if validation {
            Self::setup_debug_messenger(&entry, &handle)
        } else {
            None
        };

        Ok(Self {
            entry,
            handle,
            debug_utils,
        })
    }

    fn setup_debug_messenger(entry: &ash::Entry, instance: &ash::Instance) -> Option<DebugUtils> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let messenger_create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        match unsafe { loader.create_debug_utils_messenger(&messenger_create_info, None) } {
            Ok(messenger) => {
                debug!("Vulkan debug messenger created");
                Some(DebugUtils { loader, messenger })
            }
            Err(e) => {
                warn!("Failed to create Vulkan debug messenger: {:?}", e);
                None
            }
        }
    }

    /// Returns the Vulkan function loader.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Returns the instance handle.
    pub fn handle(&self) -> &ash::Instance {
        &self.handle
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug_utils) = &self.debug_utils {
                debug_utils
                    .loader
                    .destroy_debug_utils_messenger(debug_utils.messenger, None);
            }
            self.handle.destroy_instance(None);
        }
        debug!("Vulkan instance destroyed");
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        let callback_data = unsafe { &*p_callback_data };
        if callback_data.p_message.is_null() {
            std::borrow::Cow::Borrowed("(no message)")
        } else {
            unsafe { CStr::from_ptr(callback_data.p_message) }.to_string_lossy()
        }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            log::debug!("[Vulkan {}] {}", type_str, message);
        }
    }

    vk::FALSE
}
