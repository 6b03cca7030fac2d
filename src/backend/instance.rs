// Vulkan Instance - entry point into the API
//
// Responsibilities:
// - Load the Vulkan library
// - Verify required instance extensions and layers before creating anything
// - Optional validation layer + debug messenger routed into `log`

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::error::SetupError;
use crate::select::{resolve_names, NameMatch};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// What the instance should be created with
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    pub application_name: String,
    pub engine_name: String,
    /// Instance extensions, usually the windowing layer's surface extensions
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    /// Adds the Khronos validation layer and a debug messenger
    pub validation: bool,
}

impl InstanceDesc {
    /// Extension and layer lists with the validation additions applied
    fn resolved_names(&self) -> (Vec<String>, Vec<String>) {
        let mut extensions = self.extensions.clone();
        let mut layers = self.layers.clone();

        if self.validation {
            let debug_utils = ash::extensions::ext::DebugUtils::name().to_string_lossy().into_owned();
            if !extensions.contains(&debug_utils) {
                extensions.push(debug_utils);
            }
            if !layers.iter().any(|l| l == VALIDATION_LAYER) {
                layers.push(VALIDATION_LAYER.to_string());
            }
        }

        (extensions, layers)
    }
}

/// Vulkan instance with automatic cleanup
pub struct Instance {
    pub instance: ash::Instance,
    pub entry: Entry,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    pub fn new(desc: &InstanceDesc) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", desc.application_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let (extensions, layers) = desc.resolved_names();
        let (extensions, layers) = check_support(&entry, &extensions, &layers)?;

        let app_name = CString::new(desc.application_name.as_str())?;
        let engine_name = CString::new(desc.engine_name.as_str())?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_names = to_cstrings(&extensions)?;
        let layer_names = to_cstrings(&layers)?;
        let extension_ptrs: Vec<_> = extension_names.iter().map(|n| n.as_ptr()).collect();
        let layer_ptrs: Vec<_> = layer_names.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        // From here on `Instance` owns the handle, so an early return cleans up.
        let mut this = Self {
            instance,
            entry,
            debug_utils: None,
        };

        if desc.validation {
            this.debug_utils = Some(this.setup_debug_messenger()?);
        }

        log::info!("Created Instance");
        Ok(Arc::new(this))
    }

    fn setup_debug_messenger(&self) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(&self.entry, &self.instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Names to enable, as the loader reports them
fn check_support(entry: &Entry, extensions: &[String], layers: &[String]) -> Result<(Vec<String>, Vec<String>)> {
    let available_extensions: Vec<String> = entry
        .enumerate_instance_extension_properties(None)
        .context("Failed to enumerate instance extensions")?
        .iter()
        .map(|p| c_chars_to_string(&p.extension_name))
        .collect();

    let available_layers: Vec<String> = entry
        .enumerate_instance_layer_properties()
        .context("Failed to enumerate instance layers")?
        .iter()
        .map(|p| c_chars_to_string(&p.layer_name))
        .collect();

    Ok(resolve_support(extensions, layers, &available_extensions, &available_layers)?)
}

/// Fail with the full list of missing extensions or layers.
///
/// Instance extensions keep the prefix comparison; layers must match exactly.
fn resolve_support(
    extensions: &[String],
    layers: &[String],
    available_extensions: &[String],
    available_layers: &[String],
) -> Result<(Vec<String>, Vec<String>), SetupError> {
    let extensions = resolve_names(extensions, available_extensions, NameMatch::Prefix).map_err(|missing| {
        log::warn!("required instance extensions not supported: {:?}", missing);
        SetupError::MissingInstanceExtensions(missing)
    })?;

    let layers = resolve_names(layers, available_layers, NameMatch::Exact).map_err(|missing| {
        log::warn!("required instance layers not supported: {:?}", missing);
        SetupError::MissingInstanceLayers(missing)
    })?;

    Ok((extensions, layers))
}

pub(crate) fn to_cstrings(names: &[String]) -> Result<Vec<CString>> {
    names
        .iter()
        .map(|n| CString::new(n.as_str()).with_context(|| format!("Invalid name {:?}", n)))
        .collect()
}

/// Fixed-size, NUL-terminated name array from a Vulkan properties struct
pub(crate) fn c_chars_to_string(raw: &[std::os::raw::c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
