// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides defaults if the config file is missing. Names in the `device`
// section must be valid; surface settings fall back with a warning.

use anyhow::{bail, Context, Result};
use ash::vk;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::backend::InstanceDesc;
use crate::select::{features, DeviceRequirement, DeviceTypes, NameMatch, QueueRole, SurfacePreference};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub instance: InstanceConfig,
    pub device: DeviceConfig,
    pub surface: SurfaceConfig,
    pub pipeline: PipelineConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "example app".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Instance settings; surface extensions are added at runtime
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub application_name: String,
    pub engine_name: String,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            application_name: "example app".to_string(),
            engine_name: "example app engine".to_string(),
            extensions: Vec::new(),
            layers: Vec::new(),
        }
    }
}

/// Physical device requirements
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// "other", "integrated_gpu", "discrete_gpu", "virtual_gpu", "cpu"
    pub types: Vec<String>,
    /// Core feature names, e.g. "sampler_anisotropy"
    pub features: Vec<String>,
    /// "graphics", "compute", "transfer", "sparse_binding", "present"
    pub queues: Vec<String>,
    pub extensions: Vec<String>,
    /// "exact" or "prefix"
    pub extension_match: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            types: vec![
                "discrete_gpu".to_string(),
                "integrated_gpu".to_string(),
                "virtual_gpu".to_string(),
                "cpu".to_string(),
                "other".to_string(),
            ],
            features: Vec::new(),
            queues: vec!["graphics".to_string(), "present".to_string()],
            extensions: vec!["VK_KHR_swapchain".to_string()],
            extension_match: "exact".to_string(),
        }
    }
}

/// Swapchain preferences
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub format: String,
    pub color_space: String,
    pub present_mode: String,
    /// Use defaults instead of failing when the preference is unsupported
    pub suggestion: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            format: "b8g8r8a8_srgb".to_string(),
            color_space: "srgb_nonlinear".to_string(),
            present_mode: "fifo".to_string(),
            suggestion: true,
        }
    }
}

/// Pipeline settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub shaders: Vec<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shaders: vec![
                PathBuf::from("shaders/triangle.vert.spv"),
                PathBuf::from("shaders/triangle.frag.spv"),
            ],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// Default log level, overridden by RUST_LOG
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Instance description; `surface_extensions` come from the window
    pub fn instance_desc(&self, surface_extensions: Vec<String>, validation: bool) -> InstanceDesc {
        let mut extensions = surface_extensions;
        for name in &self.instance.extensions {
            if !extensions.contains(name) {
                extensions.push(name.clone());
            }
        }

        InstanceDesc {
            application_name: self.instance.application_name.clone(),
            engine_name: self.instance.engine_name.clone(),
            extensions,
            layers: self.instance.layers.clone(),
            validation,
        }
    }

    /// Device requirement from the `device` section; unknown names are errors
    pub fn device_requirement(&self) -> Result<DeviceRequirement> {
        let mut types = DeviceTypes::empty();
        for name in &self.device.types {
            types |= match name.to_lowercase().as_str() {
                "other" => DeviceTypes::OTHER,
                "integrated_gpu" | "integrated" => DeviceTypes::INTEGRATED_GPU,
                "discrete_gpu" | "discrete" => DeviceTypes::DISCRETE_GPU,
                "virtual_gpu" | "virtual" => DeviceTypes::VIRTUAL_GPU,
                "cpu" => DeviceTypes::CPU,
                _ => bail!("Unknown device type '{}'", name),
            };
        }
        if types.is_empty() {
            bail!("At least one device type must be accepted");
        }

        let mut device_features = vk::PhysicalDeviceFeatures::default();
        for name in &self.device.features {
            if !features::enable_feature(&mut device_features, name) {
                bail!("Unknown device feature '{}'", name);
            }
        }

        let mut queues = BTreeSet::new();
        for name in &self.device.queues {
            let role = match name.to_lowercase().as_str() {
                "graphics" => QueueRole::Graphics,
                "compute" => QueueRole::Compute,
                "transfer" => QueueRole::Transfer,
                "sparse_binding" => QueueRole::SparseBinding,
                "present" => QueueRole::Present,
                _ => bail!("Unknown queue role '{}'", name),
            };
            queues.insert(role);
        }

        let extension_match = match self.device.extension_match.to_lowercase().as_str() {
            "exact" => NameMatch::Exact,
            "prefix" => NameMatch::Prefix,
            other => bail!("Unknown extension match policy '{}'", other),
        };

        Ok(DeviceRequirement {
            types,
            features: device_features,
            extensions: self.device.extensions.clone(),
            extension_match,
            queues,
        })
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.surface.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.surface.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Get surface format + color space as Vulkan struct
    pub fn get_surface_format(&self) -> vk::SurfaceFormatKHR {
        let format = match self.surface.format.to_lowercase().as_str() {
            "b8g8r8a8_srgb" => vk::Format::B8G8R8A8_SRGB,
            "b8g8r8a8_unorm" => vk::Format::B8G8R8A8_UNORM,
            "r8g8b8a8_srgb" => vk::Format::R8G8B8A8_SRGB,
            "r8g8b8a8_unorm" => vk::Format::R8G8B8A8_UNORM,
            "a2b10g10r10_unorm" => vk::Format::A2B10G10R10_UNORM_PACK32,
            "r16g16b16a16_sfloat" => vk::Format::R16G16B16A16_SFLOAT,
            _ => {
                log::warn!(
                    "Unknown surface format '{}', defaulting to B8G8R8A8_SRGB",
                    self.surface.format
                );
                vk::Format::B8G8R8A8_SRGB
            }
        };

        let color_space = match self.surface.color_space.to_lowercase().as_str() {
            "srgb_nonlinear" => vk::ColorSpaceKHR::SRGB_NONLINEAR,
            "extended_srgb_linear" => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            "hdr10_st2084" => vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            _ => {
                log::warn!(
                    "Unknown color space '{}', defaulting to SRGB_NONLINEAR",
                    self.surface.color_space
                );
                vk::ColorSpaceKHR::SRGB_NONLINEAR
            }
        };

        vk::SurfaceFormatKHR { format, color_space }
    }

    pub fn surface_preference(&self) -> SurfacePreference {
        SurfacePreference {
            format: self.get_surface_format(),
            present_mode: self.get_present_mode(),
            suggestion: self.surface.suggestion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 640);
        assert!(config.surface.suggestion);
        assert_eq!(config.pipeline.shaders.len(), 2);
    }

    #[test]
    fn default_requirement_accepts_every_type() {
        let requirement = Config::default().device_requirement().unwrap();
        assert_eq!(requirement.types, DeviceTypes::all());
        assert!(requirement.queues.contains(&QueueRole::Graphics));
        assert!(requirement.queues.contains(&QueueRole::Present));
        assert_eq!(requirement.extensions, vec!["VK_KHR_swapchain"]);
        assert_eq!(requirement.extension_match, NameMatch::Exact);
    }

    #[test]
    fn parses_device_section() {
        let config = Config::parse(
            r#"
            [device]
            types = ["cpu"]
            features = ["sampler_anisotropy", "wide_lines"]
            queues = ["graphics", "present", "transfer"]
            extension_match = "prefix"
            "#,
        )
        .unwrap();

        let requirement = config.device_requirement().unwrap();
        assert_eq!(requirement.types, DeviceTypes::CPU);
        assert_eq!(requirement.features.sampler_anisotropy, vk::TRUE);
        assert_eq!(requirement.features.wide_lines, vk::TRUE);
        assert_eq!(requirement.features.geometry_shader, vk::FALSE);
        assert_eq!(requirement.queues.len(), 3);
        assert_eq!(requirement.extension_match, NameMatch::Prefix);
    }

    #[test]
    fn unknown_names_in_requirement_are_errors() {
        for section in [
            "[device]\ntypes = [\"gpu\"]",
            "[device]\nfeatures = [\"ray_tracing\"]",
            "[device]\nqueues = [\"video\"]",
            "[device]\nextension_match = \"fuzzy\"",
            "[device]\ntypes = []",
        ] {
            let config = Config::parse(section).unwrap();
            assert!(config.device_requirement().is_err(), "{}", section);
        }
    }

    #[test]
    fn surface_preference_from_strings() {
        let config = Config::parse(
            r#"
            [surface]
            format = "R8G8B8A8_UNORM"
            present_mode = "mailbox"
            suggestion = false
            "#,
        )
        .unwrap();

        let preference = config.surface_preference();
        assert_eq!(preference.format.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(preference.format.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert_eq!(preference.present_mode, vk::PresentModeKHR::MAILBOX);
        assert!(!preference.suggestion);
    }

    #[test]
    fn unknown_present_mode_defaults_to_fifo() {
        let config = Config::parse("[surface]\npresent_mode = \"vsync\"").unwrap();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn instance_extensions_are_merged_without_duplicates() {
        let config = Config::parse(
            r#"
            [instance]
            extensions = ["VK_KHR_surface", "VK_KHR_get_surface_capabilities2"]
            "#,
        )
        .unwrap();

        let desc = config.instance_desc(vec!["VK_KHR_surface".into(), "VK_KHR_xcb_surface".into()], false);
        assert_eq!(
            desc.extensions,
            vec!["VK_KHR_surface", "VK_KHR_xcb_surface", "VK_KHR_get_surface_capabilities2"]
        );
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("no/such/config.toml").unwrap();
        assert_eq!(config.window.title, "example app");
    }
}
