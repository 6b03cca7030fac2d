// Setup errors
//
// Policy failures that a caller may want to react to (retry device selection
// with a relaxed requirement, fall back to another surface format, ...).
// Plain Vulkan call failures travel as `anyhow::Error` with context instead.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::select::Rejection;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("required instance extensions not supported: {0:?}")]
    MissingInstanceExtensions(Vec<String>),
    #[error("required instance layers not supported: {0:?}")]
    MissingInstanceLayers(Vec<String>),
    #[error("could not select a suitable physical device ({} candidates rejected)", .0.len())]
    NoSuitableDevice(Vec<(String, Rejection)>),
    #[error("surface reports no supported formats")]
    NoSurfaceFormats,
    #[error("surface does not support format {format:?} with color space {color_space:?}")]
    UnsupportedSurfaceFormat {
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
    },
    #[error("surface does not support present mode {0:?}")]
    UnsupportedPresentMode(vk::PresentModeKHR),
    #[error("invalid pipeline description: {0}")]
    InvalidPipeline(String),
    #[error("could not read shader {path:?}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
