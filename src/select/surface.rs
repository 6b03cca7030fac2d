// Surface format, present mode and extent selection
//
// The caller states a preference; with `suggestion` set an unsupported
// preference is replaced by a default instead of failing.

use ash::vk;

use crate::error::SetupError;

/// What the caller would like the swapchain to use
#[derive(Debug, Clone, Copy)]
pub struct SurfacePreference {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    /// Substitute defaults instead of failing when the preference is unsupported
    pub suggestion: bool,
}

impl Default for SurfacePreference {
    fn default() -> Self {
        Self {
            format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            suggestion: true,
        }
    }
}

/// Negotiated swapchain parameters
#[derive(Debug, Clone, Copy)]
pub struct SurfaceSelection {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

pub fn select_format(
    supported: &[vk::SurfaceFormatKHR],
    preference: &SurfacePreference,
) -> Result<vk::SurfaceFormatKHR, SetupError> {
    let wanted = preference.format;
    let found = supported
        .iter()
        .any(|f| f.format == wanted.format && f.color_space == wanted.color_space);

    if found {
        return Ok(wanted);
    }
    if !preference.suggestion {
        log::warn!("Cannot find specified format {:?}", wanted.format);
        return Err(SetupError::UnsupportedSurfaceFormat {
            format: wanted.format,
            color_space: wanted.color_space,
        });
    }

    let fallback = supported.first().copied().ok_or(SetupError::NoSurfaceFormats)?;
    log::warn!(
        "Could not find format {:?}, switching to {:?}",
        wanted.format,
        fallback.format
    );
    Ok(fallback)
}

pub fn select_present_mode(
    supported: &[vk::PresentModeKHR],
    preference: &SurfacePreference,
) -> Result<vk::PresentModeKHR, SetupError> {
    if supported.contains(&preference.present_mode) {
        return Ok(preference.present_mode);
    }
    if !preference.suggestion {
        log::warn!("Cannot find specified present mode {:?}", preference.present_mode);
        return Err(SetupError::UnsupportedPresentMode(preference.present_mode));
    }

    // FIFO is the one mode every implementation must support
    log::info!(
        "Could not find present mode {:?}, switching to FIFO",
        preference.present_mode
    );
    Ok(vk::PresentModeKHR::FIFO)
}

/// Swapchain extent for the given drawable size.
///
/// The surface's current extent wins unless it is the `u32::MAX` sentinel.
/// Otherwise the drawable size is raised to at least `min_image_extent`.
/// `max_image_extent` is not applied.
pub fn resolve_extent(capabilities: &vk::SurfaceCapabilitiesKHR, drawable: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: drawable.width.max(capabilities.min_image_extent.width),
        height: drawable.height.max(capabilities.min_image_extent.height),
    }
}

/// One more image than the minimum, capped when the surface has a maximum
pub fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

pub fn select_surface(
    formats: &[vk::SurfaceFormatKHR],
    present_modes: &[vk::PresentModeKHR],
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
    preference: &SurfacePreference,
) -> Result<SurfaceSelection, SetupError> {
    let format = select_format(formats, preference)?;
    let present_mode = select_present_mode(present_modes, preference)?;
    let extent = resolve_extent(capabilities, drawable);

    Ok(SurfaceSelection {
        format,
        present_mode,
        extent,
    })
}
