// Surface - connection between a window and Vulkan
//
// Platform-specific surface creation is delegated to ash-window, which reads
// the raw window/display handles winit exposes.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use super::instance::Instance;

/// Instance extensions the windowing system needs for surface creation
pub fn required_extensions(window: &impl HasRawDisplayHandle) -> Result<Vec<String>> {
    let names = ash_window::enumerate_required_extensions(window.raw_display_handle())
        .context("Failed to query required surface extensions")?;

    Ok(names
        .iter()
        .map(|&ptr| unsafe { std::ffi::CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
        .collect())
}

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    // Keeps the instance alive until the surface is gone
    instance: Arc<Instance>,
}

impl Surface {
    pub fn new<W>(instance: Arc<Instance>, window: &W) -> Result<Arc<Self>>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;

        let loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);

        log::info!("Created Surface");
        Ok(Arc::new(Self {
            surface,
            loader,
            instance,
        }))
    }

    pub fn present_support(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
                .context("Failed to query surface present support")
        }
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .context("Failed to query surface formats")
        }
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .context("Failed to query surface present modes")
        }
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .context("Failed to query surface capabilities")
        }
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
