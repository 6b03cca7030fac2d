// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Describe every physical device as a `DeviceCandidate`
// - Run the selection policy from `select::device`
// - Logical device + one queue per assigned role

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::instance::{c_chars_to_string, to_cstrings, Instance};
use super::surface::Surface;
use crate::select::{select_device, DeviceCandidate, DeviceRequirement, DeviceSelection, QueueFamilyCaps, QueueRole};

/// Query everything the selector needs about each physical device
pub fn query_candidates(instance: &Instance, surface: &Surface) -> Result<Vec<DeviceCandidate>> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    devices
        .into_iter()
        .map(|device| -> Result<DeviceCandidate> {
            let properties = unsafe { instance.instance.get_physical_device_properties(device) };
            let features = unsafe { instance.instance.get_physical_device_features(device) };

            let extensions = unsafe { instance.instance.enumerate_device_extension_properties(device) }
                .context("Failed to enumerate device extensions")?
                .iter()
                .map(|p| c_chars_to_string(&p.extension_name))
                .collect();

            let families = unsafe { instance.instance.get_physical_device_queue_family_properties(device) };
            let queue_families = families
                .iter()
                .enumerate()
                .map(|(index, props)| -> Result<QueueFamilyCaps> {
                    Ok(QueueFamilyCaps {
                        flags: props.queue_flags,
                        present: surface.present_support(device, index as u32)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(DeviceCandidate {
                handle: device,
                name: c_chars_to_string(&properties.device_name),
                device_type: properties.device_type,
                features,
                extensions,
                queue_families,
            })
        })
        .collect()
}

/// Logical device with automatic cleanup
pub struct Device {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub selection: DeviceSelection,
    queues: BTreeMap<QueueRole, vk::Queue>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,

    // Keeps the instance alive until the device is gone
    instance: Arc<Instance>,
}

impl Device {
    /// Select a physical device for `requirement` and open it
    pub fn new(instance: Arc<Instance>, surface: &Surface, requirement: &DeviceRequirement) -> Result<Arc<Self>> {
        let candidates = query_candidates(&instance, surface)?;
        log::info!("Found {} physical device(s)", candidates.len());

        let selection = select_device(&candidates, requirement)?;
        Self::from_selection(instance, selection)
    }

    /// Open a logical device on an already selected physical device, enabling
    /// the selection's features and extensions
    pub fn from_selection(instance: Arc<Instance>, selection: DeviceSelection) -> Result<Arc<Self>> {
        let physical_device = selection.handle;

        let families = selection.queue_families.unique_families();
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extension_names = to_cstrings(&selection.extensions)?;
        let extension_ptrs: Vec<_> = extension_names.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&selection.features);

        let device = unsafe { instance.instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;
        log::info!("Created Logical Device ({} queue families)", families.len());

        let queues = selection
            .queue_families
            .iter()
            .map(|(role, family)| (role, unsafe { device.get_device_queue(family, 0) }))
            .collect();
        log::info!("Retrieved Queues");

        let properties = unsafe { instance.instance.get_physical_device_properties(physical_device) };
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            selection,
            queues,
            properties,
            instance,
        }))
    }

    pub fn queue(&self, role: QueueRole) -> Option<vk::Queue> {
        self.queues.get(&role).copied()
    }

    pub fn queue_family(&self, role: QueueRole) -> Option<u32> {
        self.selection.queue_families.get(role)
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
        }
    }
}
