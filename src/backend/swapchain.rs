// Swapchain - Window presentation
//
// Negotiates format / present mode / extent through `select::surface`, then
// creates the chain of presentable images and one view per image.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::surface::Surface;
use crate::select::{image_count, select_surface, QueueRole, SurfacePreference, SurfaceSelection};

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub selection: SurfaceSelection,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    device: Arc<Device>,
    _surface: Arc<Surface>,
}

impl Swapchain {
    /// `drawable` is the window's size in pixels, used when the surface
    /// leaves the extent up to the application.
    pub fn new(
        device: Arc<Device>,
        surface: Arc<Surface>,
        preference: &SurfacePreference,
        drawable: vk::Extent2D,
    ) -> Result<Self> {
        let physical_device = device.physical_device;

        let capabilities = surface.capabilities(physical_device)?;
        let formats = surface.formats(physical_device)?;
        let present_modes = surface.present_modes(physical_device)?;

        let selection = select_surface(&formats, &present_modes, &capabilities, drawable, preference)?;
        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}",
            selection.extent.width,
            selection.extent.height,
            selection.format.format,
            selection.present_mode
        );

        let graphics = device.queue_family(QueueRole::Graphics);
        let present = device.queue_family(QueueRole::Present);
        let shared_families = match (graphics, present) {
            (Some(g), Some(p)) if g != p => vec![g, p],
            _ => Vec::new(),
        };
        let sharing_mode = if shared_families.is_empty() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&device.instance().instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count(&capabilities))
            .image_format(selection.format.format)
            .image_color_space(selection.format.color_space)
            .image_extent(selection.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&shared_families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(selection.present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // Owned from here on; a failing image view creation drops what exists.
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            selection,
            capabilities,
            device,
            _surface: surface,
        };
        log::info!("Created Swapchain");

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(this.swapchain) }
            .context("Failed to get swapchain images")?;

        for &image in &this.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(this.selection.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { this.device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            this.image_views.push(view);
        }

        log::info!("Created {} Images and Image Views", this.image_views.len());
        Ok(this)
    }

    pub fn format(&self) -> vk::Format {
        self.selection.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.selection.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
