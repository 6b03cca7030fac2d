// Graphics context - the complete setup sequence
//
// instance -> surface -> device -> swapchain -> pipeline -> framebuffers
//
// Each stage takes the values produced by the stages before it. If a stage
// fails, the values already built go out of scope and release their Vulkan
// objects in reverse order.

use anyhow::Result;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use crate::backend::pipeline::{present_color_attachment, replace_blend};
use crate::backend::{
    surface, Device, Framebuffers, GraphicsPipeline, Instance, PipelineBuilder, SubpassSpec, Surface, Swapchain,
};
use crate::config::Config;

/// Everything created during setup.
///
/// IMPORTANT: Field order matters for Drop! Fields drop top to bottom, which
/// is the reverse of creation order.
pub struct GraphicsContext {
    pub framebuffers: Framebuffers,
    pub pipeline: GraphicsPipeline,
    pub swapchain: Swapchain,
    pub device: Arc<Device>,
    pub surface: Arc<Surface>,
    pub instance: Arc<Instance>,
}

impl GraphicsContext {
    /// Run every setup stage for `window`, whose drawable size is `drawable`
    pub fn new<W>(window: &W, drawable: vk::Extent2D, config: &Config) -> Result<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        log::info!("Initializing Vulkan...");

        // Validation only in debug builds, and only when enabled in config
        let validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let surface_extensions = surface::required_extensions(window)?;
        let instance = Instance::new(&config.instance_desc(surface_extensions, validation))?;

        let surface = Surface::new(instance.clone(), window)?;

        let requirement = config.device_requirement()?;
        let device = Device::new(instance.clone(), &surface, &requirement)?;

        let swapchain = Swapchain::new(device.clone(), surface.clone(), &config.surface_preference(), drawable)?;

        let pipeline = default_pipeline(&swapchain, config).build(&device)?;

        let framebuffers = Framebuffers::new(device.clone(), &swapchain, &pipeline)?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            framebuffers,
            pipeline,
            swapchain,
            device,
            surface,
            instance,
        })
    }
}

/// Single colour attachment presented to the swapchain, one subpass,
/// shaders from the config
pub fn default_pipeline(swapchain: &Swapchain, config: &Config) -> PipelineBuilder {
    PipelineBuilder::new(swapchain.extent())
        .shaders(config.pipeline.shaders.iter().cloned())
        .attachment(present_color_attachment(swapchain.format()))
        .color_blend_attachment(replace_blend())
        .subpass(SubpassSpec::graphics().color(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
}
