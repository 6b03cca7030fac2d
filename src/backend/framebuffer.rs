// Framebuffers - one per swapchain image

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::pipeline::GraphicsPipeline;
use super::swapchain::Swapchain;

pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    device: Arc<Device>,
}

impl Framebuffers {
    pub fn new(device: Arc<Device>, swapchain: &Swapchain, pipeline: &GraphicsPipeline) -> Result<Self> {
        let extent = swapchain.extent();
        let mut this = Self {
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
            device,
        };

        for &image_view in &swapchain.image_views {
            let attachments = [image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(pipeline.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { this.device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            this.framebuffers.push(framebuffer);
        }

        log::info!("Created {} Framebuffers", this.framebuffers.len());
        Ok(this)
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}
