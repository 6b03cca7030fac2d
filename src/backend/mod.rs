// Backend module - Vulkan object wrappers
//
// Each wrapper owns its handle and releases it on drop. Child objects hold an
// `Arc` to their parent, so release always runs in reverse creation order.

pub mod device;
pub mod framebuffer;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;

pub use device::Device;
pub use framebuffer::Framebuffers;
pub use instance::{Instance, InstanceDesc};
pub use pipeline::{GraphicsPipeline, PipelineBuilder, SubpassSpec};
pub use surface::Surface;
pub use swapchain::Swapchain;
