// =============================================================================
// VK-INIT - Vulkan setup without the boilerplate
// =============================================================================
//
// Stands up everything needed before the first frame: instance, surface,
// physical device selection, logical device + queues, swapchain, render pass,
// graphics pipeline and framebuffers.
//
// LAYOUT:
// ┌─────────────────────────────────────────────────────────────────┐
// │  context   - runs the stages in order, owns the results         │
// │    └── backend - one RAII wrapper per Vulkan object             │
// │          └── select - device / surface capability matching      │
// └─────────────────────────────────────────────────────────────────┘
//
// Command recording, synchronization and memory allocation are left to the
// caller.
//
// =============================================================================

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod select;

pub use config::Config;
pub use context::GraphicsContext;
pub use error::SetupError;
