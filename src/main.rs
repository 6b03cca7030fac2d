// =============================================================================
// EXAMPLE APP - open a window and run the full Vulkan setup against it
// =============================================================================
//
// FLOW:
// 1. Load config.toml (defaults if missing)
// 2. Open a window once the event loop is ready
// 3. Build the GraphicsContext (instance ... framebuffers)
// 4. Idle until the window is closed or Escape is pressed
// 5. Drop the context before the window
//
// No frames are recorded or presented; this is where application code would
// start.
//
// =============================================================================

use anyhow::Result;
use ash::vk;
use std::sync::Arc;
use vk_init::select::QueueRole;
use vk_init::{Config, GraphicsContext};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting {}", config.window.title);
    log::info!("Window: {}x{}", config.window.width, config.window.height);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Setup failures end the event loop; report them as a failed exit
    match app.setup_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or(config.debug.log_level.as_str())).init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The Vulkan context holds a
/// surface created from the window, so it must go first.
struct App {
    config: Config,
    context: Option<GraphicsContext>,
    window: Option<Arc<Window>>,
    setup_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            context: None,
            window: None,
            setup_error: None,
        }
    }

    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        let size = window.inner_size();
        let drawable = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        let context = GraphicsContext::new(window, drawable, &self.config)?;
        log_summary(&context);

        self.context = Some(context);
        Ok(())
    }
}

fn log_summary(context: &GraphicsContext) {
    let selection = &context.device.selection;
    log::info!(
        "Selected GPU: {} ({:?})",
        selection.name,
        selection.device_type
    );
    for role in QueueRole::ALL {
        if let Some(family) = selection.queue_families.get(role) {
            log::info!("  {} queue -> family {}", role, family);
        }
    }

    let surface = &context.swapchain.selection;
    log::info!(
        "Swapchain: {}x{} {:?} / {:?} / {:?}, {} images",
        surface.extent.width,
        surface.extent.height,
        surface.format.format,
        surface.format.color_space,
        surface.present_mode,
        context.swapchain.images.len()
    );
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Resizing would need swapchain recreation, so the window is fixed
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.setup_error = Some(anyhow::anyhow!("Failed to create window: {}", e));
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            self.setup_error = Some(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Context before window; the context itself releases in reverse order
        self.context = None;
        self.window = None;

        log::info!("Cleanup complete");
    }
}
