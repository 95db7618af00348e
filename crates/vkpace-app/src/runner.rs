//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vkpace_gpu::{GpuContextBuilder, VulkanBackend};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::PacedApp;
use crate::config::AppConfig;
use crate::scheduler::{FrameOutcome, FrameScheduler};
use crate::window::WinitSurface;

/// Install the `tracing` subscriber (`RUST_LOG`, default `info`).
///
/// Does nothing if a subscriber is already installed.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Run a [`PacedApp`] with the given configuration.
///
/// Initializes logging, creates the window, device and frame scheduler, and
/// runs the event loop until the window is closed or a frame fails.
pub fn run_app<A: PacedApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct AppRunner<A: PacedApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

// Field order is drop order: the scheduler releases its handles before the
// backend, and the window outlives the surface created for it.
struct AppState<A: PacedApp> {
    scheduler: FrameScheduler<VulkanBackend>,
    app: A,
    backend: Arc<VulkanBackend>,
    surface: WinitSurface,
    target_frame_time: Option<Duration>,
    last_update: Instant,
}

impl<A: PacedApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    if let Some(mut state) = self.state.take() {
                        state.cleanup();
                    }
                    self.failure = Some(e);
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &self.state {
                    state.surface.notify_resized(size.width, size.height);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.surface.window().request_redraw();
        }
    }
}

impl<A: PacedApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build()?;

        // SAFETY: the window is kept alive in AppState after the backend
        let backend = Arc::new(unsafe { VulkanBackend::new(gpu, window.as_ref())? });

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width.max(1),
            height: size.height.max(1),
        };

        let mut app = A::init(&backend, extent)?;
        let scheduler = match FrameScheduler::new(
            Arc::clone(&backend),
            app.queue_graph(),
            extent,
            self.config.scheduler_config(),
        ) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                app.cleanup(&backend);
                return Err(e.into());
            }
        };

        let target_frame_time = self
            .config
            .target_fps
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            scheduler,
            app,
            backend,
            surface: WinitSurface::new(window),
            target_frame_time,
            last_update: Instant::now(),
        })
    }
}

impl<A: PacedApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();
        let dt = frame_start.duration_since(self.last_update).as_secs_f32();
        self.last_update = frame_start;

        self.app.update(dt);

        let outcome = self.scheduler.run_frame(&mut self.surface, &mut self.app)?;

        // Pace only frames that reached the GPU; skipped frames return quickly
        if let (FrameOutcome::Presented { .. }, Some(target)) = (outcome, self.target_frame_time) {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        info!("Starting cleanup...");
        self.scheduler.shutdown();
        self.app.cleanup(&self.backend);
        info!("Cleanup complete");
    }
}
