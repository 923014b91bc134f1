use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use glint_core::config::RendererConfig;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

mod editor;
mod renderer;

use renderer::Renderer;

/// Application state
struct App {
    config: RendererConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    last_frame_time: Instant,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            last_frame_time: Instant::now(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Extra room for the side panel next to the preview
        let [width, height] = self.config.size;
        let window_attrs = Window::default_attributes()
            .with_title("Glint")
            .with_inner_size(winit::dpi::PhysicalSize::new(width + 320, height));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(Renderer::new(window.clone(), &self.config)) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
                log::info!("Window and renderer initialized");
            }
            Err(e) => {
                log::error!("Failed to initialize renderer: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        // Let egui handle the event first
        if let (Some(renderer), Some(window)) = (&mut self.renderer, &self.window) {
            if renderer.handle_egui_event(window, &event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(physical_size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize((physical_size.width, physical_size.height));
                    log::info!("Resized to {}x{}", physical_size.width, physical_size.height);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyF),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.frame_mesh();
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let delta_time = (now - self.last_frame_time).as_secs_f32();
                self.last_frame_time = now;

                if let (Some(renderer), Some(window)) = (&mut self.renderer, &self.window) {
                    renderer.update_fps(delta_time);

                    if let Err(e) = renderer.render(window) {
                        // Check if it's a surface error we can handle
                        if let Some(surface_err) = e.downcast_ref::<wgpu::SurfaceError>() {
                            match surface_err {
                                wgpu::SurfaceError::Lost => {
                                    let size = renderer.size;
                                    renderer.resize(size);
                                }
                                wgpu::SurfaceError::OutOfMemory => {
                                    log::error!("Out of memory!");
                                    event_loop.exit();
                                }
                                _ => {
                                    log::error!("Surface error: {:?}", surface_err);
                                }
                            }
                        } else {
                            log::error!("Render error: {:#}", e);
                        }
                    }

                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting Glint");

    // Optional JSON config as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading config {}", path);
            RendererConfig::load(&path)?
        }
        None => RendererConfig::default(),
    };
    config.validate()?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);

    log::info!("Running event loop");
    event_loop.run_app(&mut app)?;

    Ok(())
}
