//! Window surface, egui and the preview viewport.
//!
//! The preview renders offscreen; its color target is registered as an egui
//! texture and shown in the central panel, with the controls in a side panel
//! and one editor window per shader stage.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use wgpu::{Surface, SurfaceConfiguration};
use winit::window::Window;

use glint_core::config::RendererConfig;
use glint_core::texture::TextureRole;
use glint_math::{Camera, Vec3};
use glint_viewport::{default_shader, GpuContext, ProgramError, ShaderStage, Viewport};

use crate::editor::ShaderEditor;

const COLOR_ROLES: [TextureRole; 4] = [
    TextureRole::Albedo,
    TextureRole::Normal,
    TextureRole::Roughness,
    TextureRole::Environment,
];

/// Requests collected while the UI runs, applied once it returns.
enum UiAction {
    LoadTexture(TextureRole, PathBuf),
    SetSharpness(f32),
    Compile(ShaderStage),
    Screenshot(PathBuf),
    FrameMesh,
}

/// Panel state that outlives a single frame.
struct PanelState {
    texture_paths: Vec<(TextureRole, String)>,
    sharpness: f32,
    screenshot_path: String,
    message: String,
}

fn editor_index(stage: ShaderStage) -> usize {
    (stage == ShaderStage::Fragment) as usize
}

/// One editor per stage, starting from the built-in source in the configured
/// language when a file cannot be read.
fn load_editors(config: &RendererConfig) -> [ShaderEditor; 2] {
    let language = config.language();
    [
        (ShaderStage::Vertex, &config.vertex_shader_path),
        (ShaderStage::Fragment, &config.fragment_shader_path),
    ]
    .map(|(stage, path)| ShaderEditor::load(stage, path, default_shader(language, stage)))
}

/// Build the viewport from the editor sources.
///
/// A stage that fails to compile is swapped for its built-in source in the
/// same language and the failure is marked in its editor, whose text is left
/// as is so it can be fixed and hot-swapped later. A link failure falls back
/// on both stages.
fn start_viewport(
    gpu: &GpuContext,
    config: &RendererConfig,
    editors: &mut [ShaderEditor; 2],
) -> Result<Viewport> {
    let language = config.language();
    let mut sources = [editors[0].text.clone(), editors[1].text.clone()];
    let mut builtin = [false; 2];

    loop {
        let error = match Viewport::new(gpu, config, &sources[0], &sources[1]) {
            Ok(viewport) => return Ok(viewport),
            Err(e) => e.downcast::<ProgramError>()?,
        };

        let stages: &[ShaderStage] = match &error {
            ProgramError::Compile {
                stage: ShaderStage::Vertex,
                ..
            } => &[ShaderStage::Vertex],
            ProgramError::Compile {
                stage: ShaderStage::Fragment,
                ..
            } => &[ShaderStage::Fragment],
            ProgramError::Link { .. } => &[ShaderStage::Fragment, ShaderStage::Vertex],
        };
        if stages.iter().all(|&stage| builtin[editor_index(stage)]) {
            return Err(error.into());
        }

        // Blame the first stage that still runs user code
        if let Some(index) = stages
            .iter()
            .map(|&stage| editor_index(stage))
            .find(|&index| !builtin[index])
        {
            editors[index].show_startup_failure(&error);
        }
        log::error!("{}, falling back to the built-in {:?} shader", error, language);

        for &stage in stages {
            let index = editor_index(stage);
            sources[index] = default_shader(language, stage).to_string();
            builtin[index] = true;
        }
    }
}

pub struct Renderer {
    surface: Surface<'static>,
    config: SurfaceConfiguration,
    gpu: GpuContext,
    pub size: (u32, u32),

    pub viewport: Viewport,
    pub camera: Camera,
    preview_size: (u32, u32),
    preview_texture: egui::TextureId,
    preview_generation: u64,

    editors: [ShaderEditor; 2],
    panel: PanelState,

    // egui state
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // FPS tracking
    pub fps: f32,
    frame_count: u32,
    fps_update_timer: f32,
}

impl Renderer {
    pub async fn new(window: Arc<Window>, config: &RendererConfig) -> Result<Self> {
        let size = window.inner_size();

        let instance = GpuContext::create_instance();
        let surface = instance.create_surface(window.clone())?;
        let gpu = GpuContext::for_surface(instance, &surface).await?;

        // Configure surface
        let surface_caps = surface.get_capabilities(&gpu.adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let surface_config = SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &surface_config);

        let mut editors = load_editors(config);
        let mut viewport = start_viewport(&gpu, config, &mut editors)?;
        viewport.load_assets(config)?;

        let mut camera = Camera::default();
        camera.position = Vec3::from_array(config.camera_position);

        // Initialize egui
        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None, // max_texture_side (use default)
        );

        let mut egui_renderer = egui_wgpu::Renderer::new(
            &gpu.device,
            surface_config.format,
            None, // No depth testing for egui
            1,
            false, // allow_srgb_render_target
        );

        let preview_texture = egui_renderer.register_native_texture(
            &gpu.device,
            viewport.color_view(),
            wgpu::FilterMode::Linear,
        );
        let preview_generation = viewport.target().generation();

        let panel = PanelState {
            texture_paths: COLOR_ROLES
                .iter()
                .map(|&role| {
                    let path = match role {
                        TextureRole::Albedo => &config.albedo_path,
                        TextureRole::Normal => &config.normal_path,
                        TextureRole::Roughness => &config.roughness_path,
                        _ => &config.environment_path,
                    };
                    let text = path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    (role, text)
                })
                .collect(),
            sharpness: config.sharpness,
            screenshot_path: "screenshot.png".to_string(),
            message: String::new(),
        };

        log::info!("Renderer initialized");

        Ok(Self {
            surface,
            config: surface_config,
            gpu,
            size: (size.width, size.height),
            viewport,
            camera,
            preview_size: (config.size[0], config.size[1]),
            preview_texture,
            preview_generation,
            editors,
            panel,
            egui_ctx,
            egui_state,
            egui_renderer,
            fps: 0.0,
            frame_count: 0,
            fps_update_timer: 0.0,
        })
    }

    pub fn resize(&mut self, new_size: (u32, u32)) {
        if new_size.0 > 0 && new_size.1 > 0 {
            self.size = new_size;
            self.config.width = new_size.0;
            self.config.height = new_size.1;
            self.surface.configure(&self.gpu.device, &self.config);
        }
    }

    /// Frame the camera on the loaded mesh
    pub fn frame_mesh(&mut self) {
        if let Some((min, max)) = self.viewport.mesh_bounds() {
            self.camera.frame_bounds(min, max);
            log::info!("Framed mesh, distance {:.2}", self.camera.distance());
        }
    }

    /// Handle egui window event - returns true if event was consumed by egui
    pub fn handle_egui_event(&mut self, window: &Window, event: &winit::event::WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(window, event);
        response.consumed
    }

    /// Update FPS counter (call each frame with delta_time)
    pub fn update_fps(&mut self, delta_time: f32) {
        self.frame_count += 1;
        self.fps_update_timer += delta_time;

        // Update FPS every 0.5 seconds
        if self.fps_update_timer >= 0.5 {
            self.fps = self.frame_count as f32 / self.fps_update_timer;
            self.frame_count = 0;
            self.fps_update_timer = 0.0;
        }
    }

    /// Render the preview, then the UI around it.
    pub fn render(&mut self, window: &Window) -> Result<()> {
        // Preview first so the UI shows this frame
        let (width, height) = self.preview_size;
        self.viewport.render(&self.camera, width, height)?;

        if self.viewport.target().generation() != self.preview_generation {
            self.egui_renderer.update_egui_texture_from_wgpu_texture(
                &self.gpu.device,
                self.viewport.color_view(),
                wgpu::FilterMode::Linear,
                self.preview_texture,
            );
            self.preview_generation = self.viewport.target().generation();
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let raw_input = self.egui_state.take_egui_input(window);
        let mut actions = Vec::new();
        let mut preview_size = self.preview_size;

        let egui_ctx = self.egui_ctx.clone();
        let full_output = egui_ctx.run(raw_input, |ctx| {
            self.side_panel(ctx, &mut actions);

            egui::CentralPanel::default()
                .frame(egui::Frame::none().fill(egui::Color32::from_gray(24)))
                .show(ctx, |ui| {
                    let available = ui.available_size();
                    let pixels_per_point = ctx.pixels_per_point();
                    preview_size = (
                        ((available.x * pixels_per_point) as u32).max(1),
                        ((available.y * pixels_per_point) as u32).max(1),
                    );

                    let response = ui.add(
                        egui::Image::new((self.preview_texture, available))
                            .sense(egui::Sense::click_and_drag()),
                    );
                    if response.dragged_by(egui::PointerButton::Primary) {
                        let delta = response.drag_delta() * pixels_per_point;
                        let sensitivity = 0.005;
                        self.camera
                            .orbit(-delta.x * sensitivity, -delta.y * sensitivity);
                    }
                    if response.hovered() {
                        let scroll = ui.input(|i| i.smooth_scroll_delta.y);
                        if scroll != 0.0 {
                            self.camera.dolly(scroll * 0.01);
                        }
                    }
                });

            for editor in &mut self.editors {
                if editor.open && editor.show(ctx) {
                    actions.push(UiAction::Compile(editor.stage));
                }
            }
        });

        self.preview_size = preview_size;
        for action in actions {
            self.apply(action);
        }

        self.egui_state
            .handle_platform_output(window, full_output.platform_output);

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.size.0, self.size.1],
            pixels_per_point: window.scale_factor() as f32,
        };

        let paint_jobs = egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        // Upload egui textures
        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.gpu.device, &self.gpu.queue, *id, image_delta);
        }

        self.egui_renderer.update_buffers(
            &self.gpu.device,
            &self.gpu.queue,
            &mut encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut egui_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui Render Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime(); // Need 'static lifetime for egui renderer

            self.egui_renderer
                .render(&mut egui_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    fn side_panel(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        egui::SidePanel::left("controls_panel")
            .default_width(300.0)
            .show(ctx, |ui| {
                ui.heading("Glint");
                ui.separator();

                ui.label(format!("FPS: {:.1}", self.fps));
                let (width, height) = self.viewport.target().size();
                ui.label(format!("Preview: {}x{}", width, height));
                ui.label(format!("Triangles: {}", self.viewport.vertex_count() / 3));
                if let glint_viewport::TargetStatus::Incomplete(reason) =
                    self.viewport.target().status()
                {
                    ui.colored_label(egui::Color32::LIGHT_RED, reason);
                }
                ui.separator();

                ui.collapsing("Camera", |ui| {
                    let camera = &mut self.camera;
                    ui.horizontal(|ui| {
                        ui.label("Position");
                        ui.add(egui::DragValue::new(&mut camera.position.x).speed(0.05));
                        ui.add(egui::DragValue::new(&mut camera.position.y).speed(0.05));
                        ui.add(egui::DragValue::new(&mut camera.position.z).speed(0.05));
                    });
                    ui.horizontal(|ui| {
                        ui.label("Target");
                        ui.add(egui::DragValue::new(&mut camera.target.x).speed(0.05));
                        ui.add(egui::DragValue::new(&mut camera.target.y).speed(0.05));
                        ui.add(egui::DragValue::new(&mut camera.target.z).speed(0.05));
                    });
                    let mut fov = camera.fov_y.to_degrees();
                    if ui
                        .add(egui::Slider::new(&mut fov, 10.0..=120.0).text("FOV"))
                        .changed()
                    {
                        camera.fov_y = fov.to_radians();
                    }
                    if ui.button("Frame mesh (F)").clicked() {
                        actions.push(UiAction::FrameMesh);
                    }
                });
                ui.separator();

                ui.collapsing("Textures", |ui| {
                    for (role, path) in &mut self.panel.texture_paths {
                        ui.horizontal(|ui| {
                            ui.label(role.name());
                            if self.viewport.material().is_assigned(*role) {
                                ui.colored_label(egui::Color32::GREEN, "●");
                            } else {
                                ui.colored_label(egui::Color32::GRAY, "○");
                            }
                        });
                        ui.horizontal(|ui| {
                            ui.text_edit_singleline(path);
                            if ui.button("Load").clicked() && !path.is_empty() {
                                actions.push(UiAction::LoadTexture(*role, PathBuf::from(&*path)));
                            }
                        });
                    }
                });
                ui.separator();

                ui.collapsing("Statistics", |ui| {
                    let response = ui.add(
                        egui::DragValue::new(&mut self.panel.sharpness)
                            .range(1.0..=4096.0)
                            .speed(1.0)
                            .prefix("s = "),
                    );
                    if response.drag_stopped() || response.lost_focus() {
                        actions.push(UiAction::SetSharpness(self.panel.sharpness));
                    }
                    ui.label(format!("Levels: {}", self.viewport.statistics_levels()));
                    if self.viewport.statistics_pending() {
                        ui.horizontal(|ui| {
                            ui.spinner();
                            ui.label("Building pyramid");
                        });
                    }
                });
                ui.separator();

                ui.collapsing("Shaders", |ui| {
                    for editor in &mut self.editors {
                        let title = editor.title();
                        ui.checkbox(&mut editor.open, title);
                    }
                });
                ui.separator();

                ui.horizontal(|ui| {
                    ui.text_edit_singleline(&mut self.panel.screenshot_path);
                    if ui.button("Screenshot").clicked() {
                        actions.push(UiAction::Screenshot(PathBuf::from(
                            &self.panel.screenshot_path,
                        )));
                    }
                });

                if !self.panel.message.is_empty() {
                    ui.label(&self.panel.message);
                }

                ui.separator();
                ui.collapsing("Controls", |ui| {
                    ui.label("Left drag: orbit");
                    ui.label("Scroll wheel: dolly");
                    ui.label("F: frame mesh");
                });
            });
    }

    fn apply(&mut self, action: UiAction) {
        let result = match action {
            UiAction::LoadTexture(role, path) => self.viewport.load_texture(role, &path),
            UiAction::SetSharpness(sharpness) => self.viewport.set_sharpness(sharpness),
            UiAction::Compile(stage) => {
                let index = editor_index(stage);
                let outcome = self.viewport.hot_swap(stage, &self.editors[index].text);
                self.editors[index].apply_outcome(&outcome)
            }
            UiAction::Screenshot(path) => self.viewport.save_screenshot(&path).map(|()| {
                self.panel.message = format!("Saved {}", path.display());
            }),
            UiAction::FrameMesh => {
                self.frame_mesh();
                Ok(())
            }
        };

        if let Err(e) = result {
            log::error!("{:#}", e);
            self.panel.message = format!("{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::config::ShaderLanguage;
    use glint_viewport::{DEFAULT_GLSL_FRAGMENT_SHADER, DEFAULT_GLSL_VERTEX_SHADER};

    const GREEN_GLSL: &str = "#version 450
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(0.0, 1.0, 0.0, 1.0);
}
";

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("glint_renderer_{}_{}", std::process::id(), name))
    }

    fn headless() -> Option<GpuContext> {
        match pollster::block_on(GpuContext::headless()) {
            Ok(gpu) => Some(gpu),
            Err(e) => {
                eprintln!("Skipping GPU test: {}", e);
                None
            }
        }
    }

    fn glsl_config(vertex: &str, fragment: &str) -> RendererConfig {
        let vertex_path = temp_path("startup.vert");
        let fragment_path = temp_path("startup.frag");
        std::fs::write(&vertex_path, vertex).unwrap();
        std::fs::write(&fragment_path, fragment).unwrap();
        RendererConfig {
            size: [32, 32],
            vertex_shader_path: vertex_path,
            fragment_shader_path: fragment_path,
            shader_language: Some(ShaderLanguage::Glsl),
            async_pyramid: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_shader_files_use_configured_language() {
        let config = RendererConfig {
            vertex_shader_path: PathBuf::from("/no/such/vertex.glsl"),
            fragment_shader_path: PathBuf::from("/no/such/fragment.glsl"),
            ..Default::default()
        };
        let editors = load_editors(&config);
        assert_eq!(editors[0].text, DEFAULT_GLSL_VERTEX_SHADER);
        assert_eq!(editors[1].text, DEFAULT_GLSL_FRAGMENT_SHADER);
    }

    #[test]
    fn test_broken_glsl_at_startup_can_be_fixed_in_the_editor() {
        let Some(gpu) = headless() else { return };
        let config = glsl_config(DEFAULT_GLSL_VERTEX_SHADER, "#version 450\nvoid main( {\n");

        let mut editors = load_editors(&config);
        let mut viewport = start_viewport(&gpu, &config, &mut editors).unwrap();

        // Only the broken stage fell back, and in the configured language
        assert!(editors[0].markers.is_empty());
        assert!(!editors[1].markers.is_empty());
        assert_eq!(editors[1].text, "#version 450\nvoid main( {\n");
        assert_eq!(
            viewport.shader_source(ShaderStage::Fragment),
            DEFAULT_GLSL_FRAGMENT_SHADER
        );
        assert_eq!(
            viewport.shader_source(ShaderStage::Vertex),
            DEFAULT_GLSL_VERTEX_SHADER
        );

        editors[1].text = GREEN_GLSL.to_string();
        let outcome = viewport.hot_swap(ShaderStage::Fragment, &editors[1].text);
        assert!(outcome.is_swapped(), "{}", outcome.diagnostic());
        editors[1].apply_outcome(&outcome).unwrap();
        assert!(editors[1].markers.is_empty());
        assert_eq!(
            std::fs::read_to_string(&config.fragment_shader_path).unwrap(),
            GREEN_GLSL
        );

        std::fs::remove_file(&config.vertex_shader_path).ok();
        std::fs::remove_file(&config.fragment_shader_path).ok();
    }
}
