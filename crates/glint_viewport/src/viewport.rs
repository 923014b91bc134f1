//! Per-frame orchestration of the offscreen preview.
//!
//! A frame walks `Idle -> Bound -> Drawn -> Presented`:
//!
//! - [`Viewport::begin_frame`] sizes the render target, picks up any finished
//!   statistics pyramid and opens a command encoder;
//! - [`Viewport::draw`] writes the frame uniforms and issues one non-indexed
//!   draw over the whole vertex buffer;
//! - [`Viewport::present`] submits the work and hands back the color view for
//!   the UI to display.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use bytemuck::Zeroable;
use wgpu::util::DeviceExt;
use wgpu::{Device, Queue};

use glint_core::config::{RendererConfig, ShaderLanguage};
use glint_core::mesh::{load_mesh, Mesh, MeshStats, TangentFallback};
use glint_core::mip_chart::mip_chart;
use glint_core::pyramid::StatisticsPyramid;
use glint_core::texture::{load_image, ImageData, TextureRole, TextureSettings};
use glint_core::worker::PyramidWorker;
use glint_math::{Camera, Mat4, Vec3};

use crate::gpu::GpuContext;
use crate::material::Material;
use crate::mesh::GpuMesh;
use crate::program::{ShaderProgram, ShaderStage, SwapOutcome, WgpuShaderBackend};
use crate::readback::read_rgba8;
use crate::target::{RenderTarget, TargetStatus};
use crate::texture::GpuTexture;

pub const DEFAULT_VERTEX_SHADER: &str = include_str!("shaders/vertex.wgsl");
pub const DEFAULT_FRAGMENT_SHADER: &str = include_str!("shaders/fragment.wgsl");
pub const DEFAULT_GLSL_VERTEX_SHADER: &str = include_str!("shaders/vertex.glsl");
pub const DEFAULT_GLSL_FRAGMENT_SHADER: &str = include_str!("shaders/fragment.glsl");

/// Built-in source for `stage` in `language`.
pub fn default_shader(language: ShaderLanguage, stage: ShaderStage) -> &'static str {
    match (language, stage) {
        (ShaderLanguage::Wgsl, ShaderStage::Vertex) => DEFAULT_VERTEX_SHADER,
        (ShaderLanguage::Wgsl, ShaderStage::Fragment) => DEFAULT_FRAGMENT_SHADER,
        (ShaderLanguage::Glsl, ShaderStage::Vertex) => DEFAULT_GLSL_VERTEX_SHADER,
        (ShaderLanguage::Glsl, ShaderStage::Fragment) => DEFAULT_GLSL_FRAGMENT_SHADER,
    }
}

const MIP_CHART_SIZE: u32 = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Bound,
    Drawn,
    Presented,
}

/// Frame uniform data for GPU (group 0, binding 0)
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniforms {
    model: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
    camera_position: [f32; 4],
    // x: elapsed seconds, y: frame delta, z: 1/sharpness, w: statistics levels
    params: [f32; 4],
}

pub struct Viewport {
    device: Arc<Device>,
    queue: Arc<Queue>,
    target: RenderTarget,
    program: ShaderProgram<WgpuShaderBackend>,
    material: Material,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    mesh: Option<GpuMesh>,
    pub model: Mat4,
    clear_color: wgpu::Color,

    // Statistics pyramid state
    sharpness: f32,
    statistics_levels: u32,
    normal_image: Option<ImageData>,
    // Uploaded normal map waiting for its statistics
    pending_normal: Option<(ImageData, GpuTexture)>,
    worker: Option<PyramidWorker>,

    // Frame state
    state: FrameState,
    encoder: Option<wgpu::CommandEncoder>,
    started: Instant,
    last_frame: Instant,
    frame_delta: f32,
}

impl Viewport {
    /// Create the GPU state. Fails when the shader pair does not compile and
    /// link (the error downcasts to [`crate::ProgramError`]).
    pub fn new(
        gpu: &GpuContext,
        config: &RendererConfig,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self> {
        let device = gpu.device.clone();
        let queue = gpu.queue.clone();

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Buffer"),
            contents: bytemuck::cast_slice(&[FrameUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let mut material = Material::new(&device, &queue, gpu.float_filterable)?;
        let chart = GpuTexture::from_levels(
            &device,
            &queue,
            &mip_chart(MIP_CHART_SIZE, MIP_CHART_SIZE),
            TextureSettings::for_role(TextureRole::MipChart),
            TextureRole::MipChart.name(),
        )?;
        material.set(TextureRole::MipChart, chart)?;

        let backend = WgpuShaderBackend::new(
            device.clone(),
            &[&frame_layout, material.layout()],
            config.language(),
        );
        let program = ShaderProgram::new(backend, vertex_source, fragment_source)?;

        let target = RenderTarget::new(device.clone(), config.size[0], config.size[1]);
        let [r, g, b, a] = config.clear_color;

        log::info!(
            "Viewport initialized at {}x{} ({:?} shaders)",
            config.size[0],
            config.size[1],
            config.language()
        );

        let now = Instant::now();
        Ok(Self {
            device,
            queue,
            target,
            program,
            material,
            frame_buffer,
            frame_bind_group,
            mesh: None,
            model: Mat4::IDENTITY,
            clear_color: wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            },
            sharpness: config.sharpness,
            statistics_levels: 0,
            normal_image: None,
            pending_normal: None,
            worker: config.async_pyramid.then(PyramidWorker::new),
            state: FrameState::Idle,
            encoder: None,
            started: now,
            last_frame: now,
            frame_delta: 0.0,
        })
    }

    /// Create the viewport and load every asset the config names.
    pub fn from_config(
        gpu: &GpuContext,
        config: &RendererConfig,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self> {
        let mut viewport = Self::new(gpu, config, vertex_source, fragment_source)?;
        viewport.load_assets(config)?;
        Ok(viewport)
    }

    /// Load the mesh and textures named by `config`.
    ///
    /// A missing mesh is an error; missing optional textures are logged and
    /// leave their slot on the fallback.
    pub fn load_assets(&mut self, config: &RendererConfig) -> Result<()> {
        self.load_mesh(&config.model_path, TangentFallback::default())?;

        let textures = [
            (TextureRole::Albedo, &config.albedo_path),
            (TextureRole::Normal, &config.normal_path),
            (TextureRole::Roughness, &config.roughness_path),
            (TextureRole::Environment, &config.environment_path),
        ];
        for (role, path) in textures {
            if let Some(path) = path {
                if let Err(e) = self.load_texture(role, path) {
                    log::warn!("{:#}", e);
                }
            }
        }
        Ok(())
    }

    // ---- Assets ----

    pub fn load_mesh(&mut self, path: &Path, fallback: TangentFallback) -> Result<MeshStats> {
        let mesh = load_mesh(path, fallback)?;
        self.set_mesh(&mesh);
        Ok(mesh.stats)
    }

    pub fn set_mesh(&mut self, mesh: &Mesh) {
        self.mesh = Some(GpuMesh::new(&self.device, mesh));
    }

    pub fn mesh_bounds(&self) -> Option<(Vec3, Vec3)> {
        self.mesh.as_ref().map(|m| (m.bounds_min, m.bounds_max))
    }

    pub fn vertex_count(&self) -> u32 {
        self.mesh.as_ref().map_or(0, |m| m.vertex_count)
    }

    /// Load an image into a material slot. A normal map also (re)builds the
    /// statistics pyramid. On failure nothing is replaced.
    pub fn load_texture(&mut self, role: TextureRole, path: &Path) -> Result<()> {
        anyhow::ensure!(
            !role.is_statistic(),
            "{} textures are derived from the normal map",
            role.name()
        );
        let image = load_image(path)
            .with_context(|| format!("Loading {} texture {}", role.name(), path.display()))?;

        if role == TextureRole::Normal {
            self.set_normal_image(image)
        } else {
            self.material.set_image(&self.device, &self.queue, role, &image)
        }
    }

    /// Upload a new normal map and rebuild its statistics.
    ///
    /// The texture is only bound once its pyramid is ready, so the material
    /// never pairs a normal map with another map's statistics. With a
    /// background worker that happens in a later [`Viewport::begin_frame`].
    pub fn set_normal_image(&mut self, image: ImageData) -> Result<()> {
        // Validate before anything is replaced
        anyhow::ensure!(
            image.channels >= 3,
            "Normal map {} has {} channel(s), at least 3 are required",
            image.path,
            image.channels
        );
        let texture = GpuTexture::from_image(
            &self.device,
            &self.queue,
            &image,
            TextureSettings::for_role(TextureRole::Normal),
            TextureRole::Normal.name(),
        )?;
        self.pending_normal = Some((image, texture));
        self.rebuild_statistics()
    }

    pub fn sharpness(&self) -> f32 {
        self.sharpness
    }

    pub fn set_sharpness(&mut self, sharpness: f32) -> Result<()> {
        anyhow::ensure!(
            sharpness.is_finite() && sharpness > 0.0,
            "Sharpness must be positive, got {}",
            sharpness
        );
        if sharpness == self.sharpness {
            return Ok(());
        }
        self.sharpness = sharpness;
        self.rebuild_statistics()
    }

    fn rebuild_statistics(&mut self) -> Result<()> {
        let image = match &self.pending_normal {
            Some((image, _)) => image,
            None => match &self.normal_image {
                Some(image) => image,
                None => return Ok(()),
            },
        };

        match &mut self.worker {
            Some(worker) => {
                worker.request_image(image.clone(), self.sharpness);
                Ok(())
            }
            None => match StatisticsPyramid::from_image(image, self.sharpness) {
                Ok(pyramid) => self.apply_statistics(&pyramid),
                Err(e) => {
                    self.pending_normal = None;
                    Err(e.into())
                }
            },
        }
    }

    /// Bind the statistics textures, and the normal map they were built
    /// from if it is still waiting.
    fn apply_statistics(&mut self, pyramid: &StatisticsPyramid) -> Result<()> {
        let pending = self.pending_normal.take();
        self.material
            .set_statistics(&self.device, &self.queue, pyramid)?;
        if let Some((image, texture)) = pending {
            self.material.set(TextureRole::Normal, texture)?;
            self.normal_image = Some(image);
        }
        self.statistics_levels = pyramid.level_count() as u32;
        log::info!(
            "Statistics pyramid ready: {} levels, s = {}",
            pyramid.level_count(),
            pyramid.sharpness
        );
        Ok(())
    }

    /// Take a finished background pyramid, if there is one.
    pub fn poll_statistics(&mut self) {
        let Some(result) = self.worker.as_mut().and_then(PyramidWorker::poll) else {
            return;
        };
        self.finish_statistics(result);
    }

    /// Block until the pending pyramid (if any) is uploaded.
    pub fn wait_for_statistics(&mut self) {
        let Some(result) = self.worker.as_mut().and_then(PyramidWorker::wait) else {
            return;
        };
        self.finish_statistics(result);
    }

    fn finish_statistics(&mut self, result: glint_core::pyramid::PyramidResult<StatisticsPyramid>) {
        let applied = result
            .map_err(anyhow::Error::from)
            .and_then(|pyramid| self.apply_statistics(&pyramid));
        if let Err(e) = applied {
            self.pending_normal = None;
            log::error!("Statistics pyramid failed: {:#}", e);
        }
    }

    pub fn statistics_pending(&self) -> bool {
        self.worker.as_ref().is_some_and(PyramidWorker::is_busy)
    }

    pub fn statistics_levels(&self) -> u32 {
        self.statistics_levels
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    // ---- Shaders ----

    pub fn hot_swap_fragment(&mut self, source: &str) -> SwapOutcome {
        self.program.hot_swap_fragment(source)
    }

    pub fn hot_swap_vertex(&mut self, source: &str) -> SwapOutcome {
        self.program.hot_swap_vertex(source)
    }

    pub fn hot_swap(&mut self, stage: ShaderStage, source: &str) -> SwapOutcome {
        self.program.hot_swap(stage, source)
    }

    pub fn shader_source(&self, stage: ShaderStage) -> &str {
        self.program.source(stage)
    }

    // ---- Frame ----

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Idle -> Bound.
    pub fn begin_frame(&mut self, width: u32, height: u32) -> Result<TargetStatus> {
        if !matches!(self.state, FrameState::Idle | FrameState::Presented) {
            bail!("begin_frame called while {:?}", self.state);
        }

        if self.target.ensure_size(width, height) {
            log::debug!("Projection aspect now {:.3}", self.target.aspect());
        }
        self.poll_statistics();

        let now = Instant::now();
        self.frame_delta = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Preview Encoder"),
                }),
        );
        self.state = FrameState::Bound;
        Ok(self.target.status().clone())
    }

    /// Bound -> Drawn.
    pub fn draw(&mut self, camera: &Camera) -> Result<()> {
        if self.state != FrameState::Bound {
            bail!("draw called while {:?}", self.state);
        }

        let camera_state = camera.state(self.target.aspect());
        let uniforms = FrameUniforms {
            model: self.model.to_cols_array_2d(),
            view: camera_state.view.to_cols_array_2d(),
            projection: camera_state.projection.to_cols_array_2d(),
            camera_position: camera_state.position.extend(1.0).to_array(),
            params: [
                self.started.elapsed().as_secs_f32(),
                self.frame_delta,
                1.0 / self.sharpness,
                self.statistics_levels as f32,
            ],
        };
        self.queue
            .write_buffer(&self.frame_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let material_bind_group = self.material.bind_group(&self.device);
        let Some(encoder) = self.encoder.as_mut() else {
            bail!("frame encoder missing");
        };
        {
            let mut pass = self.target.bind_for_draw(encoder, self.clear_color);
            if let Some(mesh) = &self.mesh {
                pass.set_pipeline(self.program.program());
                pass.set_bind_group(0, &self.frame_bind_group, &[]);
                pass.set_bind_group(1, material_bind_group, &[]);
                pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                pass.draw(0..mesh.vertex_count, 0..1);
            }
        }

        self.state = FrameState::Drawn;
        Ok(())
    }

    /// Drawn -> Presented. Returns the view to hand to the UI.
    pub fn present(&mut self) -> Result<&wgpu::TextureView> {
        if self.state != FrameState::Drawn {
            bail!("present called while {:?}", self.state);
        }
        let Some(encoder) = self.encoder.take() else {
            bail!("frame encoder missing");
        };
        self.queue.submit(std::iter::once(encoder.finish()));
        self.state = FrameState::Presented;
        Ok(self.target.color_view())
    }

    /// Run a whole frame.
    pub fn render(&mut self, camera: &Camera, width: u32, height: u32) -> Result<&wgpu::TextureView> {
        self.begin_frame(width, height)?;
        self.draw(camera)?;
        self.present()
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        self.target.color_view()
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
    }

    // ---- Readback ----

    /// Tightly packed RGBA8 pixels of the last frame, top row first.
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        read_rgba8(&self.device, &self.queue, self.target.color_texture())
    }

    /// Write the last frame as RGB; the format follows the file extension.
    pub fn save_screenshot(&self, path: &Path) -> Result<()> {
        let (width, height) = self.target.size();
        let pixels = self.read_pixels()?;
        let rgba = image::RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow::anyhow!("Readback size mismatch"))?;
        image::DynamicImage::ImageRgba8(rgba)
            .to_rgb8()
            .save(path)
            .with_context(|| format!("Saving screenshot {}", path.display()))?;
        log::info!("Saved {}x{} screenshot to {}", width, height, path.display());
        Ok(())
    }
}
