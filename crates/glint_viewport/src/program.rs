//! Shader program management with atomic hot-swap.
//!
//! A [`ShaderProgram`] always holds a linked program built from the last
//! vertex/fragment pair that compiled and linked. Swapping a stage either
//! fully succeeds or leaves the program exactly as it was.

use std::borrow::Cow;
use std::sync::Arc;

use thiserror::Error;
use wgpu::Device;

use glint_core::config::ShaderLanguage;
use glint_core::diagnostics::ErrorMarkers;

use crate::gpu::capture_validation;
use crate::mesh::vertex_layout;
use crate::target::{COLOR_FORMAT, DEPTH_FORMAT};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

/// Compiles single stages and links them into a program.
///
/// Errors are the backend's diagnostic text, passed through unmodified.
pub trait ShaderBackend {
    type Module;
    type Program;

    fn compile(&self, stage: ShaderStage, source: &str) -> Result<Self::Module, String>;

    fn link(&self, vertex: &Self::Module, fragment: &Self::Module) -> Result<Self::Program, String>;
}

/// Failure to build the initial program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("Failed to compile {} shader:\n{log}", .stage.name())]
    Compile { stage: ShaderStage, log: String },

    #[error("Failed to link shader program:\n{log}")]
    Link { log: String },
}

impl ProgramError {
    pub fn log(&self) -> &str {
        match self {
            ProgramError::Compile { log, .. } | ProgramError::Link { log } => log,
        }
    }
}

/// Result of a hot-swap. Only `Swapped` changes the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    CompileFailed(String),
    LinkFailed(String),
}

impl SwapOutcome {
    pub fn is_swapped(&self) -> bool {
        matches!(self, SwapOutcome::Swapped)
    }

    /// Compiler or linker output; empty on success.
    pub fn diagnostic(&self) -> &str {
        match self {
            SwapOutcome::Swapped => "",
            SwapOutcome::CompileFailed(log) | SwapOutcome::LinkFailed(log) => log,
        }
    }

    /// Editor markers for the diagnostic.
    pub fn markers(&self) -> ErrorMarkers {
        ErrorMarkers::from_log(self.diagnostic())
    }
}

struct Stage<M> {
    module: M,
    source: String,
}

/// Last-known-good linked vertex/fragment pair.
pub struct ShaderProgram<B: ShaderBackend> {
    backend: B,
    program: B::Program,
    vertex: Stage<B::Module>,
    fragment: Stage<B::Module>,
}

fn non_empty(log: String) -> String {
    if log.trim().is_empty() {
        "unknown error".to_string()
    } else {
        log
    }
}

impl<B: ShaderBackend> ShaderProgram<B> {
    /// Compile and link the initial pair.
    pub fn new(backend: B, vertex_source: &str, fragment_source: &str) -> Result<Self, ProgramError> {
        let compile = |stage: ShaderStage, source: &str| {
            backend
                .compile(stage, source)
                .map_err(|log| ProgramError::Compile {
                    stage,
                    log: non_empty(log),
                })
        };
        let vertex = compile(ShaderStage::Vertex, vertex_source)?;
        let fragment = compile(ShaderStage::Fragment, fragment_source)?;

        let program = backend
            .link(&vertex, &fragment)
            .map_err(|log| ProgramError::Link {
                log: non_empty(log),
            })?;

        Ok(Self {
            backend,
            program,
            vertex: Stage {
                module: vertex,
                source: vertex_source.to_string(),
            },
            fragment: Stage {
                module: fragment,
                source: fragment_source.to_string(),
            },
        })
    }

    pub fn hot_swap_fragment(&mut self, source: &str) -> SwapOutcome {
        self.hot_swap(ShaderStage::Fragment, source)
    }

    pub fn hot_swap_vertex(&mut self, source: &str) -> SwapOutcome {
        self.hot_swap(ShaderStage::Vertex, source)
    }

    /// Replace one stage, keeping the current program on any failure.
    pub fn hot_swap(&mut self, stage: ShaderStage, source: &str) -> SwapOutcome {
        let module = match self.backend.compile(stage, source) {
            Ok(module) => module,
            Err(log) => {
                log::warn!("{} shader failed to compile, keeping previous program", stage.name());
                return SwapOutcome::CompileFailed(non_empty(log));
            }
        };

        let linked = match stage {
            ShaderStage::Vertex => self.backend.link(&module, &self.fragment.module),
            ShaderStage::Fragment => self.backend.link(&self.vertex.module, &module),
        };
        let program = match linked {
            Ok(program) => program,
            Err(log) => {
                log::warn!("Shader program failed to link, keeping previous program");
                return SwapOutcome::LinkFailed(non_empty(log));
            }
        };

        let new_stage = Stage {
            module,
            source: source.to_string(),
        };
        match stage {
            ShaderStage::Vertex => self.vertex = new_stage,
            ShaderStage::Fragment => self.fragment = new_stage,
        }
        self.program = program;
        log::info!("Swapped {} shader", stage.name());
        SwapOutcome::Swapped
    }

    pub fn program(&self) -> &B::Program {
        &self.program
    }

    /// Source of the stage currently linked into the program.
    pub fn source(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex.source,
            ShaderStage::Fragment => &self.fragment.source,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// A compiled wgpu shader module and the entry point to use from it.
pub struct WgpuModule {
    pub module: wgpu::ShaderModule,
    pub entry_point: &'static str,
}

/// wgpu backend: compile = `create_shader_module`, link =
/// `create_render_pipeline`, both inside a validation error scope.
pub struct WgpuShaderBackend {
    device: Arc<Device>,
    layout: wgpu::PipelineLayout,
    language: ShaderLanguage,
}

impl WgpuShaderBackend {
    pub fn new(
        device: Arc<Device>,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
        language: ShaderLanguage,
    ) -> Self {
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Preview Pipeline Layout"),
            bind_group_layouts,
            push_constant_ranges: &[],
        });

        Self {
            device,
            layout,
            language,
        }
    }

    pub fn language(&self) -> ShaderLanguage {
        self.language
    }

    fn entry_point(&self, stage: ShaderStage) -> &'static str {
        match (self.language, stage) {
            (ShaderLanguage::Glsl, _) => "main",
            (ShaderLanguage::Wgsl, ShaderStage::Vertex) => "vs_main",
            (ShaderLanguage::Wgsl, ShaderStage::Fragment) => "fs_main",
        }
    }
}

impl ShaderBackend for WgpuShaderBackend {
    type Module = WgpuModule;
    type Program = wgpu::RenderPipeline;

    fn compile(&self, stage: ShaderStage, source: &str) -> Result<WgpuModule, String> {
        let source = match self.language {
            ShaderLanguage::Wgsl => wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
            ShaderLanguage::Glsl => wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(source.to_string()),
                stage: match stage {
                    ShaderStage::Vertex => wgpu::naga::ShaderStage::Vertex,
                    ShaderStage::Fragment => wgpu::naga::ShaderStage::Fragment,
                },
                defines: Default::default(),
            },
        };

        let (module, error) = capture_validation(&self.device, || {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(stage.name()),
                source,
            })
        });

        match error {
            Some(log) => Err(log),
            None => Ok(WgpuModule {
                module,
                entry_point: self.entry_point(stage),
            }),
        }
    }

    fn link(&self, vertex: &WgpuModule, fragment: &WgpuModule) -> Result<wgpu::RenderPipeline, String> {
        let (pipeline, error) = capture_validation(&self.device, || {
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("Preview Pipeline"),
                    layout: Some(&self.layout),
                    vertex: wgpu::VertexState {
                        module: &vertex.module,
                        entry_point: vertex.entry_point,
                        buffers: &[vertex_layout()],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment.module,
                        entry_point: fragment.entry_point,
                        targets: &[Some(wgpu::ColorTargetState {
                            format: COLOR_FORMAT,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: Some(wgpu::Face::Back),
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: true,
                        depth_compare: wgpu::CompareFunction::Less,
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState {
                        count: 1,
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                    multiview: None,
                    cache: None,
                })
        });

        match error {
            Some(log) => Err(log),
            None => Ok(pipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Backend that "fails to compile" sources containing `syntax error` and
    /// "fails to link" fragments containing `mismatch`.
    #[derive(Default)]
    struct MockBackend {
        links: Cell<u32>,
    }

    impl ShaderBackend for MockBackend {
        type Module = String;
        type Program = (String, String);

        fn compile(&self, _stage: ShaderStage, source: &str) -> Result<String, String> {
            match source.lines().position(|l| l.contains("syntax error")) {
                Some(line) => Err(format!("0:{}(1): error: syntax error", line + 1)),
                None => Ok(source.to_string()),
            }
        }

        fn link(&self, vertex: &String, fragment: &String) -> Result<(String, String), String> {
            self.links.set(self.links.get() + 1);
            if fragment.contains("mismatch") {
                Err("error: fragment input not provided by vertex stage".into())
            } else {
                Ok((vertex.clone(), fragment.clone()))
            }
        }
    }

    fn program() -> ShaderProgram<MockBackend> {
        ShaderProgram::new(MockBackend::default(), "vs v1", "fs v1").unwrap()
    }

    #[test]
    fn test_new_links_initial_pair() {
        let program = program();
        assert_eq!(program.program(), &("vs v1".to_string(), "fs v1".to_string()));
        assert_eq!(program.source(ShaderStage::Fragment), "fs v1");
    }

    #[test]
    fn test_new_reports_compile_failure() {
        let err = ShaderProgram::new(MockBackend::default(), "vs", "ok\nsyntax error").err().unwrap();
        assert!(matches!(
            err,
            ProgramError::Compile {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
        assert!(err.log().contains("0:2(1)"));
    }

    #[test]
    fn test_new_reports_link_failure() {
        let err = ShaderProgram::new(MockBackend::default(), "vs", "mismatch").err().unwrap();
        assert!(matches!(err, ProgramError::Link { .. }));
    }

    #[test]
    fn test_invalid_fragment_leaves_program_untouched() {
        let mut program = program();
        let outcome = program.hot_swap_fragment("fn main() {\n syntax error\n}");

        assert!(matches!(outcome, SwapOutcome::CompileFailed(_)));
        assert!(!outcome.diagnostic().is_empty());
        assert_eq!(outcome.markers().get(2), Some("syntax error"));
        assert_eq!(program.program().1, "fs v1");
        assert_eq!(program.source(ShaderStage::Fragment), "fs v1");
        // Compile failure never reaches the linker
        assert_eq!(program.backend().links.get(), 1);
    }

    #[test]
    fn test_link_failure_rolls_back() {
        let mut program = program();
        let outcome = program.hot_swap_fragment("fs mismatch");

        assert!(matches!(outcome, SwapOutcome::LinkFailed(_)));
        assert!(!outcome.diagnostic().is_empty());
        assert_eq!(program.program(), &("vs v1".to_string(), "fs v1".to_string()));
        assert_eq!(program.source(ShaderStage::Fragment), "fs v1");

        // The old pair still swaps cleanly afterwards
        assert!(program.hot_swap_fragment("fs v2").is_swapped());
    }

    #[test]
    fn test_successful_swaps() {
        let mut program = program();

        let outcome = program.hot_swap_fragment("fs v2");
        assert_eq!(outcome, SwapOutcome::Swapped);
        assert_eq!(outcome.diagnostic(), "");
        assert_eq!(program.program().1, "fs v2");

        assert!(program.hot_swap_vertex("vs v2").is_swapped());
        assert_eq!(program.program(), &("vs v2".to_string(), "fs v2".to_string()));
        assert_eq!(program.source(ShaderStage::Vertex), "vs v2");
    }

    #[test]
    fn test_invalid_vertex_leaves_program_untouched() {
        let mut program = program();
        assert!(!program.hot_swap_vertex("syntax error").is_swapped());
        assert_eq!(program.program().0, "vs v1");
    }

    // GPU-backed checks

    const VS: &str = "
struct Out {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};
@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> Out {
    var out: Out;
    out.pos = vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}
";

    const FS: &str = "
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(uv, 0.0, 1.0);
}
";

    fn wgpu_program() -> Option<ShaderProgram<WgpuShaderBackend>> {
        let gpu = crate::gpu::test_gpu()?;
        let backend = WgpuShaderBackend::new(gpu.device.clone(), &[], ShaderLanguage::Wgsl);
        Some(ShaderProgram::new(backend, VS, FS).unwrap())
    }

    #[test]
    fn test_wgpu_compile_error_keeps_pipeline() {
        let Some(mut program) = wgpu_program() else { return };

        let outcome = program.hot_swap_fragment("@fragment fn fs_main( -> {");
        assert!(matches!(outcome, SwapOutcome::CompileFailed(_)));
        assert!(!outcome.diagnostic().is_empty());
        assert_eq!(program.source(ShaderStage::Fragment), FS);
    }

    #[test]
    fn test_wgpu_diagnostic_lands_on_source_line() {
        let Some(mut program) = wgpu_program() else { return };

        let unknown_name = "@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return undefined_color;
}
";
        let outcome = program.hot_swap_fragment(unknown_name);
        assert!(matches!(outcome, SwapOutcome::CompileFailed(_)));

        let markers = outcome.markers();
        let message = markers.get(3).unwrap_or_default();
        assert!(message.contains("undefined_color"), "markers: {:?}", markers);
        assert_eq!(markers.iter().count(), 1);
    }

    #[test]
    fn test_wgpu_link_error_keeps_pipeline() {
        let Some(mut program) = wgpu_program() else { return };

        // Compiles on its own, but reads a location the vertex stage never writes
        let unlinkable = "
@fragment
fn fs_main(@location(5) tint: vec4<f32>) -> @location(0) vec4<f32> {
    return tint;
}
";
        let outcome = program.hot_swap_fragment(unlinkable);
        assert!(matches!(outcome, SwapOutcome::LinkFailed(_)));
        assert_eq!(program.source(ShaderStage::Fragment), FS);

        let recolored = FS.replace("0.0, 1.0", "1.0, 1.0");
        assert!(program.hot_swap_fragment(&recolored).is_swapped());
    }
}
