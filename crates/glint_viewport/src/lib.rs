//! wgpu side of the material preview: device setup, the offscreen render
//! target, hot-swappable shader programs and the per-frame orchestrator.

pub mod gpu;
pub mod material;
pub mod mesh;
pub mod program;
pub mod readback;
pub mod target;
pub mod texture;
pub mod viewport;

pub use gpu::{capture_validation, GpuContext};
pub use material::Material;
pub use mesh::{vertex_layout, GpuMesh};
pub use program::{
    ProgramError, ShaderBackend, ShaderProgram, ShaderStage, SwapOutcome, WgpuShaderBackend,
};
pub use readback::read_rgba8;
pub use target::{RenderTarget, TargetStatus};
pub use texture::GpuTexture;
pub use viewport::{
    default_shader, FrameState, Viewport, DEFAULT_FRAGMENT_SHADER, DEFAULT_GLSL_FRAGMENT_SHADER,
    DEFAULT_GLSL_VERTEX_SHADER, DEFAULT_VERTEX_SHADER,
};
