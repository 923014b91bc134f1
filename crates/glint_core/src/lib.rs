//! Glint Core - GPU-agnostic data pipeline for the material preview tool.
//!
//! This crate provides:
//!
//! - **Mesh loading**: OBJ-style triangle meshes expanded to a flat vertex
//!   list with per-triangle tangent frames
//! - **Images**: 8-bit raster loading with the source channel count preserved
//! - **Statistics pyramid**: per-mip slope mean, second moment, covariance and
//!   footprint variance of a normal map, plus a background worker to build it
//! - **Shader diagnostics**: best-effort line/column extraction from compiler logs
//! - **Configuration**: JSON renderer configuration
//!
//! # Example
//!
//! ```ignore
//! use glint_core::pyramid::build_pyramid;
//!
//! let pyramid = build_pyramid("textures/normal.png", 128.0)?;
//! println!("{} levels", pyramid.level_count());
//! ```

pub mod colormap;
pub mod config;
pub mod diagnostics;
pub mod mesh;
pub mod mip_chart;
pub mod pyramid;
pub mod texture;
pub mod worker;

// Re-export commonly used types
pub use colormap::{filter_colormap, gaussian_kernel};
pub use config::{ConfigError, RendererConfig, ShaderLanguage};
pub use diagnostics::{parse_diagnostics, Diagnostic, ErrorMarkers, Severity};
pub use mesh::{load_mesh, Mesh, MeshError, TangentFallback, Vertex};
pub use mip_chart::mip_chart;
pub use pyramid::{
    build_pyramid, Pyramid, PyramidError, StatLevel, Statistic, StatisticsPyramid,
    DEFAULT_SHARPNESS,
};
pub use texture::{
    load_image, save_image, FilterMode, ImageData, TextureError, TextureRole, TextureSettings, WrapMode,
};
pub use worker::PyramidWorker;
