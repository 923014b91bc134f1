// Re-export glam for convenience
pub use glam::*;

// Glint math types
mod camera;
pub use camera::{Camera, CameraState};
