use wgpu::util::DeviceExt;

use glint_core::mesh::{Mesh, Vertex};
use glint_math::Vec3;

const ATTRIBS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x3, // position
    1 => Float32x2, // uv
    2 => Float32x3, // normal
    3 => Float32x3, // tangent
    4 => Float32x3, // bitangent
];

/// Buffer layout matching [`glint_core::Vertex`].
pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBS,
    }
}

/// A triangle-expanded mesh resident on the GPU (no index buffer).
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub vertex_count: u32,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
}

impl GpuMesh {
    pub fn new(device: &wgpu::Device, mesh: &Mesh) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            vertex_buffer,
            vertex_count: mesh.vertices.len() as u32,
            bounds_min: mesh.bounds_min,
            bounds_max: mesh.bounds_max,
        }
    }
}
