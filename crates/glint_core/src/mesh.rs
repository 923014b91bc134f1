//! Triangle mesh loading for the preview viewport.
//!
//! Meshes are read from OBJ-style text (`v`, `vt`, `vn`, `f a/b/c ...`) and
//! expanded into a flat, non-indexed vertex list: every face contributes
//! exactly three vertices, each carrying the tangent frame of its triangle.

use std::io::BufRead;
use std::path::Path;

use glint_math::{Vec2, Vec3};
use thiserror::Error;

/// Errors that can occur while loading a mesh.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Failed to load mesh {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: tobj::LoadError,
    },

    #[error("Mesh {0} contains no triangles")]
    Empty(String),

    #[error("Face {face} of '{model}' has {arity} vertices, only triangles are supported")]
    NotTriangle { model: String, face: usize, arity: u32 },

    #[error("Faces of '{model}' are missing {attribute} indices")]
    MissingAttribute {
        model: String,
        attribute: &'static str,
    },

    #[error("{attribute} index {index} out of range ({len} available) in '{model}'")]
    IndexOutOfRange {
        model: String,
        attribute: &'static str,
        index: u32,
        len: usize,
    },
}

pub type MeshResult<T> = Result<T, MeshError>;

/// GPU vertex layout: position, uv, normal, tangent, bitangent.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
}

/// What to emit for triangles whose UV parameterisation is degenerate
/// (zero-area in UV space, so the tangent solve divides by zero).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TangentFallback {
    /// Build an arbitrary orthonormal frame around the face normal.
    #[default]
    Orthonormal,
    /// Emit zero tangent and bitangent.
    Zero,
}

/// Counters gathered while expanding the mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub triangles: usize,
    pub degenerate_uv_triangles: usize,
}

/// A flat, triangle-expanded mesh ready for upload.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
    pub stats: MeshStats,
}

impl Mesh {
    /// Get mesh center
    pub fn center(&self) -> Vec3 {
        (self.bounds_min + self.bounds_max) * 0.5
    }

    /// Get mesh size (diagonal of bounding box)
    pub fn size(&self) -> f32 {
        (self.bounds_max - self.bounds_min).length()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: false,
        triangulate: false,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

/// Load a mesh from an OBJ file.
pub fn load_mesh<P: AsRef<Path>>(path: P, fallback: TangentFallback) -> MeshResult<Mesh> {
    let path = path.as_ref();
    let name = path.display().to_string();

    let (models, _materials) =
        tobj::load_obj(path, &load_options()).map_err(|source| MeshError::Load {
            path: name.clone(),
            source,
        })?;

    let mesh = from_models(&models, &name, fallback)?;
    log::info!(
        "Loaded mesh {}: {} triangles, {} vertices",
        name,
        mesh.stats.triangles,
        mesh.vertices.len()
    );
    Ok(mesh)
}

/// Load a mesh from any buffered reader. Material libraries are ignored.
pub fn load_mesh_from_reader<R: BufRead>(
    reader: &mut R,
    name: &str,
    fallback: TangentFallback,
) -> MeshResult<Mesh> {
    let (models, _materials) =
        tobj::load_obj_buf(reader, &load_options(), |_| Err(tobj::LoadError::OpenFileFailed))
            .map_err(|source| MeshError::Load {
                path: name.to_string(),
                source,
            })?;

    from_models(&models, name, fallback)
}

fn fetch<const N: usize>(
    data: &[f32],
    index: u32,
    model: &str,
    attribute: &'static str,
) -> MeshResult<[f32; N]> {
    let start = index as usize * N;
    data.get(start..start + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| MeshError::IndexOutOfRange {
            model: model.to_string(),
            attribute,
            index,
            len: data.len() / N,
        })
}

fn from_models(models: &[tobj::Model], name: &str, fallback: TangentFallback) -> MeshResult<Mesh> {
    let mut vertices = Vec::new();
    let mut stats = MeshStats::default();

    for model in models {
        let mesh = &model.mesh;
        if mesh.indices.is_empty() {
            continue;
        }

        if let Some(face) = mesh.face_arities.iter().position(|&arity| arity != 3) {
            return Err(MeshError::NotTriangle {
                model: model.name.clone(),
                face,
                arity: mesh.face_arities[face],
            });
        }
        if mesh.indices.len() % 3 != 0 {
            return Err(MeshError::NotTriangle {
                model: model.name.clone(),
                face: mesh.indices.len() / 3,
                arity: (mesh.indices.len() % 3) as u32,
            });
        }
        if mesh.texcoord_indices.len() != mesh.indices.len() {
            return Err(MeshError::MissingAttribute {
                model: model.name.clone(),
                attribute: "uv",
            });
        }
        if mesh.normal_indices.len() != mesh.indices.len() {
            return Err(MeshError::MissingAttribute {
                model: model.name.clone(),
                attribute: "normal",
            });
        }

        vertices.reserve(mesh.indices.len());

        for face in 0..mesh.indices.len() / 3 {
            let mut positions = [Vec3::ZERO; 3];
            let mut uvs = [Vec2::ZERO; 3];
            let mut normals = [Vec3::ZERO; 3];

            for k in 0..3 {
                let i = face * 3 + k;
                positions[k] =
                    Vec3::from(fetch::<3>(&mesh.positions, mesh.indices[i], &model.name, "position")?);
                uvs[k] = Vec2::from(fetch::<2>(
                    &mesh.texcoords,
                    mesh.texcoord_indices[i],
                    &model.name,
                    "uv",
                )?);
                normals[k] = Vec3::from(fetch::<3>(
                    &mesh.normals,
                    mesh.normal_indices[i],
                    &model.name,
                    "normal",
                )?);
            }

            let frame = tangent_frame(positions, uvs, normals, fallback);
            if frame.degenerate {
                stats.degenerate_uv_triangles += 1;
            }
            stats.triangles += 1;

            for k in 0..3 {
                vertices.push(Vertex {
                    position: positions[k].to_array(),
                    uv: uvs[k].to_array(),
                    normal: normals[k].to_array(),
                    tangent: frame.tangent.to_array(),
                    bitangent: frame.bitangent.to_array(),
                });
            }
        }
    }

    if vertices.is_empty() {
        return Err(MeshError::Empty(name.to_string()));
    }

    if stats.degenerate_uv_triangles > 0 {
        log::warn!(
            "{}: {} of {} triangles have degenerate UVs, tangents use {:?} fallback",
            name,
            stats.degenerate_uv_triangles,
            stats.triangles,
            fallback
        );
    }

    // Calculate bounding box
    let mut bounds_min = Vec3::splat(f32::INFINITY);
    let mut bounds_max = Vec3::splat(f32::NEG_INFINITY);
    for vertex in &vertices {
        let pos = Vec3::from_array(vertex.position);
        bounds_min = bounds_min.min(pos);
        bounds_max = bounds_max.max(pos);
    }

    Ok(Mesh {
        vertices,
        bounds_min,
        bounds_max,
        stats,
    })
}

/// Tangent and bitangent shared by the three vertices of a triangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TangentFrame {
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub degenerate: bool,
}

/// Solve for the tangent frame of one triangle from its UV gradients.
///
/// The result is not normalised; shaders are expected to orthonormalise.
/// Degenerate UV triangles are resolved with `fallback` and never yield
/// NaN or infinite components.
pub fn tangent_frame(
    positions: [Vec3; 3],
    uvs: [Vec2; 3],
    normals: [Vec3; 3],
    fallback: TangentFallback,
) -> TangentFrame {
    let edge1 = positions[1] - positions[0];
    let edge2 = positions[2] - positions[0];
    let duv1 = uvs[1] - uvs[0];
    let duv2 = uvs[2] - uvs[0];

    let det = duv1.x * duv2.y - duv2.x * duv1.y;
    if det != 0.0 {
        let r = 1.0 / det;
        let tangent = (edge1 * duv2.y - edge2 * duv1.y) * r;
        let bitangent = (edge2 * duv1.x - edge1 * duv2.x) * r;
        if r.is_finite() && tangent.is_finite() && bitangent.is_finite() {
            return TangentFrame {
                tangent,
                bitangent,
                degenerate: false,
            };
        }
    }

    let (tangent, bitangent) = match fallback {
        TangentFallback::Zero => (Vec3::ZERO, Vec3::ZERO),
        TangentFallback::Orthonormal => {
            let normal = edge1
                .cross(edge2)
                .try_normalize()
                .or_else(|| (normals[0] + normals[1] + normals[2]).try_normalize())
                .unwrap_or(Vec3::Z);
            let tangent = normal.any_orthonormal_vector();
            (tangent, normal.cross(tangent))
        }
    };

    TangentFrame {
        tangent,
        bitangent,
        degenerate: true,
    }
}
