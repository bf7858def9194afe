//! The imported scene: what a model file contains once parsed, before any of
//! it is normalized or uploaded.

use std::io;
use std::path::{Path, PathBuf};

use glam::{Vec2, Vec3};
use thiserror::Error;

mod gltf;
mod obj;
pub mod postprocess;

pub use gltf::GltfImporter;
pub use obj::ObjImporter;

/// Diffuse color of materials that do not specify one.
pub const DEFAULT_DIFFUSE_COLOR: Vec3 = Vec3::splat(0.5);

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not load OBJ file: {0}")]
    Obj(#[from] tobj::LoadError),
    #[error("invalid glTF: {0}")]
    Gltf(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("no importer for file extension \"{0}\"")]
    UnsupportedFormat(String),
    #[error("scene is incomplete: {0}")]
    Incomplete(&'static str),
}

/// A parsed model file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportedScene {
    pub meshes: Vec<RawMesh>,
    pub materials: Vec<RawMaterial>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// One per position, if present.
    pub normals: Option<Vec<Vec3>>,
    /// One per position, if present.
    pub uvs: Option<Vec<Vec2>>,
    pub faces: Vec<Face>,
    pub material_index: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Face {
    pub indices: Vec<u32>,
}

impl Face {
    pub fn new(indices: impl Into<Vec<u32>>) -> Face {
        Face {
            indices: indices.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawMaterial {
    pub name: String,
    /// Path of the first diffuse texture, relative to the model file's
    /// directory.
    pub diffuse_texture: Option<String>,
    /// Used where there is no texture to sample.
    pub diffuse_color: Vec3,
}

impl Default for RawMaterial {
    fn default() -> Self {
        RawMaterial {
            name: "default".to_string(),
            diffuse_texture: None,
            diffuse_color: DEFAULT_DIFFUSE_COLOR,
        }
    }
}

/// Post-processing requested from an importer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportFlags {
    /// Split faces with more than three vertices into triangles.
    pub triangulate: bool,
    /// Generate smooth per-vertex normals for meshes without normals.
    pub gen_smooth_normals: bool,
    /// Make texture coordinates use a top-left origin, matching image rows.
    pub flip_uvs: bool,
    /// Merge identical materials and drop unreferenced ones.
    pub remove_redundant_materials: bool,
}

impl ImportFlags {
    /// Everything the viewer needs.
    pub const VIEWER: ImportFlags = ImportFlags {
        triangulate: true,
        gen_smooth_normals: true,
        flip_uvs: true,
        remove_redundant_materials: true,
    };
}

pub trait SceneImporter {
    fn import(&self, path: &Path, flags: ImportFlags) -> Result<ImportedScene, ImportError>;
}

/// Picks the importer by file extension.
#[derive(Default)]
pub struct FileImporter {
    obj: ObjImporter,
    gltf: GltfImporter,
}

impl SceneImporter for FileImporter {
    fn import(&self, path: &Path, flags: ImportFlags) -> Result<ImportedScene, ImportError> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match extension.as_str() {
            "obj" => self.obj.import(path, flags),
            "gltf" | "glb" => self.gltf.import(path, flags),
            _ => Err(ImportError::UnsupportedFormat(extension)),
        }
    }
}

/// Applies the requested post-processing and rejects scenes the rest of the
/// pipeline cannot use. Shared tail of every importer.
fn finish(mut scene: ImportedScene, flags: ImportFlags) -> Result<ImportedScene, ImportError> {
    if scene.meshes.is_empty() {
        return Err(ImportError::Incomplete("the file contains no meshes"));
    }
    if scene.materials.is_empty() {
        scene.materials.push(RawMaterial::default());
    }
    postprocess::apply(&mut scene, flags);
    log::debug!(
        "imported {} meshes and {} materials",
        scene.meshes.len(),
        scene.materials.len()
    );
    for (i, mesh) in scene.meshes.iter().enumerate() {
        log::debug!(
            "mesh[{i}] \"{}\": {} faces, {} vertices, material[{}]",
            mesh.name,
            mesh.faces.len(),
            mesh.positions.len(),
            mesh.material_index,
        );
    }
    for (i, material) in scene.materials.iter().enumerate() {
        log::debug!(
            "material[{i}] \"{}\": diffuse texture {:?}, color {}",
            material.name,
            material.diffuse_texture,
            material.diffuse_color,
        );
    }
    Ok(scene)
}
