use std::path::Path;

use glam::{Vec2, Vec3};

use crate::scene::{
    finish, Face, ImportError, ImportFlags, ImportedScene, RawMaterial, RawMesh,
    DEFAULT_DIFFUSE_COLOR,
};

/// Wavefront OBJ importer. Materials come from the MTL libraries the file
/// references: `Kd` is the diffuse color and `map_Kd` the diffuse texture.
#[derive(Default)]
pub struct ObjImporter;

impl ObjImporter {
    pub fn import(&self, path: &Path, flags: ImportFlags) -> Result<ImportedScene, ImportError> {
        log::info!("Loading OBJ file: {}", path.display());
        // Triangulation is left to the post-processing pass so that it is
        // only done when requested.
        let load_options = tobj::LoadOptions {
            triangulate: false,
            single_index: true,
            ..Default::default()
        };
        let (models, materials) = tobj::load_obj(path, &load_options)?;
        let mut materials: Vec<RawMaterial> = match materials {
            Ok(materials) => materials.into_iter().map(convert_material).collect(),
            Err(err) => {
                log::warn!("No usable MTL for {}: {err}", path.display());
                Vec::new()
            }
        };

        let mut default_material = None;
        let mut meshes = Vec::with_capacity(models.len());
        for model in models {
            let material_index = match model.mesh.material_id {
                Some(id) if id < materials.len() => id,
                _ => *default_material.get_or_insert_with(|| {
                    materials.push(RawMaterial::default());
                    materials.len() - 1
                }),
            };
            meshes.push(convert_mesh(model, material_index));
        }

        finish(ImportedScene { meshes, materials }, flags)
    }
}

fn convert_material(material: tobj::Material) -> RawMaterial {
    RawMaterial {
        diffuse_texture: material.diffuse_texture.filter(|texture| !texture.is_empty()),
        diffuse_color: material.diffuse.map(Vec3::from).unwrap_or(DEFAULT_DIFFUSE_COLOR),
        name: material.name,
    }
}

fn convert_mesh(model: tobj::Model, material_index: usize) -> RawMesh {
    let mesh = model.mesh;
    let positions: Vec<Vec3> = mesh
        .positions
        .chunks_exact(3)
        .map(Vec3::from_slice)
        .collect();
    let vertex_count = positions.len();
    let normals = (mesh.normals.len() == vertex_count * 3 && vertex_count > 0).then(|| {
        mesh.normals
            .chunks_exact(3)
            .map(Vec3::from_slice)
            .collect()
    });
    let uvs = (mesh.texcoords.len() == vertex_count * 2 && vertex_count > 0).then(|| {
        mesh.texcoords
            .chunks_exact(2)
            .map(Vec2::from_slice)
            .collect()
    });

    // An empty arity list means every face is a triangle.
    let faces = if mesh.face_arities.is_empty() {
        mesh.indices.chunks(3).map(Face::new).collect()
    } else {
        let mut faces = Vec::with_capacity(mesh.face_arities.len());
        let mut remaining = mesh.indices.as_slice();
        for &arity in &mesh.face_arities {
            let (face, rest) = remaining.split_at((arity as usize).min(remaining.len()));
            faces.push(Face::new(face));
            remaining = rest;
        }
        faces
    };

    RawMesh {
        name: model.name,
        positions,
        normals,
        uvs,
        faces,
        material_index,
    }
}
