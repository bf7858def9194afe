//! In-place clean-up passes run by the importers on request.

use glam::Vec3;

use crate::scene::{Face, ImportFlags, ImportedScene, RawMaterial, RawMesh};

pub fn apply(scene: &mut ImportedScene, flags: ImportFlags) {
    for mesh in &mut scene.meshes {
        if flags.triangulate {
            triangulate(mesh);
        }
        if flags.gen_smooth_normals && mesh.normals.is_none() {
            mesh.normals = Some(smooth_normals(mesh));
        }
        if flags.flip_uvs {
            flip_uvs(mesh);
        }
    }
    if flags.remove_redundant_materials {
        remove_redundant_materials(scene);
    }
}

/// Splits every face with more than three vertices into a triangle fan.
/// Points and lines are left alone.
pub fn triangulate(mesh: &mut RawMesh) {
    if mesh.faces.iter().all(|face| face.indices.len() <= 3) {
        return;
    }
    let mut faces = Vec::with_capacity(mesh.faces.len());
    for face in mesh.faces.drain(..) {
        if face.indices.len() <= 3 {
            faces.push(face);
            continue;
        }
        let first = face.indices[0];
        for pair in face.indices[1..].windows(2) {
            faces.push(Face::new([first, pair[0], pair[1]]));
        }
    }
    mesh.faces = faces;
}

/// Area-weighted average of the normals of the faces around each vertex.
/// Vertices not used by any face get a zero normal.
pub fn smooth_normals(mesh: &RawMesh) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; mesh.positions.len()];
    let position = |index: u32| mesh.positions.get(index as usize).copied();
    for face in &mesh.faces {
        let Some((&first, rest)) = face.indices.split_first() else {
            continue;
        };
        for pair in rest.windows(2) {
            let (Some(a), Some(b), Some(c)) = (position(first), position(pair[0]), position(pair[1]))
            else {
                continue;
            };
            // The cross product's length is twice the triangle's area.
            let weighted_normal = (b - a).cross(c - a);
            for index in [first, pair[0], pair[1]] {
                normals[index as usize] += weighted_normal;
            }
        }
    }
    for normal in &mut normals {
        *normal = normal.normalize_or_zero();
    }
    normals
}

/// Mirrors texture coordinates vertically, converting between bottom-left and
/// top-left origins.
pub fn flip_uvs(mesh: &mut RawMesh) {
    if let Some(uvs) = &mut mesh.uvs {
        for uv in uvs {
            uv.y = 1.0 - uv.y;
        }
    }
}

/// Merges materials with the same texture and color, and drops the ones no
/// mesh uses. Mesh material indices are remapped to match.
pub fn remove_redundant_materials(scene: &mut ImportedScene) {
    let mut kept: Vec<RawMaterial> = Vec::new();
    let mut remap: Vec<Option<usize>> = vec![None; scene.materials.len()];
    for mesh in &mut scene.meshes {
        let Some(material) = scene.materials.get(mesh.material_index) else {
            // Left out of range, the mesh gets rejected when it is built.
            continue;
        };
        let new_index = match remap[mesh.material_index] {
            Some(index) => index,
            None => {
                let index = match kept.iter().position(|other| same_appearance(other, material)) {
                    Some(index) => index,
                    None => {
                        kept.push(material.clone());
                        kept.len() - 1
                    }
                };
                remap[mesh.material_index] = Some(index);
                index
            }
        };
        mesh.material_index = new_index;
    }
    if kept.is_empty() {
        kept.push(RawMaterial::default());
    }
    if kept.len() != scene.materials.len() {
        log::debug!(
            "removed {} redundant materials",
            scene.materials.len() - kept.len()
        );
    }
    scene.materials = kept;
}

fn same_appearance(a: &RawMaterial, b: &RawMaterial) -> bool {
    a.diffuse_texture == b.diffuse_texture && a.diffuse_color == b.diffuse_color
}
