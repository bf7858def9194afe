use std::collections::TryReserveError;
use std::rc::Rc;

use glam::{Vec2, Vec3};
use thiserror::Error;

use crate::renderer::{
    DeviceError, GraphicsDevice, MeshBuffers, MeshUpload, TextureHandle, UNIFORM_HAS_TEXTURE,
};
use crate::scene::RawMesh;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("could not allocate vertex data for {vertices} vertices: {source}")]
    Allocation {
        vertices: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("face {face} references vertex {index}, but there are only {vertex_count} vertices")]
    IndexOutOfRange {
        face: usize,
        index: u32,
        vertex_count: usize,
    },
    #[error("the mesh has no triangles")]
    NoTriangles,
    #[error("the mesh has {expected} positions but {actual} {attribute}")]
    AttributeLength {
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("material {0} does not exist")]
    MaterialOutOfRange(usize),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// CPU-side vertex data of one mesh, in the indexed layout: one entry per
/// source vertex in each attribute array, and three indices per triangle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshGeometry {
    pub positions: Vec<Vec3>,
    /// The fallback color, on every vertex. Only sampled without a texture.
    pub colors: Vec<Vec3>,
    /// Zero where the source has no normals.
    pub normals: Vec<Vec3>,
    /// Zero where the source has no texture coordinates.
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl MeshGeometry {
    /// Checks that `mesh` can be built: attribute arrays match the vertex
    /// count, every index is in range and there is at least one triangle.
    pub fn validate(mesh: &RawMesh) -> Result<(), MeshError> {
        let vertex_count = mesh.positions.len();
        let attributes = [
            ("normals", mesh.normals.as_ref().map(Vec::len)),
            ("texture coordinates", mesh.uvs.as_ref().map(Vec::len)),
        ];
        for (attribute, len) in attributes {
            match len {
                Some(actual) if actual != vertex_count => {
                    return Err(MeshError::AttributeLength {
                        attribute,
                        expected: vertex_count,
                        actual,
                    });
                }
                _ => {}
            }
        }
        let mut triangles = 0;
        for (face, indices) in mesh.faces.iter().map(|face| &face.indices).enumerate() {
            if let Some(&index) = indices
                .iter()
                .find(|&&index| index as usize >= vertex_count)
            {
                return Err(MeshError::IndexOutOfRange {
                    face,
                    index,
                    vertex_count,
                });
            }
            triangles += indices.len().saturating_sub(2);
        }
        if triangles == 0 {
            return Err(MeshError::NoTriangles);
        }
        Ok(())
    }

    /// Builds the vertex data of `mesh`, with `positions` in place of the
    /// mesh's own. Faces with more than three vertices are split into
    /// triangle fans, points and lines are skipped.
    pub fn build(
        mesh: &RawMesh,
        positions: &[Vec3],
        fallback_color: Vec3,
    ) -> Result<MeshGeometry, MeshError> {
        if positions.len() != mesh.positions.len() {
            return Err(MeshError::AttributeLength {
                attribute: "replacement positions",
                expected: mesh.positions.len(),
                actual: positions.len(),
            });
        }
        MeshGeometry::validate(mesh)?;

        let vertex_count = positions.len();
        let index_count = mesh
            .faces
            .iter()
            .map(|face| face.indices.len().saturating_sub(2) * 3)
            .sum();
        let allocation_failed = |source: TryReserveError| MeshError::Allocation {
            vertices: vertex_count,
            source,
        };
        let mut geometry = MeshGeometry::default();
        geometry
            .positions
            .try_reserve_exact(vertex_count)
            .map_err(allocation_failed)?;
        geometry
            .colors
            .try_reserve_exact(vertex_count)
            .map_err(allocation_failed)?;
        geometry
            .normals
            .try_reserve_exact(vertex_count)
            .map_err(allocation_failed)?;
        geometry
            .uvs
            .try_reserve_exact(vertex_count)
            .map_err(allocation_failed)?;
        geometry
            .indices
            .try_reserve_exact(index_count)
            .map_err(allocation_failed)?;

        geometry.positions.extend_from_slice(positions);
        geometry
            .colors
            .extend(std::iter::repeat(fallback_color).take(vertex_count));
        match &mesh.normals {
            Some(normals) => geometry.normals.extend_from_slice(normals),
            None => geometry.normals.resize(vertex_count, Vec3::ZERO),
        }
        match &mesh.uvs {
            Some(uvs) => geometry.uvs.extend_from_slice(uvs),
            None => geometry.uvs.resize(vertex_count, Vec2::ZERO),
        }
        for face in &mesh.faces {
            let Some((&first, rest)) = face.indices.split_first() else {
                continue;
            };
            for pair in rest.windows(2) {
                geometry.indices.extend_from_slice(&[first, pair[0], pair[1]]);
            }
        }
        Ok(geometry)
    }

    pub fn upload(&self) -> MeshUpload<'_> {
        MeshUpload {
            positions: &self.positions,
            colors: &self.colors,
            normals: &self.normals,
            uvs: &self.uvs,
            indices: &self.indices,
        }
    }
}

/// One drawable unit: the vertex data of one imported mesh, uploaded to the
/// GPU, and the texture (or fallback color) it is drawn with.
///
/// The vertex array and buffers are released when this is dropped. The
/// texture is not, it belongs to the [`Model`](crate::model::Model).
pub struct MeshResource<D: GraphicsDevice> {
    device: Rc<D>,
    geometry: MeshGeometry,
    buffers: MeshBuffers,
    texture: TextureHandle,
}

impl<D: GraphicsDevice> MeshResource<D> {
    pub fn new(
        device: Rc<D>,
        mesh: &RawMesh,
        positions: &[Vec3],
        texture: TextureHandle,
        fallback_color: Vec3,
    ) -> Result<MeshResource<D>, MeshError> {
        let geometry = MeshGeometry::build(mesh, positions, fallback_color)?;
        let buffers = device.upload_mesh(&geometry.upload())?;
        Ok(MeshResource {
            device,
            geometry,
            buffers,
            texture,
        })
    }

    pub fn draw(&self, program: &D::Program) {
        self.device
            .set_flag(program, UNIFORM_HAS_TEXTURE, self.has_texture());
        self.device
            .draw_indexed(&self.buffers, self.texture, self.geometry.indices.len());
    }

    pub fn has_texture(&self) -> bool {
        !self.texture.is_none()
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.geometry.indices.len() / 3
    }

    pub fn geometry(&self) -> &MeshGeometry {
        &self.geometry
    }

    pub fn buffers(&self) -> MeshBuffers {
        self.buffers
    }
}

impl<D: GraphicsDevice> Drop for MeshResource<D> {
    fn drop(&mut self) {
        self.device.release_mesh(&self.buffers);
    }
}
