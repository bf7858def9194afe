use glam::{Mat3, Mat4, Vec2, Vec3};
use thiserror::Error;

use crate::texture::DecodedImage;

pub mod gl;
mod gl_device;
mod program;
#[cfg(test)]
pub(crate) mod recording;

pub use gl_device::GlDevice;
pub use program::*;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{call} failed with OpenGL error {error}")]
    Gl { call: &'static str, error: String },
    #[error("could not allocate {0}")]
    Allocation(&'static str),
    #[error("compiling {stage} shader failed: {info_log}")]
    ShaderCompile {
        stage: &'static str,
        info_log: String,
    },
    #[error("linking shader program failed: {0}")]
    ProgramLink(String),
    #[error("{0} bytes do not fit in a single buffer")]
    TooLarge(usize),
    #[error("textures with {0} channels are not supported")]
    UnsupportedChannels(u8),
}

/// The GPU objects backing one uploaded mesh. Zero means "not created".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshBuffers {
    pub vao: u32,
    pub vbo: u32,
    pub ibo: u32,
}

/// A GPU texture object. [`TextureHandle::NONE`] is valid to bind, and
/// samples as "no texture".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

impl TextureHandle {
    pub const NONE: TextureHandle = TextureHandle(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// A vertex attribute slot, bound to a non-overlapping range of a mesh's
/// vertex buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: i32,
    pub offset: usize,
}

/// Borrowed view of a mesh's CPU-side arrays, in the form the device uploads
/// them: one vertex buffer holding every position, then every color, then
/// every normal, then every uv, plus a separate index buffer.
pub struct MeshUpload<'a> {
    pub positions: &'a [Vec3],
    pub colors: &'a [Vec3],
    pub normals: &'a [Vec3],
    pub uvs: &'a [Vec2],
    pub indices: &'a [u32],
}

impl MeshUpload<'_> {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Size of the vertex buffer in bytes.
    pub fn vertex_bytes(&self) -> usize {
        self.attribute_data()
            .iter()
            .map(|(_, bytes)| bytes.len())
            .sum()
    }

    /// The attribute slots and the bytes written at each slot's offset, in
    /// upload order.
    pub fn attribute_data(&self) -> [(VertexAttribute, &[u8]); 4] {
        let positions: &[u8] = bytemuck::cast_slice(self.positions);
        let colors: &[u8] = bytemuck::cast_slice(self.colors);
        let normals: &[u8] = bytemuck::cast_slice(self.normals);
        let uvs: &[u8] = bytemuck::cast_slice(self.uvs);
        let color_offset = positions.len();
        let normal_offset = color_offset + colors.len();
        let uv_offset = normal_offset + normals.len();
        [
            (
                VertexAttribute {
                    location: ATTR_LOC_POSITION,
                    components: 3,
                    offset: 0,
                },
                positions,
            ),
            (
                VertexAttribute {
                    location: ATTR_LOC_COLOR,
                    components: 3,
                    offset: color_offset,
                },
                colors,
            ),
            (
                VertexAttribute {
                    location: ATTR_LOC_NORMAL,
                    components: 3,
                    offset: normal_offset,
                },
                normals,
            ),
            (
                VertexAttribute {
                    location: ATTR_LOC_TEXCOORD,
                    components: 2,
                    offset: uv_offset,
                },
                uvs,
            ),
        ]
    }
}

/// Per-frame camera state, as written into the shading program's uniforms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameUniforms {
    /// View * model transform.
    pub position_matrix: Mat4,
    /// Inverse-transpose of the model rotation, for transforming normals.
    pub normal_matrix: Mat3,
    pub projection: Mat4,
    pub use_lighting: bool,
}

/// Everything the model code needs from the GPU. All methods are called on
/// the thread that owns the graphics context.
pub trait GraphicsDevice {
    /// The shading program handle passed through to draws.
    type Program;

    /// Creates the vertex array, vertex buffer and index buffer for a mesh
    /// and uploads its data. Any objects created before a failure are
    /// released before the error is returned.
    fn upload_mesh(&self, mesh: &MeshUpload<'_>) -> Result<MeshBuffers, DeviceError>;

    /// Releases the non-zero objects in `buffers`.
    fn release_mesh(&self, buffers: &MeshBuffers);

    /// Uploads a decoded image as a mipmapped, repeating, linearly filtered
    /// texture.
    fn upload_texture(&self, image: &DecodedImage) -> Result<TextureHandle, DeviceError>;

    /// Releases the texture, unless it is [`TextureHandle::NONE`].
    fn release_texture(&self, texture: TextureHandle);

    /// Writes the camera matrices and lighting flag into the program.
    fn bind_frame(&self, program: &Self::Program, frame: &FrameUniforms);

    /// Writes a named boolean uniform.
    fn set_flag(&self, program: &Self::Program, name: &str, value: bool);

    /// Draws `index_count` indices of `buffers` as triangles with `texture`
    /// bound, then unbinds the vertex array.
    fn draw_indexed(&self, buffers: &MeshBuffers, texture: TextureHandle, index_count: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_laid_out_back_to_back() {
        let positions = [Vec3::ZERO; 4];
        let colors = [Vec3::ONE; 4];
        let normals = [Vec3::Z; 4];
        let uvs = [Vec2::ZERO; 4];
        let upload = MeshUpload {
            positions: &positions,
            colors: &colors,
            normals: &normals,
            uvs: &uvs,
            indices: &[0, 1, 2, 0, 2, 3],
        };
        let slots = upload.attribute_data().map(|(slot, _)| slot);
        assert_eq!(
            slots.map(|s| (s.location, s.components, s.offset)),
            [(0, 3, 0), (1, 3, 48), (2, 3, 96), (3, 2, 144)]
        );
        assert_eq!(upload.vertex_bytes(), 11 * 4 * 4);
    }

    #[test]
    fn zero_texture_handle_is_none() {
        assert!(TextureHandle::NONE.is_none());
        assert!(!TextureHandle(7).is_none());
    }
}
