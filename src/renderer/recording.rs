//! A [`GraphicsDevice`] that only records what it is asked to do, so model
//! code can be tested without a GL context.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use crate::renderer::{
    DeviceError, FrameUniforms, GraphicsDevice, MeshBuffers, MeshUpload, TextureHandle,
    VertexAttribute,
};
use crate::texture::DecodedImage;

pub struct RecordedMesh {
    pub buffers: MeshBuffers,
    pub vertex_data: Vec<u8>,
    pub attributes: Vec<VertexAttribute>,
    pub indices: Vec<u32>,
}

#[derive(Debug, PartialEq)]
pub struct RecordedDraw {
    pub vao: u32,
    pub texture: TextureHandle,
    pub index_count: usize,
    pub has_texture: Option<bool>,
}

#[derive(Default)]
pub struct RecordingDevice {
    next_handle: Cell<u32>,
    /// Mesh uploads fail once this many have succeeded.
    pub mesh_upload_limit: Cell<Option<usize>>,
    pub meshes: RefCell<Vec<RecordedMesh>>,
    pub textures: RefCell<Vec<(TextureHandle, u32, u32, u8)>>,
    pub live: RefCell<BTreeSet<u32>>,
    pub released: RefCell<Vec<u32>>,
    pub frames: RefCell<Vec<FrameUniforms>>,
    pub flags: RefCell<Vec<(String, bool)>>,
    pub draws: RefCell<Vec<RecordedDraw>>,
}

impl RecordingDevice {
    fn create(&self) -> u32 {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        self.live.borrow_mut().insert(handle);
        handle
    }

    fn release(&self, handle: u32) {
        assert!(
            self.live.borrow_mut().remove(&handle),
            "handle {handle} released twice or never created"
        );
        self.released.borrow_mut().push(handle);
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }
}

impl GraphicsDevice for RecordingDevice {
    type Program = ();

    fn upload_mesh(&self, mesh: &MeshUpload<'_>) -> Result<MeshBuffers, DeviceError> {
        if let Some(limit) = self.mesh_upload_limit.get() {
            if self.meshes.borrow().len() >= limit {
                return Err(DeviceError::Allocation("vertex array or buffer object"));
            }
        }
        let buffers = MeshBuffers {
            vao: self.create(),
            vbo: self.create(),
            ibo: self.create(),
        };
        let mut vertex_data = vec![0u8; mesh.vertex_bytes()];
        let mut attributes = Vec::new();
        for (attribute, bytes) in mesh.attribute_data() {
            vertex_data[attribute.offset..attribute.offset + bytes.len()].copy_from_slice(bytes);
            attributes.push(attribute);
        }
        self.meshes.borrow_mut().push(RecordedMesh {
            buffers,
            vertex_data,
            attributes,
            indices: mesh.indices.to_vec(),
        });
        Ok(buffers)
    }

    fn release_mesh(&self, buffers: &MeshBuffers) {
        for handle in [buffers.vao, buffers.vbo, buffers.ibo] {
            if handle != 0 {
                self.release(handle);
            }
        }
    }

    fn upload_texture(&self, image: &DecodedImage) -> Result<TextureHandle, DeviceError> {
        let texture = TextureHandle(self.create());
        self.textures
            .borrow_mut()
            .push((texture, image.width, image.height, image.channels));
        Ok(texture)
    }

    fn release_texture(&self, texture: TextureHandle) {
        if !texture.is_none() {
            self.release(texture.0);
        }
    }

    fn bind_frame(&self, _: &(), frame: &FrameUniforms) {
        self.frames.borrow_mut().push(*frame);
    }

    fn set_flag(&self, _: &(), name: &str, value: bool) {
        self.flags.borrow_mut().push((name.to_string(), value));
    }

    fn draw_indexed(&self, buffers: &MeshBuffers, texture: TextureHandle, index_count: usize) {
        let has_texture = self.flags.borrow().last().map(|(_, value)| *value);
        self.draws.borrow_mut().push(RecordedDraw {
            vao: buffers.vao,
            texture,
            index_count,
            has_texture,
        });
    }
}
