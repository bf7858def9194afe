use std::ffi::c_void;
use std::ptr;

use crate::renderer::{
    gl, DeviceError, FrameUniforms, GraphicsDevice, MeshBuffers, MeshUpload, ShaderProgram,
    TextureHandle,
};
use crate::texture::DecodedImage;

/// [`GraphicsDevice`] backed by the current OpenGL ES 3.0 context.
pub struct GlDevice {
    _private: (),
}

impl GlDevice {
    /// Loads the OpenGL functions with `loader` and sets up the global render
    /// state (depth testing, back-face culling, clear color).
    pub fn load<F>(loader: F) -> GlDevice
    where
        F: FnMut(&'static str) -> *const c_void,
    {
        gl::load_with(loader);
        gl::call!(gl::ClearColor(0.0, 0.0, 0.0, 1.0));
        gl::call!(gl::Enable(gl::DEPTH_TEST));
        gl::call!(gl::Enable(gl::CULL_FACE));
        gl::call!(gl::CullFace(gl::BACK));
        GlDevice { _private: () }
    }

    pub fn resize(&self, width: i32, height: i32) {
        gl::call!(gl::Viewport(0, 0, width, height));
    }

    pub fn clear(&self) {
        gl::call!(gl::Clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT));
    }

    /// Fills the already created (and bound) buffers of `buffers`.
    fn write_mesh(&self, buffers: &MeshBuffers, mesh: &MeshUpload<'_>) -> Result<(), DeviceError> {
        let vertex_bytes = gl_size(mesh.vertex_bytes())?;
        let index_bytes: &[u8] = bytemuck::cast_slice(mesh.indices);
        let index_size = gl_size(index_bytes.len())?;

        gl::call!(gl::BindVertexArray(buffers.vao));
        gl::call!(gl::BindBuffer(gl::ARRAY_BUFFER, buffers.vbo));
        // Allocate the whole buffer first, then fill it attribute by attribute.
        unsafe { gl::BufferData(gl::ARRAY_BUFFER, vertex_bytes, ptr::null(), gl::STATIC_DRAW) };
        gl::check("glBufferData")?;
        for (attribute, bytes) in mesh.attribute_data() {
            gl::call!(gl::BufferSubData(
                gl::ARRAY_BUFFER,
                attribute.offset as isize,
                bytes.len() as isize,
                bytes.as_ptr() as *const c_void,
            ));
            gl::call!(gl::EnableVertexAttribArray(attribute.location));
            gl::call!(gl::VertexAttribPointer(
                attribute.location,
                attribute.components,
                gl::FLOAT,
                gl::FALSE,
                0,
                ptr::null::<c_void>().wrapping_add(attribute.offset),
            ));
        }

        // The element array binding is part of the vertex array state.
        gl::call!(gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, buffers.ibo));
        unsafe {
            gl::BufferData(
                gl::ELEMENT_ARRAY_BUFFER,
                index_size,
                index_bytes.as_ptr() as *const c_void,
                gl::STATIC_DRAW,
            )
        };
        gl::check("glBufferData")?;
        Ok(())
    }
}

impl GraphicsDevice for GlDevice {
    type Program = ShaderProgram;

    fn upload_mesh(&self, mesh: &MeshUpload<'_>) -> Result<MeshBuffers, DeviceError> {
        let mut buffers = MeshBuffers::default();
        gl::call!(gl::GenVertexArrays(1, &mut buffers.vao));
        gl::call!(gl::GenBuffers(1, &mut buffers.vbo));
        gl::call!(gl::GenBuffers(1, &mut buffers.ibo));
        let result = if buffers.vao == 0 || buffers.vbo == 0 || buffers.ibo == 0 {
            Err(DeviceError::Allocation("vertex array or buffer object"))
        } else {
            self.write_mesh(&buffers, mesh)
        };
        gl::call!(gl::BindVertexArray(0));
        gl::call!(gl::BindBuffer(gl::ARRAY_BUFFER, 0));
        gl::call!(gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, 0));
        match result {
            Ok(()) => Ok(buffers),
            Err(err) => {
                self.release_mesh(&buffers);
                Err(err)
            }
        }
    }

    fn release_mesh(&self, buffers: &MeshBuffers) {
        if buffers.vao != 0 {
            gl::call!(gl::BindVertexArray(0));
            gl::call!(gl::DeleteVertexArrays(1, &buffers.vao));
        }
        if buffers.vbo != 0 {
            gl::call!(gl::BindBuffer(gl::ARRAY_BUFFER, 0));
            gl::call!(gl::DeleteBuffers(1, &buffers.vbo));
        }
        if buffers.ibo != 0 {
            gl::call!(gl::DeleteBuffers(1, &buffers.ibo));
        }
    }

    fn upload_texture(&self, image: &DecodedImage) -> Result<TextureHandle, DeviceError> {
        let (internal_format, format) = match image.channels {
            1 => (gl::R8, gl::RED),
            3 => (gl::RGB8, gl::RGB),
            4 => (gl::RGBA8, gl::RGBA),
            channels => return Err(DeviceError::UnsupportedChannels(channels)),
        };
        let mut texture = 0;
        gl::call!(gl::GenTextures(1, &mut texture));
        if texture == 0 {
            return Err(DeviceError::Allocation("texture object"));
        }
        gl::call!(gl::BindTexture(gl::TEXTURE_2D, texture));
        // Rows of 1- and 3-channel images are tightly packed.
        gl::call!(gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1));
        unsafe {
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                internal_format as i32,
                image.width as i32,
                image.height as i32,
                0,
                format,
                gl::UNSIGNED_BYTE,
                image.pixels.as_ptr() as *const c_void,
            )
        };
        if let Err(err) = gl::check("glTexImage2D") {
            gl::call!(gl::BindTexture(gl::TEXTURE_2D, 0));
            gl::call!(gl::DeleteTextures(1, &texture));
            return Err(err);
        }
        gl::call!(gl::GenerateMipmap(gl::TEXTURE_2D));
        gl::call!(gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::REPEAT as i32));
        gl::call!(gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::REPEAT as i32));
        gl::call!(gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32));
        gl::call!(gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32));
        gl::call!(gl::BindTexture(gl::TEXTURE_2D, 0));
        Ok(TextureHandle(texture))
    }

    fn release_texture(&self, texture: TextureHandle) {
        if !texture.is_none() {
            gl::call!(gl::BindTexture(gl::TEXTURE_2D, 0));
            gl::call!(gl::DeleteTextures(1, &texture.0));
        }
    }

    fn bind_frame(&self, program: &ShaderProgram, frame: &FrameUniforms) {
        gl::call!(gl::UseProgram(program.program));
        if let Some(location) = program.position_matrix_location {
            let matrix = frame.position_matrix.to_cols_array();
            gl::call!(gl::UniformMatrix4fv(location, 1, gl::FALSE, matrix.as_ptr()));
        }
        if let Some(location) = program.normal_matrix_location {
            let matrix = frame.normal_matrix.to_cols_array();
            gl::call!(gl::UniformMatrix3fv(location, 1, gl::FALSE, matrix.as_ptr()));
        }
        if let Some(location) = program.projection_location {
            let matrix = frame.projection.to_cols_array();
            gl::call!(gl::UniformMatrix4fv(location, 1, gl::FALSE, matrix.as_ptr()));
        }
        if let Some(location) = program.use_lighting_location {
            gl::call!(gl::Uniform1i(location, frame.use_lighting as i32));
        }
    }

    fn set_flag(&self, program: &ShaderProgram, name: &str, value: bool) {
        if let Some(location) = program.uniform_location(name) {
            gl::call!(gl::Uniform1i(location, value as i32));
        }
    }

    fn draw_indexed(&self, buffers: &MeshBuffers, texture: TextureHandle, index_count: usize) {
        gl::call!(gl::BindVertexArray(buffers.vao));
        gl::call!(gl::ActiveTexture(gl::TEXTURE0));
        gl::call!(gl::BindTexture(gl::TEXTURE_2D, texture.0));
        gl::call!(gl::DrawElements(
            gl::TRIANGLES,
            index_count as i32,
            gl::UNSIGNED_INT,
            ptr::null(),
        ));
        gl::call!(gl::BindVertexArray(0));
    }
}

fn gl_size(bytes: usize) -> Result<isize, DeviceError> {
    isize::try_from(bytes).map_err(|_| DeviceError::TooLarge(bytes))
}
