#![allow(clippy::all, clippy::pedantic, non_upper_case_globals, unused)]

use std::ffi::{c_char, CString};

use crate::renderer::DeviceError;

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));

/// Runs the given OpenGL call, and in debug builds, logs any error it raised
/// along with the call site.
macro_rules! call {
    ($expr:expr) => {{
        let result = unsafe { $expr };
        if cfg!(debug_assertions) {
            let error = unsafe { $crate::renderer::gl::GetError() };
            if error != $crate::renderer::gl::NO_ERROR {
                log::error!(
                    "OpenGL error {} at {}:{}:{}",
                    $crate::renderer::gl::error_name(error),
                    file!(),
                    line!(),
                    column!(),
                );
            }
        }
        result
    }};
}
pub(crate) use call;

pub fn error_name(error: types::GLenum) -> String {
    match error {
        INVALID_ENUM => "INVALID_ENUM".to_string(),
        INVALID_VALUE => "INVALID_VALUE".to_string(),
        INVALID_OPERATION => "INVALID_OPERATION".to_string(),
        OUT_OF_MEMORY => "OUT_OF_MEMORY".to_string(),
        INVALID_FRAMEBUFFER_OPERATION => "INVALID_FRAMEBUFFER_OPERATION".to_string(),
        _ => format!("{error}"),
    }
}

/// Returns an error if the last OpenGL call (named `call` for the message)
/// failed. Used instead of [`call!`] where a failure must be handled rather
/// than just logged, e.g. allocations.
pub fn check(call: &'static str) -> Result<(), DeviceError> {
    let error = unsafe { GetError() };
    if error == NO_ERROR {
        Ok(())
    } else {
        Err(DeviceError::Gl {
            call,
            error: error_name(error),
        })
    }
}

pub fn create_shader(type_: types::GLenum, source: &str) -> Result<types::GLuint, DeviceError> {
    let shader = call!(CreateShader(type_));
    if shader == 0 {
        return Err(DeviceError::Allocation("shader object"));
    }
    let sources = [source.as_bytes().as_ptr() as *const c_char];
    let source_lens = [source.len() as i32];
    call!(ShaderSource(shader, 1, sources.as_ptr(), source_lens.as_ptr()));
    call!(CompileShader(shader));
    let mut compile_status = 0;
    call!(GetShaderiv(shader, COMPILE_STATUS, &mut compile_status));
    if compile_status == FALSE as i32 {
        let mut info_log = [0u8; 4096];
        let mut length = 0;
        call!(GetShaderInfoLog(
            shader,
            info_log.len() as i32,
            &mut length,
            info_log.as_mut_ptr() as *mut c_char,
        ));
        let info_log = String::from_utf8_lossy(&info_log[..length.max(0) as usize]).into_owned();
        call!(DeleteShader(shader));
        let stage = if type_ == VERTEX_SHADER {
            "vertex"
        } else {
            "fragment"
        };
        return Err(DeviceError::ShaderCompile { stage, info_log });
    }
    Ok(shader)
}

pub fn create_program(shaders: &[types::GLuint]) -> Result<types::GLuint, DeviceError> {
    let program = call!(CreateProgram());
    if program == 0 {
        return Err(DeviceError::Allocation("program object"));
    }
    for &shader in shaders {
        call!(AttachShader(program, shader));
    }
    call!(LinkProgram(program));
    let mut link_status = 0;
    call!(GetProgramiv(program, LINK_STATUS, &mut link_status));
    if link_status == FALSE as i32 {
        let mut info_log = [0u8; 4096];
        let mut length = 0;
        call!(GetProgramInfoLog(
            program,
            info_log.len() as i32,
            &mut length,
            info_log.as_mut_ptr() as *mut c_char,
        ));
        let info_log = String::from_utf8_lossy(&info_log[..length.max(0) as usize]).into_owned();
        call!(DeleteProgram(program));
        return Err(DeviceError::ProgramLink(info_log));
    }
    Ok(program)
}

/// Returns the location of the named uniform, or None if the program has no
/// active uniform by that name (e.g. it was optimized out).
pub fn get_uniform_location(program: types::GLuint, name: &str) -> Option<types::GLint> {
    let name = CString::new(name).ok()?;
    let location = call!(GetUniformLocation(program, name.as_ptr()));
    (location != -1).then_some(location)
}
