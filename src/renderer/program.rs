use crate::renderer::{gl, DeviceError};

/// The vertex attribute location of vertex positions.
pub const ATTR_LOC_POSITION: gl::types::GLuint = 0;
/// The vertex attribute location of the flat fallback colors.
pub const ATTR_LOC_COLOR: gl::types::GLuint = 1;
/// The vertex attribute location of vertex normals.
pub const ATTR_LOC_NORMAL: gl::types::GLuint = 2;
/// The vertex attribute location of texture coordinates.
pub const ATTR_LOC_TEXCOORD: gl::types::GLuint = 3;

pub const UNIFORM_POSITION_MATRIX: &str = "positionMatrix";
pub const UNIFORM_NORMAL_MATRIX: &str = "normalMatrix";
pub const UNIFORM_PROJECTION: &str = "projection";
pub const UNIFORM_USE_LIGHTING: &str = "useLighting";
pub const UNIFORM_HAS_TEXTURE: &str = "hasTexture";
pub const UNIFORM_SAMPLER: &str = "diffuseSampler";

const VERTEX_SHADER: &str = r#"#version 300 es
layout(location = 0) in vec3 POSITION;
layout(location = 1) in vec3 COLOR;
layout(location = 2) in vec3 NORMAL;
layout(location = 3) in vec2 TEXCOORD;
out vec3 view_position;
out vec3 vertex_color;
out vec3 vertex_normal;
out vec2 vertex_uv;
uniform mat4 positionMatrix;
uniform mat4 projection;
void main() {
    vec4 position = positionMatrix * vec4(POSITION, 1.0);
    view_position = position.xyz;
    vertex_color = COLOR;
    vertex_normal = NORMAL;
    vertex_uv = TEXCOORD;
    gl_Position = projection * position;
}
"#;
const FRAGMENT_SHADER: &str = r#"#version 300 es
precision mediump float;
in vec3 view_position;
in vec3 vertex_color;
in vec3 vertex_normal;
in vec2 vertex_uv;
out vec4 FRAG_COLOR;
uniform mat3 normalMatrix;
uniform sampler2D diffuseSampler;
uniform bool hasTexture;
uniform bool useLighting;
void main() {
    vec3 color = hasTexture ? texture(diffuseSampler, vertex_uv).rgb : vertex_color;
    if (useLighting) {
        vec3 light_position = vec3(0.0, 0.0, 2.0);
        vec3 normal = normalize(normalMatrix * vertex_normal);
        vec3 light_direction = normalize(light_position - view_position);
        vec3 ambient = color * 0.05;
        vec3 diffuse = max(dot(light_direction, normal), 0.0) * color;
        color = ambient + diffuse;
    }
    FRAG_COLOR = vec4(color, 1.0);
}
"#;

/// The compiled shading program of the viewer, with the locations of the
/// per-frame uniforms looked up once.
pub struct ShaderProgram {
    pub program: gl::types::GLuint,
    pub position_matrix_location: Option<gl::types::GLint>,
    pub normal_matrix_location: Option<gl::types::GLint>,
    pub projection_location: Option<gl::types::GLint>,
    pub use_lighting_location: Option<gl::types::GLint>,
    pub has_texture_location: Option<gl::types::GLint>,
}

impl ShaderProgram {
    /// Compiles and links the program and makes it the current one. Requires
    /// a current GL context.
    pub fn new() -> Result<ShaderProgram, DeviceError> {
        let vertex_shader = gl::create_shader(gl::VERTEX_SHADER, VERTEX_SHADER)?;
        let fragment_shader = match gl::create_shader(gl::FRAGMENT_SHADER, FRAGMENT_SHADER) {
            Ok(shader) => shader,
            Err(err) => {
                gl::call!(gl::DeleteShader(vertex_shader));
                return Err(err);
            }
        };
        let program = gl::create_program(&[vertex_shader, fragment_shader]);
        gl::call!(gl::DeleteShader(vertex_shader));
        gl::call!(gl::DeleteShader(fragment_shader));
        let program = program?;

        gl::call!(gl::UseProgram(program));
        if let Some(sampler) = gl::get_uniform_location(program, UNIFORM_SAMPLER) {
            gl::call!(gl::Uniform1i(sampler, 0));
        }
        Ok(ShaderProgram {
            program,
            position_matrix_location: gl::get_uniform_location(program, UNIFORM_POSITION_MATRIX),
            normal_matrix_location: gl::get_uniform_location(program, UNIFORM_NORMAL_MATRIX),
            projection_location: gl::get_uniform_location(program, UNIFORM_PROJECTION),
            use_lighting_location: gl::get_uniform_location(program, UNIFORM_USE_LIGHTING),
            has_texture_location: gl::get_uniform_location(program, UNIFORM_HAS_TEXTURE),
        })
    }

    /// Location of the named uniform. The per-frame and per-draw uniforms
    /// come from the cache, anything else is looked up.
    pub fn uniform_location(&self, name: &str) -> Option<gl::types::GLint> {
        match name {
            UNIFORM_POSITION_MATRIX => self.position_matrix_location,
            UNIFORM_NORMAL_MATRIX => self.normal_matrix_location,
            UNIFORM_PROJECTION => self.projection_location,
            UNIFORM_USE_LIGHTING => self.use_lighting_location,
            UNIFORM_HAS_TEXTURE => self.has_texture_location,
            _ => gl::get_uniform_location(self.program, name),
        }
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        gl::call!(gl::DeleteProgram(self.program));
    }
}
