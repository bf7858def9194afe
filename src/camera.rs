use glam::{IVec3, Mat3, Mat4, Vec3};

use crate::renderer::FrameUniforms;

/// Distance moved per key press, in normalized model units.
pub const MOVE_STEP: f32 = 0.02;
/// Rotation per key press or drag event, in degrees.
pub const ROTATE_STEP: i32 = 2;

const NEAR: f32 = 0.1;
const FAR: f32 = 1e6;

/// The view of the model for one frame. Owned by the event loop and turned
/// into [`FrameUniforms`] right before drawing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub translation: Vec3,
    /// Rotation of the model around the X, Y and Z axes, in degrees.
    pub angles: IVec3,
    pub use_lighting: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Camera {
            translation: Vec3::new(0.0, 0.0, -2.0),
            angles: IVec3::ZERO,
            use_lighting: false,
        }
    }
}

impl Camera {
    /// Applies a key press. Returns false if the key does nothing.
    pub fn apply_key(&mut self, key: char) -> bool {
        match key.to_ascii_lowercase() {
            'f' => self.translation.z -= MOVE_STEP,
            'n' => self.translation.z += MOVE_STEP,
            'w' => self.translation.y += MOVE_STEP,
            's' => self.translation.y -= MOVE_STEP,
            'a' => self.translation.x -= MOVE_STEP,
            'd' => self.translation.x += MOVE_STEP,
            'q' => self.rotate(IVec3::Z * ROTATE_STEP),
            'e' => self.rotate(IVec3::Z * -ROTATE_STEP),
            'r' => self.reset(),
            'l' => self.use_lighting = !self.use_lighting,
            _ => return false,
        }
        true
    }

    /// Applies a mouse drag of (`dx`, `dy`) pixels. Only the dominant axis
    /// counts: horizontal drags spin around Y, vertical ones around X.
    pub fn apply_drag(&mut self, dx: i32, dy: i32) -> bool {
        if dx == 0 && dy == 0 {
            return false;
        }
        if dx.abs() > dy.abs() {
            self.rotate(IVec3::Y * ROTATE_STEP * dx.signum());
        } else {
            self.rotate(IVec3::X * ROTATE_STEP * dy.signum());
        }
        true
    }

    pub fn reset(&mut self) {
        *self = Camera::default();
    }

    fn rotate(&mut self, by: IVec3) {
        let angles = self.angles + by;
        self.angles = IVec3::new(
            angles.x.rem_euclid(360),
            angles.y.rem_euclid(360),
            angles.z.rem_euclid(360),
        );
    }

    pub fn model_matrix(&self) -> Mat4 {
        let radians = self.angles.as_vec3() * (std::f32::consts::PI / 180.0);
        Mat4::from_rotation_x(radians.x)
            * Mat4::from_rotation_y(radians.y)
            * Mat4::from_rotation_z(radians.z)
    }

    pub fn frame_uniforms(&self, aspect_ratio: f32, fov_degrees: f32) -> FrameUniforms {
        let model = self.model_matrix();
        let view = Mat4::from_translation(self.translation);
        FrameUniforms {
            position_matrix: view * model,
            normal_matrix: Mat3::from_mat4(model.inverse().transpose()),
            projection: Mat4::perspective_rh_gl(
                fov_degrees.to_radians(),
                aspect_ratio,
                NEAR,
                FAR,
            ),
            use_lighting: self.use_lighting,
        }
    }
}
