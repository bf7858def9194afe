//! Loads polygon models, fits them into the unit cube and draws them with
//! OpenGL ES 3.0.

pub mod camera;
pub mod model;
pub mod renderer;
pub mod scene;
pub mod texture;

#[cfg(test)]
mod test_util;
