//! Fits a set of meshes into the [-1, 1] cube around the origin.

use glam::{DVec3, Vec3};

use crate::model::ModelError;

/// What [`normalize`] did to the positions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalization {
    /// Mean of all positions before normalizing.
    pub centroid: Vec3,
    /// Largest absolute coordinate after centering, before scaling.
    pub radius: f32,
}

/// Arithmetic mean of every position of every mesh, or None if there are no
/// positions at all.
pub fn centroid(meshes: &[Vec<Vec3>]) -> Option<Vec3> {
    let count: usize = meshes.iter().map(Vec::len).sum();
    if count == 0 {
        return None;
    }
    let sum: DVec3 = meshes
        .iter()
        .flatten()
        .fold(DVec3::ZERO, |sum, position| sum + position.as_dvec3());
    Some((sum / count as f64).as_vec3())
}

/// Centers the meshes on their common centroid, then scales them uniformly so
/// that the largest absolute coordinate is 1.
///
/// The scale depends on the centered positions, so this makes two passes
/// over the data.
pub fn normalize(meshes: &mut [Vec<Vec3>]) -> Result<Normalization, ModelError> {
    let centroid = centroid(meshes).ok_or(ModelError::NoVertices)?;
    // Any NaN or infinite coordinate makes the centroid non-finite too.
    if !centroid.is_finite() {
        return Err(ModelError::NonFinite);
    }

    let mut radius = 0.0f32;
    for position in meshes.iter_mut().flatten() {
        *position -= centroid;
        if !position.is_finite() {
            return Err(ModelError::NonFinite);
        }
        radius = radius.max(position.abs().max_element());
    }
    if radius <= 0.0 {
        return Err(ModelError::DegenerateExtent);
    }

    let scale = 1.0 / radius;
    for position in meshes.iter_mut().flatten() {
        *position *= scale;
    }
    Ok(Normalization { centroid, radius })
}
