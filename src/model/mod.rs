//! A whole model file, normalized into the unit cube and uploaded to the GPU
//! as one [`MeshResource`] per mesh.

use std::path::Path;
use std::rc::Rc;

use glam::Vec3;
use thiserror::Error;

use crate::renderer::{FrameUniforms, GraphicsDevice, TextureHandle};
use crate::scene::{FileImporter, ImportError, ImportFlags, ImportedScene, RawMaterial, SceneImporter};
use crate::texture::decode_image;

mod mesh;
pub mod normalize;

pub use mesh::{MeshError, MeshGeometry, MeshResource};
pub use normalize::Normalization;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{0}")]
    Import(#[from] ImportError),
    #[error("The model has no vertices")]
    NoVertices,
    #[error("All vertices of the model are at the same point")]
    DegenerateExtent,
    #[error("The model has vertices with NaN or infinite coordinates")]
    NonFinite,
    #[error("Invalid vertices data")]
    NoValidMeshes,
}

pub struct Model<D: GraphicsDevice> {
    device: Rc<D>,
    meshes: Vec<MeshResource<D>>,
    /// One per material, [`TextureHandle::NONE`] where the material has no
    /// usable texture.
    material_textures: Vec<TextureHandle>,
    /// One per material.
    material_colors: Vec<Vec3>,
    normalization: Option<Normalization>,
    error_info: String,
}

impl<D: GraphicsDevice> Model<D> {
    /// Loads the model at `path`. Never fails: if loading does not succeed,
    /// the returned model is empty and [`Model::error_info`] says why.
    pub fn load(device: Rc<D>, path: impl AsRef<Path>) -> Model<D> {
        Model::load_with(device, &FileImporter::default(), path)
    }

    /// Like [`Model::load`], with a specific importer.
    pub fn load_with(
        device: Rc<D>,
        importer: &impl SceneImporter,
        path: impl AsRef<Path>,
    ) -> Model<D> {
        match Model::try_load_with(device.clone(), importer, path.as_ref()) {
            Ok(model) => model,
            Err(err) => {
                log::error!("Could not load {}: {err}", path.as_ref().display());
                Model::failed(device, err.to_string())
            }
        }
    }

    pub fn try_load(device: Rc<D>, path: impl AsRef<Path>) -> Result<Model<D>, ModelError> {
        Model::try_load_with(device, &FileImporter::default(), path)
    }

    pub fn try_load_with(
        device: Rc<D>,
        importer: &impl SceneImporter,
        path: impl AsRef<Path>,
    ) -> Result<Model<D>, ModelError> {
        let path = path.as_ref();
        let scene = importer.import(path, ImportFlags::VIEWER)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let model = Model::from_scene(device, &scene, base_dir)?;
        log::info!(
            "Loaded {}: {} meshes, {} textures",
            path.display(),
            model.meshes.len(),
            model.material_textures.iter().filter(|t| !t.is_none()).count(),
        );
        Ok(model)
    }

    /// Builds the model from an already imported scene. Texture paths are
    /// resolved relative to `base_dir`. `scene` itself is not modified.
    pub fn from_scene(
        device: Rc<D>,
        scene: &ImportedScene,
        base_dir: &Path,
    ) -> Result<Model<D>, ModelError> {
        // Owning the textures from here on means they are released on every
        // early return below.
        let mut model = Model::failed(device, String::new());
        for material in &scene.materials {
            let texture = model.load_texture(material, base_dir);
            model.material_textures.push(texture);
        }
        model.material_colors = scene
            .materials
            .iter()
            .map(|material| material.diffuse_color)
            .collect();

        let valid_meshes: Vec<_> = scene
            .meshes
            .iter()
            .filter(|mesh| {
                let validity = if mesh.material_index >= scene.materials.len() {
                    Err(MeshError::MaterialOutOfRange(mesh.material_index))
                } else {
                    MeshGeometry::validate(mesh)
                };
                match validity {
                    Ok(()) => true,
                    Err(err) => {
                        log::warn!("Skipping mesh \"{}\": {err}", mesh.name);
                        false
                    }
                }
            })
            .collect();
        if valid_meshes.is_empty() {
            return Err(ModelError::NoValidMeshes);
        }

        // Normalize a copy, so the imported scene stays as it was.
        let mut positions: Vec<_> = valid_meshes
            .iter()
            .map(|mesh| mesh.positions.clone())
            .collect();
        let normalization = normalize::normalize(&mut positions)?;
        log::debug!(
            "Centered on {} and scaled by 1/{}",
            normalization.centroid,
            normalization.radius
        );
        model.normalization = Some(normalization);

        for (mesh, positions) in valid_meshes.into_iter().zip(&positions) {
            let result = MeshResource::new(
                model.device.clone(),
                mesh,
                positions,
                model.material_textures[mesh.material_index],
                model.material_colors[mesh.material_index],
            );
            match result {
                Ok(resource) => model.meshes.push(resource),
                Err(err) => log::warn!("Skipping mesh \"{}\": {err}", mesh.name),
            }
        }
        if model.meshes.is_empty() {
            return Err(ModelError::NoValidMeshes);
        }
        Ok(model)
    }

    fn failed(device: Rc<D>, error_info: String) -> Model<D> {
        Model {
            device,
            meshes: Vec::new(),
            material_textures: Vec::new(),
            material_colors: Vec::new(),
            normalization: None,
            error_info,
        }
    }

    /// Decodes and uploads the material's diffuse texture. Any failure
    /// leaves the material untextured.
    fn load_texture(&self, material: &RawMaterial, base_dir: &Path) -> TextureHandle {
        let Some(texture_path) = &material.diffuse_texture else {
            return TextureHandle::NONE;
        };
        let image = match decode_image(&base_dir.join(texture_path)) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("Material \"{}\" will be untextured: {err}", material.name);
                return TextureHandle::NONE;
            }
        };
        match self.device.upload_texture(&image) {
            Ok(texture) => texture,
            Err(err) => {
                log::warn!(
                    "Material \"{}\" will be untextured: could not upload {texture_path}: {err}",
                    material.name
                );
                TextureHandle::NONE
            }
        }
    }

    /// Draws every mesh, in the order they appear in the file.
    pub fn draw(&self, program: &D::Program, frame: &FrameUniforms) {
        if self.is_empty() {
            return;
        }
        self.device.bind_frame(program, frame);
        for mesh in &self.meshes {
            mesh.draw(program);
        }
    }

    /// True if loading failed.
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Why loading failed, or an empty string.
    pub fn error_info(&self) -> &str {
        &self.error_info
    }

    pub fn meshes(&self) -> &[MeshResource<D>] {
        &self.meshes
    }

    pub fn material_textures(&self) -> &[TextureHandle] {
        &self.material_textures
    }

    pub fn material_colors(&self) -> &[Vec3] {
        &self.material_colors
    }

    pub fn normalization(&self) -> Option<Normalization> {
        self.normalization
    }
}

impl<D: GraphicsDevice> Drop for Model<D> {
    fn drop(&mut self) {
        self.meshes.clear();
        for &texture in &self.material_textures {
            self.device.release_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::recording::RecordingDevice;
    use crate::renderer::UNIFORM_HAS_TEXTURE;
    use crate::scene::{Face, RawMesh};
    use crate::test_util::scratch_dir;
    use glam::{Mat3, Mat4};
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::path::PathBuf;

    /// Hands out a prepared scene regardless of the path.
    struct SceneImporterStub(Result<ImportedScene, String>);

    impl SceneImporter for SceneImporterStub {
        fn import(&self, _: &Path, _: ImportFlags) -> Result<ImportedScene, ImportError> {
            self.0.clone().map_err(ImportError::Gltf)
        }
    }

    fn triangle(positions: [Vec3; 3], material_index: usize) -> RawMesh {
        RawMesh {
            name: "triangle".to_string(),
            positions: positions.to_vec(),
            normals: Some(vec![Vec3::Z; 3]),
            uvs: None,
            faces: vec![Face::new([0, 1, 2])],
            material_index,
        }
    }

    fn material(color: Vec3, texture: Option<&str>) -> RawMaterial {
        RawMaterial {
            name: "material".to_string(),
            diffuse_texture: texture.map(str::to_string),
            diffuse_color: color,
        }
    }

    fn frame() -> FrameUniforms {
        FrameUniforms {
            position_matrix: Mat4::IDENTITY,
            normal_matrix: Mat3::IDENTITY,
            projection: Mat4::IDENTITY,
            use_lighting: false,
        }
    }

    fn all_positions(model: &Model<RecordingDevice>) -> Vec<Vec3> {
        model
            .meshes()
            .iter()
            .flat_map(|mesh| mesh.geometry().positions.iter().copied())
            .collect()
    }

    fn write_green_triangle_obj(dir: &Path) -> PathBuf {
        fs::write(dir.join("tri.mtl"), "newmtl green\nKd 0 1 0\n").unwrap();
        let path = dir.join("tri.obj");
        fs::write(
            &path,
            "mtllib tri.mtl\nv 0 0 0\nv 2 0 0\nv 0 2 0\nusemtl green\nf 1 2 3\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn single_green_triangle_end_to_end() {
        let dir = scratch_dir("model-green-triangle");
        let path = write_green_triangle_obj(&dir);
        let device = Rc::new(RecordingDevice::default());

        let model = Model::load(device.clone(), &path);
        assert!(!model.is_empty(), "{}", model.error_info());
        assert_eq!(model.error_info(), "");
        assert_eq!(model.meshes().len(), 1);

        let normalization = model.normalization().unwrap();
        assert!((normalization.centroid - Vec3::new(2.0 / 3.0, 2.0 / 3.0, 0.0)).length() < 1e-6);
        assert!((normalization.radius - 4.0 / 3.0).abs() < 1e-6);

        let mesh = &model.meshes()[0];
        let expected = [
            Vec3::new(-0.5, -0.5, 0.0),
            Vec3::new(1.0, -0.5, 0.0),
            Vec3::new(-0.5, 1.0, 0.0),
        ];
        for (position, expected) in mesh.geometry().positions.iter().zip(expected) {
            assert!((*position - expected).length() < 1e-6, "{position}");
        }
        assert_eq!(mesh.geometry().colors, vec![Vec3::Y; 3]);
        assert!(!mesh.has_texture());
        assert!(device.textures.borrow().is_empty());
    }

    #[test]
    fn normalized_model_is_centered_in_the_unit_cube() {
        let scene = ImportedScene {
            meshes: vec![
                triangle(
                    [Vec3::new(5.0, 5.0, 5.0), Vec3::new(9.0, 5.0, 5.0), Vec3::new(5.0, 8.0, 5.0)],
                    0,
                ),
                triangle(
                    [Vec3::new(5.0, 5.0, 1.0), Vec3::new(6.0, 7.0, 2.0), Vec3::new(7.0, 5.0, 0.0)],
                    0,
                ),
            ],
            materials: vec![material(Vec3::ONE, None)],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::from_scene(device, &scene, Path::new("")).unwrap();

        let positions = all_positions(&model);
        let mean = positions.iter().copied().sum::<Vec3>() / positions.len() as f32;
        assert!(mean.length() < 1e-6, "{mean}");
        let max = positions
            .iter()
            .map(|p| p.abs().max_element())
            .fold(0.0, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn imported_scene_is_left_untouched() {
        let scene = ImportedScene {
            meshes: vec![triangle([Vec3::ZERO, Vec3::X * 4.0, Vec3::Y * 4.0], 0)],
            materials: vec![material(Vec3::ONE, None)],
        };
        let before = scene.clone();
        let device = Rc::new(RecordingDevice::default());
        let _model = Model::from_scene(device, &scene, Path::new("")).unwrap();
        assert_eq!(scene, before);
    }

    #[test]
    fn untextured_material_broadcasts_its_color() {
        let red = Vec3::new(1.0, 0.0, 0.0);
        let scene = ImportedScene {
            meshes: vec![
                triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0),
                triangle([Vec3::Z, Vec3::X, Vec3::Y], 1),
            ],
            materials: vec![material(red, None), material(Vec3::ONE, None)],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::from_scene(device, &scene, Path::new("")).unwrap();
        let mesh = &model.meshes()[0];
        assert!(!mesh.has_texture());
        assert_eq!(mesh.geometry().colors, vec![red; 3]);
        assert_eq!(model.meshes()[1].geometry().colors, vec![Vec3::ONE; 3]);
    }

    #[test]
    fn missing_texture_file_falls_back_to_color() {
        let dir = scratch_dir("model-missing-texture");
        let red = Vec3::new(1.0, 0.0, 0.0);
        let scene = ImportedScene {
            meshes: vec![triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0)],
            materials: vec![material(red, Some("does_not_exist.png"))],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::from_scene(device.clone(), &scene, &dir).unwrap();
        assert_eq!(model.material_textures(), &[TextureHandle::NONE]);
        let mesh = &model.meshes()[0];
        assert!(!mesh.has_texture());
        assert_eq!(mesh.geometry().colors, vec![red; 3]);
        assert!(device.textures.borrow().is_empty());
    }

    #[test]
    fn meshes_sharing_a_material_share_its_texture() {
        let dir = scratch_dir("model-shared-texture");
        RgbImage::from_pixel(4, 2, Rgb([10, 20, 30]))
            .save(dir.join("checker.png"))
            .unwrap();
        let scene = ImportedScene {
            meshes: vec![
                triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0),
                triangle([Vec3::Z, Vec3::X, Vec3::Y], 0),
                triangle([Vec3::Z, Vec3::X, -Vec3::Y], 1),
            ],
            materials: vec![
                material(Vec3::ONE, Some("checker.png")),
                material(Vec3::X, None),
            ],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::from_scene(device.clone(), &scene, &dir).unwrap();

        let textures = device.textures.borrow().clone();
        assert_eq!(textures.len(), 1);
        let (texture, width, height, channels) = textures[0];
        assert_eq!((width, height, channels), (4, 2, 3));
        assert_eq!(model.material_textures(), &[texture, TextureHandle::NONE]);
        assert_eq!(model.meshes()[0].texture(), texture);
        assert_eq!(model.meshes()[1].texture(), texture);
        assert!(model.meshes()[1].has_texture());
        assert!(!model.meshes()[2].has_texture());

        model.draw(&(), &frame());
        let draws = device.draws.borrow();
        let flags: Vec<_> = draws.iter().map(|draw| draw.has_texture).collect();
        assert_eq!(flags, [Some(true), Some(true), Some(false)]);
        assert_eq!(draws[2].texture, TextureHandle::NONE);
    }

    #[test]
    fn mesh_with_out_of_range_indices_is_dropped() {
        let mut broken = triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0);
        broken.faces.push(Face::new([0, 1, 7]));
        let scene = ImportedScene {
            meshes: vec![broken, triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0)],
            materials: vec![material(Vec3::ONE, None)],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::from_scene(device.clone(), &scene, Path::new("")).unwrap();
        assert!(!model.is_empty());
        assert_eq!(model.meshes().len(), 1);
        assert_eq!(device.meshes.borrow().len(), 1);
    }

    #[test]
    fn mesh_with_unknown_material_is_dropped() {
        let scene = ImportedScene {
            meshes: vec![
                triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 3),
                triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0),
            ],
            materials: vec![material(Vec3::ONE, None)],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::from_scene(device, &scene, Path::new("")).unwrap();
        assert_eq!(model.meshes().len(), 1);
    }

    #[test]
    fn no_valid_meshes_is_invalid_vertices_data() {
        let mut broken = triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0);
        broken.faces = vec![Face::new([0, 1, 9])];
        let scene = ImportedScene {
            meshes: vec![broken],
            materials: vec![material(Vec3::ONE, None)],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::load_with(device.clone(), &SceneImporterStub(Ok(scene)), "scene.obj");
        assert!(model.is_empty());
        assert_eq!(model.error_info(), "Invalid vertices data");
        model.draw(&(), &frame());
        assert!(device.draws.borrow().is_empty());
        assert!(device.frames.borrow().is_empty());
    }

    #[test]
    fn failed_uploads_drop_only_that_mesh() {
        let scene = ImportedScene {
            meshes: vec![
                triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0),
                triangle([Vec3::Z, Vec3::X, Vec3::Y], 0),
            ],
            materials: vec![material(Vec3::ONE, None)],
        };
        let device = Rc::new(RecordingDevice::default());
        device.mesh_upload_limit.set(Some(1));
        let model = Model::from_scene(device, &scene, Path::new("")).unwrap();
        assert_eq!(model.meshes().len(), 1);
    }

    #[test]
    fn importer_errors_become_error_info() {
        let device = Rc::new(RecordingDevice::default());
        let importer = SceneImporterStub(Err("unexpected end of file".to_string()));
        let model = Model::load_with(device, &importer, "broken.gltf");
        assert!(model.is_empty());
        assert_eq!(model.error_info(), "invalid glTF: unexpected end of file");
    }

    #[test]
    fn missing_model_file_is_reported() {
        let dir = scratch_dir("model-missing-file");
        let device = Rc::new(RecordingDevice::default());
        let model = Model::load(device, dir.join("absent.obj"));
        assert!(model.is_empty());
        assert!(!model.error_info().is_empty());
    }

    #[test]
    fn degenerate_model_is_rejected() {
        let point = Vec3::splat(2.0);
        let scene = ImportedScene {
            meshes: vec![triangle([point; 3], 0)],
            materials: vec![material(Vec3::ONE, None)],
        };
        let device = Rc::new(RecordingDevice::default());
        let result = Model::from_scene(device.clone(), &scene, Path::new(""));
        assert!(matches!(result, Err(ModelError::DegenerateExtent)));
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn non_finite_coordinates_in_a_file_are_rejected() {
        let dir = scratch_dir("model-non-finite");
        let device = Rc::new(RecordingDevice::default());
        for (name, first_vertex) in [("nan.obj", "v 0 0 nan"), ("huge.obj", "v 1e39 0 0")] {
            let path = dir.join(name);
            fs::write(&path, format!("{first_vertex}\nv 2 0 0\nv 0 2 0\nf 1 2 3\n")).unwrap();
            let model = Model::load(device.clone(), &path);
            assert!(model.is_empty(), "{name} loaded");
            assert_eq!(
                model.error_info(),
                "The model has vertices with NaN or infinite coordinates"
            );
        }
        assert!(device.meshes.borrow().is_empty());
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn loading_twice_gives_identical_geometry() {
        let dir = scratch_dir("model-deterministic");
        let path = write_green_triangle_obj(&dir);
        let device = Rc::new(RecordingDevice::default());
        let first = Model::load(device.clone(), &path);
        let second = Model::load(device, &path);
        let bits = |model: &Model<RecordingDevice>| -> Vec<[u32; 3]> {
            all_positions(model)
                .iter()
                .map(|p| p.to_array().map(f32::to_bits))
                .collect()
        };
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn draw_binds_the_frame_then_draws_meshes_in_order() {
        let scene = ImportedScene {
            meshes: vec![
                triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0),
                triangle([Vec3::Z, Vec3::X, Vec3::Y], 0),
            ],
            materials: vec![material(Vec3::ONE, None)],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::from_scene(device.clone(), &scene, Path::new("")).unwrap();
        let frame = FrameUniforms {
            use_lighting: true,
            ..frame()
        };
        model.draw(&(), &frame);

        assert_eq!(*device.frames.borrow(), vec![frame]);
        let vaos: Vec<u32> = device.draws.borrow().iter().map(|draw| draw.vao).collect();
        let expected: Vec<u32> = model.meshes().iter().map(|mesh| mesh.buffers().vao).collect();
        assert_eq!(vaos, expected);
        assert!(device
            .flags
            .borrow()
            .iter()
            .all(|(name, value)| name == UNIFORM_HAS_TEXTURE && !value));
    }

    #[test]
    fn dropping_the_model_releases_everything() {
        let dir = scratch_dir("model-release");
        RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]))
            .save(dir.join("black.png"))
            .unwrap();
        let scene = ImportedScene {
            meshes: vec![
                triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0),
                triangle([Vec3::Z, Vec3::X, Vec3::Y], 1),
            ],
            materials: vec![
                material(Vec3::ONE, Some("black.png")),
                material(Vec3::ONE, None),
            ],
        };
        let device = Rc::new(RecordingDevice::default());
        let model = Model::from_scene(device.clone(), &scene, &dir).unwrap();
        assert_eq!(device.live_count(), 2 * 3 + 1);
        let texture = model.material_textures()[0];
        let mesh_handles: Vec<u32> = model
            .meshes()
            .iter()
            .flat_map(|mesh| {
                let buffers = mesh.buffers();
                [buffers.vao, buffers.vbo, buffers.ibo]
            })
            .collect();
        drop(model);
        assert_eq!(device.live_count(), 0);
        // Meshes go first, the texture they sample last.
        let mut expected = mesh_handles;
        expected.push(texture.0);
        assert_eq!(*device.released.borrow(), expected);
    }

    #[test]
    fn failed_construction_releases_textures() {
        let dir = scratch_dir("model-release-on-failure");
        RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]))
            .save(dir.join("black.png"))
            .unwrap();
        let scene = ImportedScene {
            meshes: vec![RawMesh {
                faces: vec![],
                ..triangle([Vec3::ZERO, Vec3::X, Vec3::Y], 0)
            }],
            materials: vec![material(Vec3::ONE, Some("black.png"))],
        };
        let device = Rc::new(RecordingDevice::default());
        let result = Model::from_scene(device.clone(), &scene, &dir);
        assert!(matches!(result, Err(ModelError::NoValidMeshes)));
        assert_eq!(device.textures.borrow().len(), 1);
        assert_eq!(device.live_count(), 0);
    }
}
