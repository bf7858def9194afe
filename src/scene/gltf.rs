use std::collections::HashMap;
use std::fs;
use std::path::Path;

use glam::{Vec2, Vec3};
use tinyjson::JsonValue;

use crate::scene::{
    finish, Face, ImportError, ImportFlags, ImportedScene, RawMaterial, RawMesh,
};

type JsonObject = HashMap<String, JsonValue>;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_CHUNK_JSON: u32 = 0x4E4F_534A;
const GLB_CHUNK_BIN: u32 = 0x004E_4942;

const MODE_TRIANGLES: usize = 4;
const MODE_TRIANGLE_STRIP: usize = 5;
const MODE_TRIANGLE_FAN: usize = 6;

/// glTF 2.0 importer, for `.gltf` files with external buffers and for `.glb`
/// containers. Node transforms are not applied: every primitive of every
/// mesh becomes one [`RawMesh`] in its own coordinates.
#[derive(Default)]
pub struct GltfImporter;

impl GltfImporter {
    pub fn import(&self, path: &Path, flags: ImportFlags) -> Result<ImportedScene, ImportError> {
        log::info!("Loading glTF file: {}", path.display());
        let file = fs::read(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let (json, bin) = if file.starts_with(GLB_MAGIC) {
            let (json, bin) = split_glb(&file)?;
            (json, Some(bin))
        } else {
            (file.as_slice(), None)
        };
        let json = std::str::from_utf8(json).map_err(|err| invalid(err.to_string()))?;
        let gltf: JsonValue = json.parse().map_err(|err| invalid(format!("{err}")))?;
        let gltf = as_object(&gltf, "document")?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let buffers = load_buffers(gltf, base_dir, bin)?;
        let document = Document {
            accessors: array_field(gltf, "accessors")?,
            buffer_views: array_field(gltf, "bufferViews")?,
            buffers,
        };

        let mut materials = array_field(gltf, "materials")?
            .iter()
            .enumerate()
            .map(|(i, material)| convert_material(gltf, i, material))
            .collect::<Result<Vec<_>, _>>()?;

        let mut default_material = None;
        let mut meshes = Vec::new();
        for (mesh_index, mesh) in array_field(gltf, "meshes")?.iter().enumerate() {
            let mesh = as_object(mesh, "mesh")?;
            let mesh_name = match mesh.get("name").and_then(|name| name.get::<String>()) {
                Some(name) => name.clone(),
                None => format!("mesh{mesh_index}"),
            };
            for (primitive_index, primitive) in array_field(mesh, "primitives")?.iter().enumerate()
            {
                let primitive = as_object(primitive, "primitive")?;
                let name = format!("{mesh_name}#{primitive_index}");
                let material_index = match optional_usize(primitive, "material")? {
                    Some(index) if index < materials.len() => index,
                    _ => *default_material.get_or_insert_with(|| {
                        materials.push(RawMaterial::default());
                        materials.len() - 1
                    }),
                };
                match document.convert_primitive(primitive, name, material_index)? {
                    Some(mesh) => meshes.push(mesh),
                    None => continue,
                }
            }
        }

        finish(ImportedScene { meshes, materials }, flags)
    }
}

/// Splits a binary glTF container into its JSON and BIN chunks.
fn split_glb(file: &[u8]) -> Result<(&[u8], &[u8]), ImportError> {
    let read_u32 = |offset: usize| -> Result<u32, ImportError> {
        file.get(offset..offset + 4)
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .ok_or_else(|| invalid("truncated GLB container"))
    };
    let version = read_u32(4)?;
    if version != 2 {
        return Err(ImportError::Unsupported(format!("GLB version {version}")));
    }
    let length = (read_u32(8)? as usize).min(file.len());
    let mut offset = 12;
    let mut json = None;
    let mut bin: &[u8] = &[];
    while offset + 8 <= length {
        let chunk_length = read_u32(offset)? as usize;
        let chunk_type = read_u32(offset + 4)?;
        let data = file
            .get(offset + 8..offset + 8 + chunk_length)
            .ok_or_else(|| invalid("truncated GLB chunk"))?;
        match chunk_type {
            GLB_CHUNK_JSON if json.is_none() => json = Some(data),
            GLB_CHUNK_BIN if bin.is_empty() => bin = data,
            _ => {}
        }
        offset += 8 + chunk_length;
    }
    let json = json.ok_or_else(|| invalid("GLB container has no JSON chunk"))?;
    Ok((json, bin))
}

fn load_buffers(
    gltf: &JsonObject,
    base_dir: &Path,
    bin: Option<&[u8]>,
) -> Result<Vec<Vec<u8>>, ImportError> {
    let mut buffers = Vec::new();
    for (i, buffer) in array_field(gltf, "buffers")?.iter().enumerate() {
        let buffer = as_object(buffer, "buffer")?;
        let byte_length = take_usize(field(buffer, "byteLength")?)?;
        let data = match buffer.get("uri").and_then(|uri| uri.get::<String>()) {
            Some(uri) if uri.starts_with("data:") => {
                return Err(ImportError::Unsupported(format!(
                    "buffer {i} is embedded as a data URI"
                )));
            }
            Some(uri) => {
                let path = base_dir.join(uri);
                fs::read(&path).map_err(|source| ImportError::Io { path, source })?
            }
            // The BIN chunk of GLBs
            None if i == 0 && bin.is_some() => bin.unwrap_or_default().to_vec(),
            None => return Err(invalid(format!("buffer {i} has no uri"))),
        };
        if data.len() < byte_length {
            return Err(invalid(format!(
                "buffer {i} is {} bytes, expected {byte_length}",
                data.len()
            )));
        }
        buffers.push(data);
    }
    Ok(buffers)
}

fn convert_material(
    gltf: &JsonObject,
    index: usize,
    material: &JsonValue,
) -> Result<RawMaterial, ImportError> {
    let material = as_object(material, "material")?;
    let name = match material.get("name").and_then(|name| name.get::<String>()) {
        Some(name) => name.clone(),
        None => format!("material{index}"),
    };
    let Some(pbr) = material.get("pbrMetallicRoughness") else {
        return Ok(RawMaterial {
            name,
            diffuse_texture: None,
            diffuse_color: Vec3::ONE,
        });
    };
    let pbr = as_object(pbr, "pbrMetallicRoughness")?;
    let diffuse_color = match pbr.get("baseColorFactor") {
        Some(factor) => take_vec3(factor)?,
        None => Vec3::ONE,
    };
    let diffuse_texture = match pbr.get("baseColorTexture") {
        Some(texture_info) => {
            let texture_index = take_usize(field(as_object(texture_info, "textureInfo")?, "index")?)?;
            image_uri(gltf, texture_index)?
        }
        None => None,
    };
    Ok(RawMaterial {
        name,
        diffuse_texture,
        diffuse_color,
    })
}

/// Returns the uri of the image behind the texture, if it refers to a file.
fn image_uri(gltf: &JsonObject, texture_index: usize) -> Result<Option<String>, ImportError> {
    let texture = array_field(gltf, "textures")?
        .get(texture_index)
        .ok_or_else(|| invalid(format!("texture {texture_index} does not exist")))?;
    let Some(source) = optional_usize(as_object(texture, "texture")?, "source")? else {
        return Ok(None);
    };
    let image = array_field(gltf, "images")?
        .get(source)
        .ok_or_else(|| invalid(format!("image {source} does not exist")))?;
    match as_object(image, "image")?
        .get("uri")
        .and_then(|uri| uri.get::<String>())
    {
        Some(uri) if !uri.starts_with("data:") => Ok(Some(uri.clone())),
        _ => {
            log::warn!("image {source} is embedded in the glTF, which is not supported");
            Ok(None)
        }
    }
}

struct Document<'a> {
    accessors: &'a [JsonValue],
    buffer_views: &'a [JsonValue],
    buffers: Vec<Vec<u8>>,
}

impl Document<'_> {
    fn convert_primitive(
        &self,
        primitive: &JsonObject,
        name: String,
        material_index: usize,
    ) -> Result<Option<RawMesh>, ImportError> {
        let mode = optional_usize(primitive, "mode")?.unwrap_or(MODE_TRIANGLES);
        if !matches!(mode, MODE_TRIANGLES | MODE_TRIANGLE_STRIP | MODE_TRIANGLE_FAN) {
            log::warn!("skipping primitive {name}: mode {mode} is not made of triangles");
            return Ok(None);
        }
        let attributes = as_object(field(primitive, "attributes")?, "attributes")?;
        let position_accessor = take_usize(field(attributes, "POSITION")?)?;
        let positions: Vec<Vec3> = self
            .read_floats(position_accessor, 3)?
            .chunks_exact(3)
            .map(Vec3::from_slice)
            .collect();
        let normals = match attributes.get("NORMAL") {
            Some(accessor) => Some(
                self.read_floats(take_usize(accessor)?, 3)?
                    .chunks_exact(3)
                    .map(Vec3::from_slice)
                    .collect::<Vec<_>>(),
            ),
            None => None,
        };
        // glTF puts the uv origin at the top left. Convert to the bottom-left
        // origin every importer produces, which flip_uvs then undoes.
        let uvs = match attributes.get("TEXCOORD_0") {
            Some(accessor) => Some(
                self.read_floats(take_usize(accessor)?, 2)?
                    .chunks_exact(2)
                    .map(|uv| Vec2::new(uv[0], 1.0 - uv[1]))
                    .collect::<Vec<_>>(),
            ),
            None => None,
        };

        let indices = match optional_usize(primitive, "indices")? {
            Some(accessor) => self.read_indices(accessor)?,
            None => (0..positions.len() as u32).collect(),
        };
        let faces = match mode {
            MODE_TRIANGLE_STRIP => (0..indices.len().saturating_sub(2))
                .map(|i| {
                    if i % 2 == 0 {
                        Face::new([indices[i], indices[i + 1], indices[i + 2]])
                    } else {
                        Face::new([indices[i + 1], indices[i], indices[i + 2]])
                    }
                })
                .collect(),
            MODE_TRIANGLE_FAN => (1..indices.len().saturating_sub(1))
                .map(|i| Face::new([indices[0], indices[i], indices[i + 1]]))
                .collect(),
            _ => indices.chunks(3).map(Face::new).collect(),
        };

        Ok(Some(RawMesh {
            name,
            normals: normals.filter(|normals| normals.len() == positions.len()),
            uvs: uvs.filter(|uvs| uvs.len() == positions.len()),
            positions,
            faces,
            material_index,
        }))
    }

    /// Reads a float vector accessor with `components` components per element
    /// into a flat list, converting (normalized) integer components to float.
    fn read_floats(&self, accessor: usize, components: usize) -> Result<Vec<f32>, ImportError> {
        let view = self.accessor(accessor)?;
        if view.components != components {
            return Err(invalid(format!(
                "accessor {accessor} has {} components, expected {components}",
                view.components
            )));
        }
        view.read(|bytes| {
            let value = match (view.component_type, view.normalized) {
                (5126, _) => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                (5121, true) => bytes[0] as f32 / 255.0,
                (5121, false) => bytes[0] as f32,
                (5123, true) => u16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 65535.0,
                (5123, false) => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
                (5120, true) => (bytes[0] as i8 as f32 / 127.0).max(-1.0),
                (5120, false) => bytes[0] as i8 as f32,
                (5122, true) => (i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32767.0).max(-1.0),
                (5122, false) => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
                _ => return Err(()),
            };
            Ok(value)
        })
        .map_err(|()| invalid(format!("accessor {accessor} has an unsupported component type")))
    }

    fn read_indices(&self, accessor: usize) -> Result<Vec<u32>, ImportError> {
        let view = self.accessor(accessor)?;
        if view.components != 1 {
            return Err(invalid(format!("index accessor {accessor} is not SCALAR")));
        }
        view.read(|bytes| match view.component_type {
            5121 => Ok(bytes[0] as u32),
            5123 => Ok(u16::from_le_bytes([bytes[0], bytes[1]]) as u32),
            5125 => Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            _ => Err(()),
        })
        .map_err(|()| invalid(format!("index accessor {accessor} has an unsupported component type")))
    }

    fn accessor(&self, index: usize) -> Result<AccessorView<'_>, ImportError> {
        let accessor = self
            .accessors
            .get(index)
            .ok_or_else(|| invalid(format!("accessor {index} does not exist")))?;
        let accessor = as_object(accessor, "accessor")?;
        let count = take_usize(field(accessor, "count")?)?;
        let component_type = take_usize(field(accessor, "componentType")?)?;
        let component_size = match component_type {
            5120 | 5121 => 1,
            5122 | 5123 => 2,
            5125 | 5126 => 4,
            other => return Err(invalid(format!("unknown component type {other}"))),
        };
        let type_ = field(accessor, "type")?
            .get::<String>()
            .ok_or_else(|| invalid("accessor type is not a string"))?;
        let components = match type_.as_str() {
            "SCALAR" => 1,
            "VEC2" => 2,
            "VEC3" => 3,
            "VEC4" => 4,
            other => return Err(ImportError::Unsupported(format!("accessor type {other}"))),
        };
        let normalized = accessor
            .get("normalized")
            .and_then(|normalized| normalized.get::<bool>())
            .copied()
            .unwrap_or(false);
        let element_size = component_size * components;
        let too_large = || invalid(format!("accessor {index} is too large"));
        let byte_size = count.checked_mul(element_size).ok_or_else(too_large)?;

        let Some(view_index) = optional_usize(accessor, "bufferView")? else {
            // No buffer view means all zeros. Such an accessor can't describe
            // more data than the file carries.
            let buffer_bytes: usize = self.buffers.iter().map(Vec::len).sum();
            if byte_size > buffer_bytes {
                return Err(too_large());
            }
            return Ok(AccessorView {
                data: &[],
                offset: 0,
                stride: element_size,
                count,
                components,
                component_size,
                component_type,
                normalized,
                zeroed: true,
            });
        };
        let view = self
            .buffer_views
            .get(view_index)
            .ok_or_else(|| invalid(format!("buffer view {view_index} does not exist")))?;
        let view = as_object(view, "bufferView")?;
        let buffer_index = take_usize(field(view, "buffer")?)?;
        let buffer = self
            .buffers
            .get(buffer_index)
            .ok_or_else(|| invalid(format!("buffer {buffer_index} does not exist")))?;
        let view_offset = optional_usize(view, "byteOffset")?.unwrap_or(0);
        let view_length = take_usize(field(view, "byteLength")?)?;
        let data = view_offset
            .checked_add(view_length)
            .and_then(|view_end| buffer.get(view_offset..view_end))
            .ok_or_else(|| invalid(format!("buffer view {view_index} is out of bounds")))?;
        let stride = optional_usize(view, "byteStride")?.unwrap_or(element_size);
        if stride < element_size {
            return Err(invalid(format!(
                "buffer view {view_index} has a stride smaller than accessor {index}'s elements"
            )));
        }
        let offset = optional_usize(accessor, "byteOffset")?.unwrap_or(0);
        if count > 0 {
            let end = stride
                .checked_mul(count - 1)
                .and_then(|last| last.checked_add(offset))
                .and_then(|last| last.checked_add(element_size));
            if !matches!(end, Some(end) if end <= data.len()) {
                return Err(invalid(format!("accessor {index} is out of bounds")));
            }
        }
        Ok(AccessorView {
            data,
            offset,
            stride,
            count,
            components,
            component_size,
            component_type,
            normalized,
            zeroed: false,
        })
    }
}

struct AccessorView<'a> {
    data: &'a [u8],
    offset: usize,
    stride: usize,
    count: usize,
    components: usize,
    component_size: usize,
    component_type: usize,
    normalized: bool,
    zeroed: bool,
}

impl AccessorView<'_> {
    /// Converts every component with `convert`, which is given exactly
    /// `component_size` bytes.
    fn read<T: Default + Clone>(
        &self,
        convert: impl Fn(&[u8]) -> Result<T, ()>,
    ) -> Result<Vec<T>, ()> {
        // Document::accessor checked count and stride against the buffers.
        if self.zeroed {
            return Ok(vec![T::default(); self.count * self.components]);
        }
        let mut values = Vec::with_capacity(self.count * self.components);
        for element in 0..self.count {
            let start = self.offset + element * self.stride;
            for component in 0..self.components {
                let at = start + component * self.component_size;
                values.push(convert(&self.data[at..at + self.component_size])?);
            }
        }
        Ok(values)
    }
}

fn invalid(message: impl Into<String>) -> ImportError {
    ImportError::Gltf(message.into())
}

fn as_object<'a>(value: &'a JsonValue, what: &str) -> Result<&'a JsonObject, ImportError> {
    value
        .get::<JsonObject>()
        .ok_or_else(|| invalid(format!("{what} is not an object")))
}

fn field<'a>(object: &'a JsonObject, key: &str) -> Result<&'a JsonValue, ImportError> {
    object
        .get(key)
        .ok_or_else(|| invalid(format!("\"{key}\" is missing")))
}

/// Returns the array under `key`, or an empty slice if there is none.
fn array_field<'a>(object: &'a JsonObject, key: &str) -> Result<&'a [JsonValue], ImportError> {
    match object.get(key) {
        Some(value) => value
            .get::<Vec<JsonValue>>()
            .map(Vec::as_slice)
            .ok_or_else(|| invalid(format!("\"{key}\" is not an array"))),
        None => Ok(&[]),
    }
}

fn optional_usize(object: &JsonObject, key: &str) -> Result<Option<usize>, ImportError> {
    object.get(key).map(take_usize).transpose()
}

/// Return usize if JsonValue is a non-negative whole number.
fn take_usize(json_value: &JsonValue) -> Result<usize, ImportError> {
    match json_value.get::<f64>() {
        Some(&number) if number >= 0.0 && number.fract() == 0.0 => Ok(number as usize),
        _ => Err(invalid("expected a non-negative integer")),
    }
}

/// Return the first three numbers of a JsonValue array as a Vec3.
fn take_vec3(json_value: &JsonValue) -> Result<Vec3, ImportError> {
    let values = json_value
        .get::<Vec<JsonValue>>()
        .filter(|values| values.len() >= 3)
        .ok_or_else(|| invalid("expected an array of at least 3 numbers"))?;
    let mut vector = [0.0; 3];
    for (component, value) in vector.iter_mut().zip(values) {
        *component = *value
            .get::<f64>()
            .ok_or_else(|| invalid("expected a number"))? as f32;
    }
    Ok(Vec3::from(vector))
}
