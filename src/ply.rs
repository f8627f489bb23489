//! PLY (Polygon File Format) reading and writing for mesh records.
//!
//! Reading goes through `ply-rs` and therefore accepts ASCII, binary
//! little-endian and binary big-endian files. Writing always produces binary
//! little-endian output.
//!
//! # Supported Properties
//!
//! - `vertex`: `x y z` (required), `nx ny nz`, `red green blue [alpha]`
//! - `face`: `vertex_indices` (or `vertex_index`), `texcoord` (6 floats per face)

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use thiserror::Error;

use crate::mesh::MeshRecord;

/// Errors from the PLY codec.
#[derive(Debug, Error)]
pub enum MeshIoError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid file content: {message}")]
    InvalidContent { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshIoError {
    #[must_use]
    pub fn invalid_content(message: impl Into<String>) -> Self {
        Self::InvalidContent {
            message: message.into(),
        }
    }
}

pub type MeshIoResult<T> = Result<T, MeshIoError>;

/// Load a mesh record from a PLY file.
///
/// The file handle lives only for the duration of this call.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, the header or payload is
/// malformed, a vertex lacks `x`/`y`/`z`, an optional attribute is present on
/// some vertices only, or a face is not a triangle.
pub fn read_ply<P: AsRef<Path>>(path: P) -> MeshIoResult<MeshRecord> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MeshIoError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            MeshIoError::Io(e)
        }
    })?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<DefaultElement>::new();
    let header = parser
        .read_header(&mut reader)
        .map_err(|e| MeshIoError::invalid_content(format!("failed to parse PLY header: {e}")))?;
    let payload = parser
        .read_payload(&mut reader, &header)
        .map_err(|e| MeshIoError::invalid_content(format!("failed to read PLY payload: {e}")))?;

    let mut mesh = MeshRecord::new();

    if let Some(vertex_elements) = payload.get("vertex") {
        read_vertices(vertex_elements, &mut mesh)?;
    }
    if let Some(face_elements) = payload.get("face") {
        read_faces(face_elements, &mut mesh)?;
    }

    Ok(mesh)
}

fn read_vertices(elements: &[DefaultElement], mesh: &mut MeshRecord) -> MeshIoResult<()> {
    let Some(first) = elements.first() else {
        return Ok(());
    };
    let has_normals = first.contains_key("nx");
    let has_colors = first.contains_key("red");

    mesh.positions.reserve(elements.len());
    for (i, element) in elements.iter().enumerate() {
        mesh.positions
            .push(read_triple(element, ["x", "y", "z"]).ok_or_else(|| {
                MeshIoError::invalid_content(format!("vertex {i} is missing x/y/z"))
            })?);
        if has_normals {
            mesh.normals
                .push(read_triple(element, ["nx", "ny", "nz"]).ok_or_else(|| {
                    MeshIoError::invalid_content(format!("vertex {i} is missing nx/ny/nz"))
                })?);
        }
        if has_colors {
            mesh.colors.push(read_color(element).ok_or_else(|| {
                MeshIoError::invalid_content(format!("vertex {i} is missing red/green/blue"))
            })?);
        }
    }
    Ok(())
}

fn read_faces(elements: &[DefaultElement], mesh: &mut MeshRecord) -> MeshIoResult<()> {
    let Some(first) = elements.first() else {
        return Ok(());
    };
    let has_indices = first.contains_key("vertex_indices") || first.contains_key("vertex_index");
    let has_texcoords = first.contains_key("texcoord");

    for (i, element) in elements.iter().enumerate() {
        if has_indices {
            let indices = get_index_list(element);
            let triangle: [u32; 3] = indices.try_into().map_err(|v: Vec<u32>| {
                MeshIoError::invalid_content(format!(
                    "face {i} has {} vertices, only triangles are supported",
                    v.len()
                ))
            })?;
            mesh.faces.push(triangle);
        }
        if has_texcoords {
            let coords = get_float_list(element, "texcoord");
            let corners: [f32; 6] = coords.try_into().map_err(|v: Vec<f32>| {
                MeshIoError::invalid_content(format!(
                    "face {i} has {} texture coordinates, expected 6",
                    v.len()
                ))
            })?;
            mesh.texcoords.push(corners);
        }
    }
    Ok(())
}

fn get_float_property(element: &DefaultElement, key: &str) -> Option<f32> {
    match element.get(key)? {
        Property::Float(v) => Some(*v),
        #[allow(clippy::cast_possible_truncation)]
        Property::Double(v) => Some(*v as f32),
        _ => None,
    }
}

fn read_triple(element: &DefaultElement, keys: [&str; 3]) -> Option<[f32; 3]> {
    Some([
        get_float_property(element, keys[0])?,
        get_float_property(element, keys[1])?,
        get_float_property(element, keys[2])?,
    ])
}

fn get_uchar_property(element: &DefaultElement, key: &str) -> Option<u8> {
    match element.get(key)? {
        Property::UChar(v) => Some(*v),
        _ => None,
    }
}

fn read_color(element: &DefaultElement) -> Option<[u8; 4]> {
    Some([
        get_uchar_property(element, "red")?,
        get_uchar_property(element, "green")?,
        get_uchar_property(element, "blue")?,
        // opaque when the file carries RGB only
        get_uchar_property(element, "alpha").unwrap_or(u8::MAX),
    ])
}

fn get_index_list(element: &DefaultElement) -> Vec<u32> {
    for key in &["vertex_indices", "vertex_index"] {
        if let Some(prop) = element.get(*key) {
            return match prop {
                #[allow(clippy::cast_sign_loss)]
                Property::ListInt(v) => v.iter().map(|&i| i as u32).collect(),
                Property::ListUInt(v) => v.clone(),
                Property::ListUChar(v) => v.iter().map(|&i| u32::from(i)).collect(),
                Property::ListUShort(v) => v.iter().map(|&i| u32::from(i)).collect(),
                #[allow(clippy::cast_sign_loss)]
                Property::ListShort(v) => v.iter().map(|&i| i as u32).collect(),
                _ => continue,
            };
        }
    }
    Vec::new()
}

fn get_float_list(element: &DefaultElement, key: &str) -> Vec<f32> {
    match element.get(key) {
        Some(Property::ListFloat(v)) => v.clone(),
        #[allow(clippy::cast_possible_truncation)]
        Some(Property::ListDouble(v)) => v.iter().map(|&x| x as f32).collect(),
        _ => Vec::new(),
    }
}

/// Save a mesh record as binary little-endian PLY.
///
/// Attribute arrays that are empty are left out of the header and payload.
/// A `face` element is written when faces or texture coordinates are present.
///
/// # Errors
///
/// Returns an error if the attribute arrays have inconsistent lengths or the
/// file cannot be written.
pub fn write_ply<P: AsRef<Path>>(path: P, mesh: &MeshRecord) -> MeshIoResult<()> {
    check_lengths(mesh)?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_ply_binary(mesh, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn check_lengths(mesh: &MeshRecord) -> MeshIoResult<()> {
    let n = mesh.positions.len();
    if !mesh.normals.is_empty() && mesh.normals.len() != n {
        return Err(MeshIoError::invalid_content(format!(
            "{} normals for {n} vertices",
            mesh.normals.len()
        )));
    }
    if !mesh.colors.is_empty() && mesh.colors.len() != n {
        return Err(MeshIoError::invalid_content(format!(
            "{} colors for {n} vertices",
            mesh.colors.len()
        )));
    }
    if !mesh.faces.is_empty()
        && !mesh.texcoords.is_empty()
        && mesh.faces.len() != mesh.texcoords.len()
    {
        return Err(MeshIoError::invalid_content(format!(
            "{} texture coordinate sets for {} faces",
            mesh.texcoords.len(),
            mesh.faces.len()
        )));
    }
    Ok(())
}

/// Binary list properties are written by hand: `ply-rs` writes the element
/// count where the list length belongs.
fn write_ply_binary<W: Write>(mesh: &MeshRecord, writer: &mut W) -> MeshIoResult<()> {
    let face_count = mesh.faces.len().max(mesh.texcoords.len());

    writeln!(writer, "ply")?;
    writeln!(writer, "format binary_little_endian 1.0")?;
    writeln!(writer, "comment Generated by shape_pca")?;
    writeln!(writer, "element vertex {}", mesh.positions.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    if !mesh.normals.is_empty() {
        writeln!(writer, "property float nx")?;
        writeln!(writer, "property float ny")?;
        writeln!(writer, "property float nz")?;
    }
    if !mesh.colors.is_empty() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
        writeln!(writer, "property uchar alpha")?;
    }
    if face_count > 0 {
        writeln!(writer, "element face {face_count}")?;
        if !mesh.faces.is_empty() {
            writeln!(writer, "property list uchar int vertex_indices")?;
        }
        if !mesh.texcoords.is_empty() {
            writeln!(writer, "property list uchar float texcoord")?;
        }
    }
    writeln!(writer, "end_header")?;

    for (i, p) in mesh.positions.iter().enumerate() {
        for c in p {
            writer.write_all(&c.to_le_bytes())?;
        }
        if let Some(n) = mesh.normals.get(i) {
            for c in n {
                writer.write_all(&c.to_le_bytes())?;
            }
        }
        if let Some(rgba) = mesh.colors.get(i) {
            writer.write_all(rgba)?;
        }
    }

    for i in 0..face_count {
        if let Some(face) = mesh.faces.get(i) {
            writer.write_all(&[3u8])?;
            for &index in face {
                #[allow(clippy::cast_possible_wrap)]
                writer.write_all(&(index as i32).to_le_bytes())?;
            }
        }
        if let Some(uv) = mesh.texcoords.get(i) {
            writer.write_all(&[6u8])?;
            for c in uv {
                writer.write_all(&c.to_le_bytes())?;
            }
        }
    }

    Ok(())
}
