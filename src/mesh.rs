//! In-memory attribute arrays of a single mesh.

use ndarray::{Array1, ArrayView1};

use crate::error::{Result, ShapePcaError};

/// Attribute arrays of one mesh as read from, or written to, a mesh file.
///
/// Only `positions` is required. Every other array is optional and an empty
/// vector means the attribute is absent. Texture coordinates are stored per
/// face, one `(u, v)` pair for each of the three corners.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshRecord {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 4]>,
    pub faces: Vec<[u32; 3]>,
    pub texcoords: Vec<[f32; 6]>,
}

impl MeshRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Positions flattened to `[x0, y0, z0, x1, y1, z1, ...]` in `f64`.
    pub fn flattened_positions(&self) -> Array1<f64> {
        self.positions
            .iter()
            .flat_map(|p| p.iter().map(|&c| f64::from(c)))
            .collect()
    }

    /// Auxiliary arrays of this record with no positions.
    pub fn attributes_only(&self) -> MeshRecord {
        MeshRecord {
            positions: Vec::new(),
            ..self.clone()
        }
    }

    /// Returns a copy of this record whose positions are replaced by a
    /// flattened `x, y, z` vector.
    ///
    /// # Errors
    /// Returns a dimension error if the vector length is not a multiple of 3.
    pub fn with_flattened_positions(&self, flat: ArrayView1<f64>) -> Result<MeshRecord> {
        if flat.len() % 3 != 0 {
            return Err(ShapePcaError::Dimension(format!(
                "flattened position vector length {} is not a multiple of 3",
                flat.len()
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        let positions = flat
            .to_vec()
            .chunks_exact(3)
            .map(|c| [c[0] as f32, c[1] as f32, c[2] as f32])
            .collect();
        Ok(MeshRecord {
            positions,
            ..self.attributes_only()
        })
    }
}
