//! Assembly of the observation matrix from a directory of corresponding meshes.
//!
//! Every accepted mesh contributes one column holding its flattened vertex
//! positions. Files that cannot be parsed, or whose vertex count differs from
//! the reference mesh, are skipped and recorded in a [`BatchReport`]; they
//! never abort the batch.

use log::{info, trace, warn};
use ndarray::{s, Array2};
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::error::{Result, ShapePcaError};
use crate::mesh::MeshRecord;
use crate::ply::read_ply;

/// Lists the regular files in `directory` whose extension (with its leading
/// dot, e.g. `.ply`) fully matches `extension_pattern`.
///
/// The search is not recursive. Paths are sorted by file name so the column
/// order of the observation matrix does not depend on the filesystem.
///
/// # Errors
/// Returns a discovery error if the directory cannot be read.
pub fn discover(directory: &Path, extension_pattern: &Regex) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(directory).map_err(|source| ShapePcaError::Discovery {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ShapePcaError::Discovery {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        if is_full_match(extension_pattern, &extension) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    info!(
        "Discovered {} mesh files in {}",
        paths.len(),
        directory.display()
    );
    Ok(paths)
}

fn is_full_match(pattern: &Regex, text: &str) -> bool {
    pattern
        .find(text)
        .is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

/// Builds the extension matcher, anchored to the whole extension.
///
/// # Errors
/// Returns a configuration error if the pattern is not a valid regex.
pub fn extension_matcher(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| ShapePcaError::Config(format!("invalid extension pattern {pattern:?}: {e}")))
}

/// Parses `path` to establish the reference topology.
///
/// # Errors
/// Returns a parse error if the file cannot be read or has no vertices.
pub fn load_first(path: &Path) -> Result<(MeshRecord, usize)> {
    let record = parse(path)?;
    let count = record.vertex_count();
    if count == 0 {
        return Err(ShapePcaError::Parse {
            path: path.to_path_buf(),
            message: "mesh has zero vertices".into(),
        });
    }
    Ok((record, count))
}

fn parse(path: &Path) -> Result<MeshRecord> {
    read_ply(path).map_err(|e| ShapePcaError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Why a file was left out of the observation matrix.
#[derive(Debug)]
pub enum LoadFailure {
    Parse(ShapePcaError),
    TopologyMismatch { expected: usize, found: usize },
}

impl std::fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadFailure::Parse(e) => write!(f, "{e}"),
            LoadFailure::TopologyMismatch { expected, found } => write!(
                f,
                "the number of vertices does not match ({found} found, {expected} expected)"
            ),
        }
    }
}

impl LoadFailure {
    /// The crate-level error for this failure on `path`.
    pub fn into_error(self, path: &Path) -> ShapePcaError {
        match self {
            LoadFailure::Parse(e) => e,
            LoadFailure::TopologyMismatch { expected, found } => ShapePcaError::TopologyMismatch {
                path: path.to_path_buf(),
                expected,
                found,
            },
        }
    }
}

/// Outcome of one file in a batch.
#[derive(Debug)]
pub enum FileOutcome {
    /// Written into the given column of the observation matrix.
    Accepted { column: usize, vertex_count: usize },
    Rejected(LoadFailure),
}

/// Per-file outcomes of a batch, in processing order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub entries: Vec<(PathBuf, FileOutcome)>,
}

impl BatchReport {
    pub fn accepted_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, FileOutcome::Accepted { .. }))
            .count()
    }

    pub fn rejected(&self) -> impl Iterator<Item = (&Path, &LoadFailure)> {
        self.entries.iter().filter_map(|(p, o)| match o {
            FileOutcome::Rejected(failure) => Some((p.as_path(), failure)),
            FileOutcome::Accepted { .. } => None,
        })
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected().count()
    }

    /// Rejected files as crate-level errors, in processing order.
    pub fn into_errors(self) -> Vec<ShapePcaError> {
        self.entries
            .into_iter()
            .filter_map(|(path, outcome)| match outcome {
                FileOutcome::Rejected(failure) => Some(failure.into_error(&path)),
                FileOutcome::Accepted { .. } => None,
            })
            .collect()
    }

    /// Appends the entries of a later stage of the same batch.
    pub fn merge(&mut self, later: BatchReport) {
        self.entries.extend(later.entries);
    }

    fn record(&mut self, path: &Path, outcome: FileOutcome) {
        match &outcome {
            FileOutcome::Accepted { vertex_count, .. } => {
                info!("Read {} verts: {} [OK]", path.display(), vertex_count);
            }
            FileOutcome::Rejected(failure) => {
                warn!("Skipping {}: {}", path.display(), failure);
            }
        }
        self.entries.push((path.to_path_buf(), outcome));
    }
}

/// Result of loading a batch into an observation matrix.
#[derive(Debug)]
pub struct EnsembleBatch {
    /// Shape (3 × reference vertex count, accepted files). Column `k` holds the
    /// `k`-th accepted mesh.
    pub matrix: Array2<f64>,
    /// Auxiliary arrays of the last accepted mesh, positions included.
    pub last_record: Option<MeshRecord>,
    pub report: BatchReport,
}

impl EnsembleBatch {
    pub fn accepted_count(&self) -> usize {
        self.matrix.ncols()
    }
}

/// Reference topology established from the first parsable file.
#[derive(Debug)]
pub struct Reference {
    /// Position of the reference file in the candidate list.
    pub index: usize,
    pub path: PathBuf,
    pub record: MeshRecord,
    pub vertex_count: usize,
}

/// Tries [`load_first`] on each path in order and keeps the first success.
///
/// Failures before it are recorded in `report`.
///
/// # Errors
/// Returns an empty-batch error if no file can serve as reference.
pub fn establish_reference(paths: &[PathBuf], report: &mut BatchReport) -> Result<Reference> {
    for (index, path) in paths.iter().enumerate() {
        match load_first(path) {
            Ok((record, vertex_count)) => {
                info!(
                    "Reference topology: {} vertices from {}",
                    vertex_count,
                    path.display()
                );
                return Ok(Reference {
                    index,
                    path: path.clone(),
                    record,
                    vertex_count,
                });
            }
            Err(e) => report.record(path, FileOutcome::Rejected(LoadFailure::Parse(e))),
        }
    }
    Err(ShapePcaError::EmptyBatch {
        candidates: paths.len(),
    })
}

/// Loads every path into a column of the observation matrix.
///
/// The matrix is allocated for all paths and truncated to the accepted
/// columns before it is returned, so no unwritten column ever reaches the
/// statistics. Each file is parsed with its own short-lived handle.
pub fn load_into_matrix(paths: &[PathBuf], reference_vertex_count: usize) -> EnsembleBatch {
    let n_rows = 3 * reference_vertex_count;
    let mut matrix = Array2::<f64>::zeros((n_rows, paths.len()));
    info!("Matrix size: {} {}", n_rows, paths.len());

    let mut report = BatchReport::default();
    let mut last_record = None;
    let mut column = 0;

    for path in paths {
        let record = match parse(path) {
            Ok(record) => record,
            Err(e) => {
                report.record(path, FileOutcome::Rejected(LoadFailure::Parse(e)));
                continue;
            }
        };
        let found = record.vertex_count();
        if found != reference_vertex_count {
            report.record(
                path,
                FileOutcome::Rejected(LoadFailure::TopologyMismatch {
                    expected: reference_vertex_count,
                    found,
                }),
            );
            continue;
        }

        trace!("Filling column {} from {}", column, path.display());
        matrix
            .column_mut(column)
            .assign(&record.flattened_positions());
        report.record(
            path,
            FileOutcome::Accepted {
                column,
                vertex_count: found,
            },
        );
        last_record = Some(record);
        column += 1;
    }

    // skipped files leave trailing columns; the backends need contiguous storage
    let matrix = matrix
        .slice_move(s![.., ..column])
        .as_standard_layout()
        .into_owned();
    EnsembleBatch {
        matrix,
        last_record,
        report,
    }
}
