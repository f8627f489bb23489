//! End-to-end shape-model run: discover, load, decompose, reproject, write.

use log::{debug, info};
use ndarray::{Array1, ArrayView1};
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::diagnostics::{reconstruction_error, ModelDiagnostics};
use crate::ensemble::{
    discover, establish_reference, extension_matcher, load_into_matrix, BatchReport,
};
use crate::error::{Result, ShapePcaError};
use crate::mesh::MeshRecord;
use crate::pca::{ShapeModel, ShapePca};
use crate::ply::write_ply;

/// What a completed run did.
#[derive(Debug)]
pub struct PipelineSummary {
    pub files_discovered: usize,
    pub files_accepted: usize,
    pub report: BatchReport,
    pub model: ShapeModel,
    pub diagnostics: ModelDiagnostics,
    /// Components actually used for the reprojection after clamping.
    pub components_used: usize,
    pub reprojection: Array1<f64>,
    pub output_path: PathBuf,
}

/// Runs the whole pipeline for `config`.
///
/// Per-file problems are logged and skipped. Only a missing input directory,
/// an empty batch, a backend failure, or a failed write ends the run.
///
/// The output mesh is written before the model is saved. A failed mesh write
/// leaves no model file behind; a failed model save leaves the output mesh in
/// place and still returns the error.
///
/// # Errors
/// Returns the batch-level error that stopped the run.
pub fn run(config: &PipelineConfig) -> Result<PipelineSummary> {
    config.validate()?;
    let matcher = extension_matcher(&config.extension_pattern)?;

    let paths = discover(&config.input_dir, &matcher)?;
    if paths.is_empty() {
        return Err(ShapePcaError::EmptyBatch { candidates: 0 });
    }

    let mut report = BatchReport::default();
    let reference = establish_reference(&paths, &mut report)?;
    let batch = load_into_matrix(&paths[reference.index..], reference.vertex_count);
    let files_accepted = batch.accepted_count();
    report.merge(batch.report);
    let last_record = match batch.last_record {
        Some(record) if files_accepted > 0 => record,
        _ => {
            return Err(ShapePcaError::EmptyBatch {
                candidates: paths.len(),
            })
        }
    };
    info!(
        "Accepted {} of {} files into the observation matrix",
        files_accepted,
        paths.len()
    );

    let first_observation = batch.matrix.column(0).to_owned();
    let mut pca = ShapePca::new();
    pca.set_input(batch.matrix)?;
    pca.compute()?;
    let model = pca.into_model()?;

    info!("Values: {}", model.eigenvalues());
    debug!("Vectors: {}", model.eigenvectors());

    let components_used = config.num_components.min(model.n_components());
    let reprojection = model.reprojection(config.num_components);
    let diagnostics = ModelDiagnostics::from_model(&model);
    debug!("Model diagnostics: {:?}", diagnostics);
    info!(
        "Reprojected the first mesh with {} of {} components (error {:.6})",
        components_used,
        model.n_components(),
        reconstruction_error(first_observation.view(), reprojection.view())
    );

    write_result(&config.output_path, reprojection.view(), &last_record)?;

    if let Some(model_path) = &config.model_path {
        model.save_model(model_path)?;
        info!("Saved shape model to {}", model_path.display());
    }

    Ok(PipelineSummary {
        files_discovered: paths.len(),
        files_accepted,
        report,
        model,
        diagnostics,
        components_used,
        reprojection,
        output_path: config.output_path.clone(),
    })
}

/// Writes `vertices` (flattened `x, y, z`) with the normals, colors, faces and
/// texture coordinates of `attributes` to `output_path`.
///
/// The parent directory is created if needed. Empty attribute arrays are
/// omitted from the file.
///
/// # Errors
/// Returns a serialization error if the vertex vector is malformed or the
/// file cannot be written.
pub fn write_result(
    output_path: &Path,
    vertices: ArrayView1<f64>,
    attributes: &MeshRecord,
) -> Result<()> {
    let serialization_error = |message: String| ShapePcaError::Serialization {
        path: output_path.to_path_buf(),
        message,
    };

    let record = attributes
        .with_flattened_positions(vertices)
        .map_err(|e| serialization_error(e.to_string()))?;

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| serialization_error(e.to_string()))?;
    }
    write_ply(output_path, &record).map_err(|e| serialization_error(e.to_string()))?;
    info!(
        "Wrote {} vertices and {} faces to {}",
        record.vertex_count(),
        record.face_count(),
        output_path.display()
    );
    Ok(())
}
