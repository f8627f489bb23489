use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ensemble::extension_matcher;
use crate::error::{Result, ShapePcaError};

/// Input directory used when none is given on the command line.
pub const DEFAULT_INPUT_DIR: &str = "../../data/";
/// Extensions matched by default: PLY files only.
pub const DEFAULT_EXTENSION_PATTERN: &str = r"\.(?:ply)";
/// Subdirectory of the input directory receiving the default output.
pub const DEFAULT_OUTPUT_SUBDIR: &str = "Output";
pub const DEFAULT_OUTPUT_FILENAME: &str = "output_pca.ply";

/// Settings of one shape-model run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory scanned (non-recursively) for input meshes.
    pub input_dir: PathBuf,
    /// Number of leading modes used to reproject the first mesh. Requests
    /// beyond the available modes are clamped.
    pub num_components: usize,
    /// Where the reprojected mesh is written. Missing parent directories are created.
    pub output_path: PathBuf,
    /// Regex matched against the whole file extension, leading dot included.
    pub extension_pattern: String,
    /// If set, the computed shape model is saved here with bincode.
    pub model_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_DIR)
    }
}

impl PipelineConfig {
    /// Default settings for `input_dir`; the output goes to
    /// `<input_dir>/Output/output_pca.ply`.
    pub fn new<P: AsRef<Path>>(input_dir: P) -> Self {
        let input_dir = input_dir.as_ref().to_path_buf();
        let output_path = input_dir
            .join(DEFAULT_OUTPUT_SUBDIR)
            .join(DEFAULT_OUTPUT_FILENAME);
        Self {
            input_dir,
            num_components: 1,
            output_path,
            extension_pattern: DEFAULT_EXTENSION_PATTERN.to_string(),
            model_path: None,
        }
    }

    /// Checks values that cannot be expressed through types alone.
    ///
    /// # Errors
    /// Returns a configuration error if the extension pattern does not
    /// compile or the output path names no file.
    pub fn validate(&self) -> Result<()> {
        extension_matcher(&self.extension_pattern)?;
        if self.output_path.file_name().is_none() {
            return Err(ShapePcaError::Config(format!(
                "output path {} does not name a file",
                self.output_path.display()
            )));
        }
        Ok(())
    }
}
