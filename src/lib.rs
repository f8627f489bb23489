// Statistical shape models from point-correspondent meshes

#![doc = include_str!("../README.md")]

pub mod config;
pub mod diagnostics;
pub mod ensemble;
pub mod error;
pub mod linalg_backends;
pub mod mesh;
pub mod pca;
pub mod pipeline;
pub mod ply;

pub use config::PipelineConfig;
pub use error::{Result, ShapePcaError};
pub use mesh::MeshRecord;
pub use pca::{ShapeModel, ShapePca};
pub use pipeline::{run, PipelineSummary};

#[cfg(test)]
mod pca_tests;
