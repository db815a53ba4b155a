//! Error taxonomy for the churn pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Failures the pipeline distinguishes between.
///
/// Stages return `anyhow::Result`; callers that care about the kind of
/// failure recover it with `err.downcast_ref::<PipelineError>()`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("input file has no rows: {}", path.display())]
    EmptyInput { path: PathBuf },

    #[error("schema mismatch on column '{column}': {reason}")]
    SchemaMismatch { column: String, reason: String },

    #[error("column '{column}' contains missing values")]
    MissingValues { column: String },

    #[error("category '{value}' in column '{column}' was not seen during fitting")]
    UnseenCategory { column: String, value: String },

    #[error("model fit failed: {0}")]
    FitFailure(String),

    #[error("failed to write artifact {}: {reason}", path.display())]
    ArtifactWrite { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub(crate) fn missing_column(column: &str) -> Self {
        PipelineError::SchemaMismatch {
            column: column.to_string(),
            reason: "column not present in table".to_string(),
        }
    }

    pub(crate) fn artifact(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        PipelineError::ArtifactWrite {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
