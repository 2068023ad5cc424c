//! Unified error type for the file-facing stages.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Schema error in {}: {message}", path.display())]
    Schema { path: PathBuf, message: String },

    #[error("Malformed record in {} line {line}: {message}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{} is held by another writer (remove {} if no other run is active)", path.display(), lock.display())]
    Locked { path: PathBuf, lock: PathBuf },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}
