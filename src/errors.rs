use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for linker configuration, artifact, IO, and model failures.
#[derive(Debug, Error)]
pub enum LinkerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unsupported classifier '{tag}', expected one of: {supported}")]
    UnsupportedClassifier { tag: String, supported: String },
    #[error("unknown catalog '{catalog}', expected one of: {supported}")]
    UnknownCatalog { catalog: String, supported: String },
    #[error("unknown entity '{entity}' for catalog '{catalog}', expected one of: {supported}")]
    UnknownEntity {
        catalog: String,
        entity: String,
        supported: String,
    },
    #[error("{kind} not found at '{}'", path.display())]
    MissingArtifact { kind: &'static str, path: PathBuf },
    #[error("feature matrix has {actual} columns but the model expects {expected}")]
    FeatureWidth { expected: usize, actual: usize },
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("collaborator '{name}' failed: {reason}")]
    Collaborator { name: String, reason: String },
    #[error("artifact codec failure: {0}")]
    Codec(String),
    #[error("invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}
