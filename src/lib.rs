#![doc = include_str!("../README.md")]

/// CLI runners shared by the `linkwise` binary and downstream tools.
pub mod apps;
/// Candidate generation against a target catalog.
pub mod blocking;
/// Fingerprinted feature and record caches.
pub mod cache;
/// Registry of supported catalogs and entity types.
pub mod catalog;
/// Classifier kernels and persisted link models.
pub mod classifier;
/// Versioned binary framing for persisted artifacts.
pub mod codec;
/// Linker and evaluation configuration types.
pub mod config;
/// Centralized constants grouped by concern.
pub mod constants;
/// Post-classification correction rules.
pub mod corrector;
/// Entity records, fields, and predictions.
pub mod data;
/// Cross-validation strategies and report writers.
pub mod evaluation;
/// Pairwise feature extraction.
pub mod features;
mod hash;
/// Confusion counts and performance scores.
pub mod metrics;
/// Candidate pairs and pair indexes.
pub mod pairs;
/// Chunked training and classification pipeline.
pub mod pipeline;
/// Identifier-statement validation through links.
pub mod reconcile;
/// File-backed collaborators (JSON Lines today).
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Write-back seam towards the knowledge base.
pub mod upload;
/// Text normalization and set similarity helpers.
pub mod utils;

mod errors;

pub use blocking::{InMemoryCatalog, TargetCatalog};
pub use cache::{ArtifactCache, CachedArtifacts};
pub use catalog::{CatalogSpec, EntitySpec};
pub use classifier::{Classifier, ClassifierKind, Hyperparameters, LinkModel, ParameterGrid};
pub use config::{BlockingConfig, EvaluationConfig, EvaluationStrategy, LinkerConfig, Metric};
pub use corrector::{CorrectionStats, PostClassification};
pub use data::{DatePrecision, DateValue, EntityRecord, Field, Prediction, RecordSet};
pub use errors::LinkerError;
pub use evaluation::{EvaluationOutput, run_evaluation};
pub use features::FeatureMatrix;
pub use metrics::{ConfusionMatrix, Performance};
pub use pairs::{CandidatePair, PairIndex};
pub use pipeline::{ClassificationSummary, InMemoryDataset, Linker, SourceDataset, TrainingSet};
pub use reconcile::{
    Deprecations, ExternalIdFormatter, IdentifierStatements, LinkCheck, LinkSets, Statement,
};
pub use types::{ColumnName, ExternalId, HashPart, LinkUrl, Pid, Qid, Tid};
pub use upload::{RecordingUploader, UploadAction, Uploader};
