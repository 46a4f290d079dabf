use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::evaluation::{DEFAULT_K_FOLDS, DEFAULT_SEED};
use crate::constants::pipeline::{
    CONFIDENCE_THRESHOLD, DEFAULT_CHUNK_SIZE, DEFAULT_DIR_IO, FULL_TEXT_TOP_N,
};
use crate::data::Field;
use crate::errors::LinkerError;

/// Fields used for exact-match blocking on each side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockingConfig {
    /// Source-record field whose values are looked up.
    pub source_field: Field,
    /// Target-catalog field the values are matched against.
    pub target_field: Field,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            source_field: Field::NameTokens,
            target_field: Field::NameTokens,
        }
    }
}

impl BlockingConfig {
    /// Resolve optional per-side choices: a missing side copies the other,
    /// and with neither given both default to name tokens.
    pub fn resolve(source_field: Option<Field>, target_field: Option<Field>) -> Self {
        match (source_field, target_field) {
            (Some(source_field), Some(target_field)) => Self {
                source_field,
                target_field,
            },
            (Some(field), None) | (None, Some(field)) => Self {
                source_field: field,
                target_field: field,
            },
            (None, None) => Self::default(),
        }
    }
}

/// Top-level linker configuration, threaded through every pipeline stage.
#[derive(Clone, Debug)]
pub struct LinkerConfig {
    /// Directory holding models, caches, and outputs.
    pub dir_io: PathBuf,
    /// Max source records per chunk.
    pub chunk_size: usize,
    /// Minimum score for a prediction to be emitted.
    pub confidence_threshold: f64,
    /// Exact-match blocking fields.
    pub blocking: BlockingConfig,
    /// Fields for the post-classification exact-match veto; empty disables it.
    pub post_block_fields: Vec<Field>,
    /// Full-text hits kept per source record when building training sets.
    pub full_text_top_n: usize,
    /// Seed for classifier initialization.
    pub seed: u64,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            dir_io: PathBuf::from(DEFAULT_DIR_IO),
            chunk_size: DEFAULT_CHUNK_SIZE,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            blocking: BlockingConfig::default(),
            post_block_fields: Vec::new(),
            full_text_top_n: FULL_TEXT_TOP_N,
            seed: DEFAULT_SEED,
        }
    }
}

impl LinkerConfig {
    /// Validate numeric settings.
    pub fn validated(self) -> Result<Self, LinkerError> {
        if self.chunk_size == 0 {
            return Err(LinkerError::Configuration(
                "chunk size must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(LinkerError::Configuration(format!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(self)
    }
}

/// Cross-validation strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluationStrategy {
    /// Per-fold scores averaged across folds.
    Average,
    /// One score over the pooled held-out folds.
    Single,
    /// Outer k-fold around an inner cross-validated grid search.
    Nested,
}

/// Scoring metric for grid search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Precision,
    Recall,
    F1,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Precision, Metric::Recall, Metric::F1];

    pub fn key(self) -> &'static str {
        match self {
            Metric::Precision => "precision",
            Metric::Recall => "recall",
            Metric::F1 => "f1",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = LinkerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|metric| metric.key() == value)
            .ok_or_else(|| {
                LinkerError::Configuration(format!(
                    "unknown metric '{value}', expected one of: precision, recall, f1"
                ))
            })
    }
}

/// Cross-validation configuration.
#[derive(Clone, Copy, Debug)]
pub struct EvaluationConfig {
    pub k_folds: usize,
    pub strategy: EvaluationStrategy,
    /// Metric optimized by nested grid search.
    pub metric: Metric,
    /// Seed for stratified fold shuffling.
    pub seed: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            k_folds: DEFAULT_K_FOLDS,
            strategy: EvaluationStrategy::Average,
            metric: Metric::F1,
            seed: DEFAULT_SEED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_defaults_follow_the_given_side() {
        assert_eq!(BlockingConfig::resolve(None, None), BlockingConfig::default());
        let url_only = BlockingConfig::resolve(None, Some(Field::Url));
        assert_eq!(url_only.source_field, Field::Url);
        assert_eq!(url_only.target_field, Field::Url);
        let both = BlockingConfig::resolve(Some(Field::Name), Some(Field::NameTokens));
        assert_eq!(both.source_field, Field::Name);
        assert_eq!(both.target_field, Field::NameTokens);
    }

    #[test]
    fn linker_config_rejects_bad_numbers() {
        let zero_chunks = LinkerConfig {
            chunk_size: 0,
            ..LinkerConfig::default()
        };
        assert!(matches!(
            zero_chunks.validated(),
            Err(LinkerError::Configuration(msg)) if msg.contains("chunk size")
        ));
        let bad_threshold = LinkerConfig {
            confidence_threshold: 1.5,
            ..LinkerConfig::default()
        };
        assert!(bad_threshold.validated().is_err());
        assert!(LinkerConfig::default().validated().is_ok());
    }

    #[test]
    fn metric_parsing() {
        assert_eq!("f1".parse::<Metric>().unwrap(), Metric::F1);
        assert!("accuracy".parse::<Metric>().is_err());
    }
}
