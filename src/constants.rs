/// Constants used by feature extraction.
pub mod features {
    /// Sentinel written when a comparison cannot be computed because an attribute is missing.
    ///
    /// All real comparison outcomes lie in `[0.0, 1.0]`, so the sentinel never collides with one.
    pub const MISSING_VALUE: f64 = -1.0;
    /// Prefix for padding columns appended during width reconciliation.
    pub const MISSING_COLUMN_PREFIX: &str = "missing_";
}

/// Constants used by blocking and the chunked pipeline.
pub mod pipeline {
    /// Default number of source records per chunk.
    pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
    /// Default probability threshold for emitting a link.
    pub const CONFIDENCE_THRESHOLD: f64 = 0.5;
    /// Default number of full-text hits kept per source record when building training sets.
    pub const FULL_TEXT_TOP_N: usize = 5;
    /// Default input/output directory.
    pub const DEFAULT_DIR_IO: &str = "linkwise_shared";
    /// Purpose tag for classification artifacts.
    pub const PURPOSE_CLASSIFICATION: &str = "classification";
    /// Purpose tag for training artifacts.
    pub const PURPOSE_TRAINING: &str = "training";
}

/// Constants used by artifact and model persistence.
pub mod artifacts {
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
    /// Version tag for persisted model records.
    pub const MODEL_RECORD_VERSION: u8 = 2;
    /// Version tag for persisted cache records.
    pub const CACHE_RECORD_VERSION: u8 = 2;
    /// Model file name: `{catalog}_{entity}_{classifier}_model.bin`.
    pub const MODEL_SUFFIX: &str = "model.bin";
    /// Nested evaluation best model file name suffix: `..._best_model_{fold}.bin`.
    pub const BEST_MODEL_SUFFIX: &str = "best_model";
    /// Cached feature matrix artifact suffix.
    pub const FEATURES_SUFFIX: &str = "features.bin";
    /// Cached source record accumulation artifact suffix.
    pub const SOURCE_RECORDS_SUFFIX: &str = "source_records.bin";
    /// Cached target record accumulation artifact suffix.
    pub const TARGET_RECORDS_SUFFIX: &str = "target_records.bin";
    /// Classification results file suffix.
    pub const RESULT_SUFFIX: &str = "linker_result.tsv";
    /// Evaluation predictions file suffix.
    pub const EVALUATION_PREDICTIONS_SUFFIX: &str = "linker_evaluation_predictions.tsv";
    /// Evaluation performance file suffix (text reports).
    pub const PERFORMANCE_TEXT_SUFFIX: &str = "linker_performance.txt";
    /// Evaluation performance file suffix (nested JSON reports).
    pub const PERFORMANCE_JSON_SUFFIX: &str = "linker_performance.json";
}

/// Constants used by classifier kernels.
pub mod classifier {
    /// Default binarization threshold for naive Bayes features.
    pub const DEFAULT_BINARIZE: f64 = 0.1;
    /// Default Laplace smoothing for naive Bayes.
    pub const DEFAULT_ALPHA: f64 = 0.0001;
    /// Default SVM regularization constant.
    pub const DEFAULT_C: f64 = 1.0;
    /// Passes over the data for the SVM optimizer.
    pub const SVM_EPOCHS: usize = 50;
    /// Gradient steps used to fit Platt scaling.
    pub const PLATT_ITERATIONS: usize = 200;
    /// Default learning rate for neural kernels.
    pub const LEARNING_RATE: f64 = 0.05;
    /// Default training epochs for neural kernels.
    pub const EPOCHS: usize = 200;
    /// Default mini-batch size for neural kernels.
    pub const BATCH_SIZE: usize = 256;
    /// Fraction of training rows held out for early stopping.
    pub const VALIDATION_SPLIT: f64 = 0.33;
    /// Epochs without validation improvement before training stops.
    pub const PATIENCE: usize = 100;
    /// Hidden layer widths for the multi-layer perceptron.
    pub const HIDDEN_LAYERS: [usize; 2] = [128, 32];
    /// Default probability cut-off used by `predict`.
    pub const DECISION_THRESHOLD: f64 = 0.5;
    /// Seed mixed into kernel initialization.
    pub const KERNEL_SEED: u64 = 0x11C0_5EED;
}

/// Constants used by the cross-validation engine.
pub mod evaluation {
    /// Default number of folds.
    pub const DEFAULT_K_FOLDS: usize = 5;
    /// Default seed for stratified fold shuffling.
    pub const DEFAULT_SEED: u64 = 1269;
}

/// Constants used by the reconciliation checker.
pub mod reconcile {
    /// Property used for generic "described at URL" statements.
    pub const DESCRIBED_AT_URL: &str = "P973";
    /// Placeholder in formatter URLs that stands for the identifier.
    pub const FORMATTER_PLACEHOLDER: &str = "$1";
    /// Identifier capture used when a formatter declares no identifier pattern.
    pub const DEFAULT_ID_PATTERN: &str = "[^/?#]+";
    /// Deprecated identifier statements, `{tid: [qids]}`.
    pub const DEPRECATED_IDS_SUFFIX: &str = "deprecated_ids.json";
    /// Target ids missing from the catalog, `{tid: [qids]}`.
    pub const NON_EXISTENT_IDS_SUFFIX: &str = "non_existent_ids.json";
    /// External identifier statements to add.
    pub const EXTERNAL_IDS_SUFFIX: &str = "external_ids_to_be_added.tsv";
    /// Described-at-URL statements to add.
    pub const URLS_SUFFIX: &str = "urls_to_be_added.tsv";
}

/// Constants used by the self-reference override.
pub mod corrector {
    /// Substring that marks a link as pointing at the knowledge base.
    pub const KNOWLEDGE_BASE_HOST_MARKER: &str = "wikidata";
    /// Trailing item identifier pattern in knowledge-base links.
    pub const TRAILING_QID_PATTERN: &str = r"(Q\d+)$";
}
