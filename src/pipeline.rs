//! Chunked training and classification over a source dataset.
//!
//! Source records arrive in bounded chunks. Each chunk is blocked against the
//! target catalog, and only the target records its candidates reference are
//! fetched. After a complete pass the accumulated features and records are
//! cached, so later runs skip blocking and extraction.

use std::fs::File;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::blocking::{
    TargetCatalog, block, full_text_block, identifier_positives, recover_positives,
};
use crate::cache::{ArtifactCache, CachedArtifacts, artifact_path};
use crate::catalog::{self, CatalogSpec, EntitySpec};
use crate::classifier::{Classifier, ClassifierKind, Hyperparameters, LinkModel};
use crate::codec::ensure_parent_dir;
use crate::config::LinkerConfig;
use crate::constants::artifacts::{MODEL_SUFFIX, RESULT_SUFFIX};
use crate::constants::pipeline::{PURPOSE_CLASSIFICATION, PURPOSE_TRAINING};
use crate::corrector::{CorrectionStats, PostClassification, threshold_and_dedup};
use crate::data::{EntityRecord, Prediction, RecordSet};
use crate::errors::LinkerError;
use crate::features::{FeatureMatrix, extract, feature_columns};
use crate::pairs::PairIndex;
use crate::types::HashPart;
use crate::upload::Uploader;

/// Lazy, finite sequence of source chunks.
pub type RecordChunks<'a> = Box<dyn Iterator<Item = Result<RecordSet, LinkerError>> + 'a>;

/// Source-side record provider.
///
/// `chunks` may be called repeatedly; each call restarts from the beginning
/// and yields the same chunks for an unchanged dataset.
pub trait SourceDataset: Send + Sync {
    /// Stable dataset identifier used in logs.
    fn id(&self) -> &str;
    /// Records in chunks of at most `chunk_size`.
    fn chunks(&self, chunk_size: usize) -> Result<RecordChunks<'_>, LinkerError>;
}

/// Source dataset held in memory.
pub struct InMemoryDataset {
    id: String,
    records: Vec<EntityRecord>,
}

impl InMemoryDataset {
    pub fn new(id: impl Into<String>, records: RecordSet) -> Self {
        Self {
            id: id.into(),
            records: records.iter().cloned().collect(),
        }
    }
}

impl SourceDataset for InMemoryDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn chunks(&self, chunk_size: usize) -> Result<RecordChunks<'_>, LinkerError> {
        if chunk_size == 0 {
            return Err(LinkerError::Configuration(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Box::new(
            self.records
                .chunks(chunk_size)
                .map(|chunk| Ok(chunk.iter().cloned().collect())),
        ))
    }
}

/// Labelled feature matrix for training and evaluation.
#[derive(Clone, Debug)]
pub struct TrainingSet {
    pub features: FeatureMatrix,
    /// Known links reached by blocking.
    pub positives: PairIndex,
    /// Known links blocking did not reach.
    pub dropped_positives: usize,
}

/// Aggregate counts for one classification run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassificationSummary {
    pub chunks: usize,
    pub candidates: usize,
    pub emitted: usize,
    pub corrections: CorrectionStats,
    /// Sentinel columns added to reach the model's width.
    pub padded_columns: usize,
    pub from_cache: bool,
}

/// Linking pipeline for one `(catalog, entity)`.
#[derive(Debug)]
pub struct Linker {
    config: LinkerConfig,
    catalog: &'static CatalogSpec,
    entity: &'static EntitySpec,
}

impl Linker {
    /// Validate the configuration and resolve the catalog/entity keys.
    pub fn new(
        config: LinkerConfig,
        catalog_key: &str,
        entity_key: &str,
    ) -> Result<Self, LinkerError> {
        let config = config.validated()?;
        let (catalog, entity) = catalog::entity(catalog_key, entity_key)?;
        Ok(Self {
            config,
            catalog,
            entity,
        })
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &'static CatalogSpec {
        self.catalog
    }

    pub fn entity(&self) -> &'static EntitySpec {
        self.entity
    }

    /// `{dir_io}/{catalog}_{entity}_{tail}`.
    pub fn artifact(&self, tail: &str) -> PathBuf {
        artifact_path(&self.config.dir_io, self.catalog.key, self.entity.key, tail)
    }

    pub fn model_path(&self, kind: ClassifierKind) -> PathBuf {
        self.artifact(&format!("{kind}_{MODEL_SUFFIX}"))
    }

    pub fn result_path(&self, kind: ClassifierKind) -> PathBuf {
        self.artifact(&format!("{kind}_{RESULT_SUFFIX}"))
    }

    /// Cache for `purpose`, fingerprinted with the settings that shape its content.
    pub fn cache(&self, purpose: &str) -> ArtifactCache {
        let blocking = self.config.blocking;
        let mut settings: Vec<HashPart> = vec![
            format!("chunk_size={}", self.config.chunk_size),
            format!("blocking={}:{}", blocking.source_field, blocking.target_field),
        ];
        if purpose == PURPOSE_TRAINING {
            settings.push(format!("full_text_top_n={}", self.config.full_text_top_n));
        }
        ArtifactCache::new(
            &self.config.dir_io,
            self.catalog.key,
            self.entity.key,
            purpose,
            &settings,
        )
    }

    fn corrector(&self) -> PostClassification {
        PostClassification::new(self.config.post_block_fields.clone())
    }

    /// Candidates, features, and the training positives for all source chunks.
    ///
    /// Blocking is exact match plus full-text search; known links outside the
    /// candidates are dropped with a warning.
    pub fn build_training_set(
        &self,
        source: &dyn SourceDataset,
        catalog: &dyn TargetCatalog,
    ) -> Result<TrainingSet, LinkerError> {
        let cache = self.cache(PURPOSE_TRAINING);
        if let Some(cached) = cache.load()? {
            return Ok(self.training_set_from(cached));
        }
        info!(
            catalog = self.catalog.key,
            entity = self.entity.key,
            source = source.id(),
            "cached training set not found; building it from scratch"
        );

        let mut accumulated = CachedArtifacts {
            features: FeatureMatrix::with_columns(feature_columns()),
            ..CachedArtifacts::default()
        };
        let mut positives = PairIndex::new();
        let mut dropped_positives = 0;
        for (idx, chunk) in source.chunks(self.config.chunk_size)?.enumerate() {
            let chunk = chunk?;
            let mut samples = block(&chunk, catalog, &self.config.blocking)?;
            samples.extend_from(&full_text_block(&chunk, catalog, self.config.full_text_top_n)?);
            let (recovered, dropped) =
                recover_positives(&samples, &identifier_positives(&chunk), self.catalog.key);
            let targets = catalog.records(&samples.target_ids())?;
            let features = extract(&samples, &chunk, &targets);
            info!(
                chunk = idx + 1,
                samples = samples.len(),
                positives = recovered.len(),
                dropped,
                "training chunk processed"
            );
            positives.extend_from(&recovered);
            dropped_positives += dropped;
            accumulated.features.append(features)?;
            accumulated.source_records.merge(chunk);
            accumulated.target_records.merge(targets);
        }
        self.log_dropped_positives(dropped_positives);
        cache.store(&accumulated)?;
        Ok(TrainingSet {
            features: accumulated.features,
            positives,
            dropped_positives,
        })
    }

    /// Training set from an existing cache; a missing or stale cache is a
    /// `MissingArtifact` error.
    pub fn cached_training_set(&self) -> Result<TrainingSet, LinkerError> {
        let cache = self.cache(PURPOSE_TRAINING);
        match cache.load()? {
            Some(cached) => Ok(self.training_set_from(cached)),
            None => Err(LinkerError::MissingArtifact {
                kind: "training set cache",
                path: cache.paths()[0].to_path_buf(),
            }),
        }
    }

    /// Positives are rebuilt from the cached source records: every QID lives
    /// in exactly one chunk, so this equals the per-chunk union.
    fn training_set_from(&self, cached: CachedArtifacts) -> TrainingSet {
        let asserted = identifier_positives(&cached.source_records);
        let (positives, dropped_positives) =
            recover_positives(&cached.features.index(), &asserted, self.catalog.key);
        self.log_dropped_positives(dropped_positives);
        TrainingSet {
            features: cached.features,
            positives,
            dropped_positives,
        }
    }

    fn log_dropped_positives(&self, dropped: usize) {
        if dropped > 0 {
            warn!(
                catalog = self.catalog.key,
                entity = self.entity.key,
                dropped,
                "known links unreachable by blocking were left out of the training set"
            );
        }
    }

    /// Fresh model of `kind` fitted on `training`.
    pub fn fit_model(
        &self,
        kind: ClassifierKind,
        params: &Hyperparameters,
        training: &TrainingSet,
    ) -> Result<LinkModel, LinkerError> {
        let mut model = LinkModel::new(kind, params, self.config.seed);
        info!(
            %kind,
            rows = training.features.len(),
            positives = training.positives.len(),
            "training classifier"
        );
        model.fit(&training.features, &training.positives)?;
        Ok(model)
    }

    /// Build the training set, fit, and persist the model under [`Self::model_path`].
    pub fn train(
        &self,
        kind: ClassifierKind,
        params: &Hyperparameters,
        source: &dyn SourceDataset,
        catalog: &dyn TargetCatalog,
    ) -> Result<LinkModel, LinkerError> {
        let params = params.clone().validated()?;
        let training = self.build_training_set(source, catalog)?;
        if training.positives.is_empty() {
            warn!(
                catalog = self.catalog.key,
                entity = self.entity.key,
                "no positive samples survived blocking; the model will never predict a match"
            );
        }
        let model = self.fit_model(kind, &params, &training)?;
        model.save(&self.model_path(kind))?;
        Ok(model)
    }

    fn score(
        &self,
        model: &LinkModel,
        features: &FeatureMatrix,
        source: &RecordSet,
        target: &RecordSet,
        summary: &mut ClassificationSummary,
    ) -> Result<Vec<Prediction>, LinkerError> {
        // Pad a copy: the unpadded matrix is what gets cached.
        let mut padded = features.clone();
        let added = model.reconcile_width(&mut padded)?;
        summary.padded_columns = summary.padded_columns.max(added);
        let scores = model.probability(&padded)?;
        let mut predictions: Vec<Prediction> = padded
            .pairs()
            .iter()
            .cloned()
            .zip(scores)
            .map(|(pair, score)| Prediction::new(pair, score))
            .collect();
        summary
            .corrections
            .absorb(self.corrector().apply(&mut predictions, source, target));
        Ok(threshold_and_dedup(
            predictions,
            self.config.confidence_threshold,
        ))
    }

    /// Classify every source chunk, handing accepted predictions to `on_chunk`
    /// as `(1-based chunk index, predictions)`.
    ///
    /// With a valid cache the whole dataset is scored as a single chunk.
    pub fn classify<F>(
        &self,
        model: &LinkModel,
        source: &dyn SourceDataset,
        catalog: &dyn TargetCatalog,
        mut on_chunk: F,
    ) -> Result<ClassificationSummary, LinkerError>
    where
        F: FnMut(usize, &[Prediction]) -> Result<(), LinkerError>,
    {
        let cache = self.cache(PURPOSE_CLASSIFICATION);
        let mut summary = ClassificationSummary::default();
        if let Some(cached) = cache.load()? {
            let predictions = self.score(
                model,
                &cached.features,
                &cached.source_records,
                &cached.target_records,
                &mut summary,
            )?;
            summary.from_cache = true;
            summary.chunks = 1;
            summary.candidates = cached.features.len();
            summary.emitted = predictions.len();
            on_chunk(1, &predictions)?;
            self.log_summary(&summary);
            return Ok(summary);
        }
        info!(
            catalog = self.catalog.key,
            entity = self.entity.key,
            source = source.id(),
            "cached classification set not found; building it from scratch"
        );

        let mut accumulated = CachedArtifacts {
            features: FeatureMatrix::with_columns(feature_columns()),
            ..CachedArtifacts::default()
        };
        for (idx, chunk) in source.chunks(self.config.chunk_size)?.enumerate() {
            let chunk = chunk?;
            let samples = block(&chunk, catalog, &self.config.blocking)?;
            let targets = catalog.records(&samples.target_ids())?;
            let features = extract(&samples, &chunk, &targets);
            let predictions = self.score(model, &features, &chunk, &targets, &mut summary)?;
            summary.chunks += 1;
            summary.candidates += features.len();
            summary.emitted += predictions.len();
            info!(
                chunk = idx + 1,
                candidates = features.len(),
                emitted = predictions.len(),
                "chunk classified"
            );
            on_chunk(idx + 1, &predictions)?;
            accumulated.features.append(features)?;
            accumulated.source_records.merge(chunk);
            accumulated.target_records.merge(targets);
        }
        cache.store(&accumulated)?;
        self.log_summary(&summary);
        Ok(summary)
    }

    fn log_summary(&self, summary: &ClassificationSummary) {
        info!(
            catalog = self.catalog.key,
            entity = self.entity.key,
            chunks = summary.chunks,
            candidates = summary.candidates,
            emitted = summary.emitted,
            vetoed = summary.corrections.vetoed,
            overridden = summary.corrections.overridden,
            padded_columns = summary.padded_columns,
            from_cache = summary.from_cache,
            "classification done"
        );
    }

    /// Load the persisted model for `kind`, then classify, appending
    /// `QID\tTID\tscore` rows to the result file chunk by chunk.
    ///
    /// The model is loaded before the result file is truncated, so a missing
    /// model leaves earlier results intact.
    pub fn run_classification(
        &self,
        kind: ClassifierKind,
        source: &dyn SourceDataset,
        catalog: &dyn TargetCatalog,
        mut uploader: Option<&mut dyn Uploader>,
    ) -> Result<ClassificationSummary, LinkerError> {
        let model = LinkModel::load(&self.model_path(kind))?;
        let result_path = self.result_path(kind);
        ensure_parent_dir(&result_path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(File::create(&result_path)?);
        let summary = self.classify(&model, source, catalog, |_, predictions| {
            for prediction in predictions {
                writer.serialize((&prediction.pair.qid, &prediction.pair.tid, prediction.score))?;
            }
            writer.flush()?;
            if let Some(uploader) = uploader.as_deref_mut()
                && !predictions.is_empty()
            {
                uploader.add_identifiers(self.catalog, predictions)?;
            }
            Ok(())
        })?;
        info!(path = %result_path.display(), "predictions written");
        Ok(summary)
    }
}
