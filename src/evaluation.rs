//! Stratified k-fold evaluation of link classifiers.
//!
//! Three strategies share one fold splitter: per-fold scores averaged
//! (`average`), one score over the pooled held-out folds (`single`), and an
//! outer k-fold around a cross-validated grid search (`nested`).

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::classifier::{Classifier, ClassifierKind, Hyperparameters, LinkModel, ParameterGrid};
use crate::codec::ensure_parent_dir;
use crate::config::{EvaluationConfig, EvaluationStrategy, Metric};
use crate::constants::artifacts::{
    BEST_MODEL_SUFFIX, EVALUATION_PREDICTIONS_SUFFIX, PERFORMANCE_JSON_SUFFIX,
    PERFORMANCE_TEXT_SUFFIX,
};
use crate::errors::LinkerError;
use crate::features::FeatureMatrix;
use crate::metrics::{ConfusionMatrix, MeanStd, Performance};
use crate::pairs::PairIndex;
use crate::pipeline::{Linker, TrainingSet};

/// Row indices of one train/test split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split rows into `k` folds that keep each label's share.
///
/// Each class is shuffled with a seeded RNG and dealt round-robin, the
/// negatives continuing where the positives stopped so fold sizes differ by
/// at most one. Index lists are sorted.
pub fn stratified_k_fold(labels: &[bool], k: usize, seed: u64) -> Result<Vec<Fold>, LinkerError> {
    if k < 2 {
        return Err(LinkerError::Configuration(format!(
            "k-fold needs at least 2 folds, got {k}"
        )));
    }
    if k > labels.len() {
        return Err(LinkerError::Configuration(format!(
            "cannot split {} rows into {k} folds",
            labels.len()
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positives: Vec<usize> = (0..labels.len()).filter(|idx| labels[*idx]).collect();
    let mut negatives: Vec<usize> = (0..labels.len()).filter(|idx| !labels[*idx]).collect();
    positives.shuffle(&mut rng);
    negatives.shuffle(&mut rng);

    let mut assignment = vec![0usize; labels.len()];
    for (slot, idx) in positives.iter().chain(&negatives).enumerate() {
        assignment[*idx] = slot % k;
    }
    Ok((0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|idx| assignment[*idx] == fold);
            Fold { train, test }
        })
        .collect())
}

/// Fit on the `train` rows and return the predicted links among the `test` rows.
fn fit_and_predict(
    kind: ClassifierKind,
    params: &Hyperparameters,
    seed: u64,
    features: &FeatureMatrix,
    positives: &PairIndex,
    fold: &Fold,
) -> Result<(PairIndex, FeatureMatrix), LinkerError> {
    let train = features.select(&fold.train);
    let test = features.select(&fold.test);
    let mut model = LinkModel::new(kind, params, seed);
    model.fit(&train, &positives.intersection(&train.index()))?;
    let predicted = linked_pairs(&model, &test)?;
    Ok((predicted, test))
}

fn linked_pairs(model: &LinkModel, features: &FeatureMatrix) -> Result<PairIndex, LinkerError> {
    Ok(features
        .pairs()
        .iter()
        .zip(model.predict(features)?)
        .filter(|(_, linked)| *linked)
        .map(|(pair, _)| pair.clone())
        .collect())
}

/// Per-fold scores summarized by mean and standard deviation.
#[derive(Clone, Debug, PartialEq)]
pub struct AverageReport {
    pub precision: MeanStd,
    pub recall: MeanStd,
    pub fscore: MeanStd,
    /// Union of each fold's predicted links.
    pub predictions: PairIndex,
}

pub fn average_k_fold(
    kind: ClassifierKind,
    params: &Hyperparameters,
    training: &TrainingSet,
    config: &EvaluationConfig,
    model_seed: u64,
) -> Result<AverageReport, LinkerError> {
    let labels = training.features.labels(&training.positives);
    let folds = stratified_k_fold(&labels, config.k_folds, config.seed)?;
    let mut predictions = PairIndex::new();
    let (mut precisions, mut recalls, mut fscores) = (Vec::new(), Vec::new(), Vec::new());
    for (idx, fold) in folds.iter().enumerate() {
        let (predicted, test) = fit_and_predict(
            kind,
            params,
            model_seed,
            &training.features,
            &training.positives,
            fold,
        )?;
        let truth = training.positives.intersection(&test.index());
        let performance = ConfusionMatrix::from_links(&truth, &predicted, test.len()).performance();
        info!(
            fold = idx + 1,
            precision = performance.precision,
            recall = performance.recall,
            fscore = performance.fscore,
            "fold evaluated"
        );
        precisions.push(performance.precision);
        recalls.push(performance.recall);
        fscores.push(performance.fscore);
        predictions.extend_from(&predicted);
    }
    Ok(AverageReport {
        precision: MeanStd::from_values(&precisions),
        recall: MeanStd::from_values(&recalls),
        fscore: MeanStd::from_values(&fscores),
        predictions,
    })
}

/// One score over the pooled held-out folds.
#[derive(Clone, Debug, PartialEq)]
pub struct SingleReport {
    pub performance: Performance,
    pub confusion: ConfusionMatrix,
    pub predictions: PairIndex,
}

pub fn single_k_fold(
    kind: ClassifierKind,
    params: &Hyperparameters,
    training: &TrainingSet,
    config: &EvaluationConfig,
    model_seed: u64,
) -> Result<SingleReport, LinkerError> {
    let labels = training.features.labels(&training.positives);
    let folds = stratified_k_fold(&labels, config.k_folds, config.seed)?;
    let mut predictions = PairIndex::new();
    let mut pooled = PairIndex::new();
    for fold in &folds {
        let (predicted, test) = fit_and_predict(
            kind,
            params,
            model_seed,
            &training.features,
            &training.positives,
            fold,
        )?;
        predictions.extend_from(&predicted);
        pooled.extend_from(&test.index());
    }
    let truth = training.positives.intersection(&pooled);
    let confusion = ConfusionMatrix::from_links(&truth, &predictions, pooled.len());
    Ok(SingleReport {
        performance: confusion.performance(),
        confusion,
        predictions,
    })
}

/// Outer-fold results of nested cross-validation.
#[derive(Clone, Debug)]
pub struct NestedReport {
    pub metric: Metric,
    /// Best mean inner score per outer fold.
    pub train_scores: Vec<f64>,
    /// Score of the best model on each outer test fold.
    pub test_scores: Vec<f64>,
    pub best_params: Vec<Hyperparameters>,
    /// Best model per outer fold, refitted on the whole outer training fold.
    pub best_models: Vec<LinkModel>,
}

/// Mean `metric` over `folds` of `features`.
fn cross_validated_score(
    kind: ClassifierKind,
    params: &Hyperparameters,
    seed: u64,
    features: &FeatureMatrix,
    positives: &PairIndex,
    folds: &[Fold],
    metric: Metric,
) -> Result<f64, LinkerError> {
    let mut scores = Vec::with_capacity(folds.len());
    for fold in folds {
        let (predicted, test) = fit_and_predict(kind, params, seed, features, positives, fold)?;
        let truth = positives.intersection(&test.index());
        scores.push(
            ConfusionMatrix::from_links(&truth, &predicted, test.len())
                .performance()
                .get(metric),
        );
    }
    Ok(MeanStd::from_values(&scores).mean)
}

/// Nested k-fold with an inner grid search over `grid`.
///
/// Neural kinds are rejected before any fold runs. Each grid candidate is
/// cross-validated in parallel; ties go to the earlier candidate.
pub fn nested_k_fold_with_grid_search(
    kind: ClassifierKind,
    grid: &[Hyperparameters],
    training: &TrainingSet,
    config: &EvaluationConfig,
    model_seed: u64,
) -> Result<NestedReport, LinkerError> {
    if kind.is_neural() {
        return Err(LinkerError::Unsupported(format!(
            "nested grid search is not supported for '{kind}'"
        )));
    }
    if grid.is_empty() {
        return Err(LinkerError::Configuration(
            "nested grid search needs at least one parameter set".to_string(),
        ));
    }
    let metric = config.metric;
    let labels = training.features.labels(&training.positives);
    let outer = stratified_k_fold(&labels, config.k_folds, config.seed)?;
    let mut report = NestedReport {
        metric,
        train_scores: Vec::new(),
        test_scores: Vec::new(),
        best_params: Vec::new(),
        best_models: Vec::new(),
    };
    for (idx, fold) in outer.iter().enumerate() {
        let train = training.features.select(&fold.train);
        let train_positives = training.positives.intersection(&train.index());
        let inner_labels = train.labels(&train_positives);
        let inner = stratified_k_fold(&inner_labels, config.k_folds, config.seed)?;
        let scores = grid
            .par_iter()
            .map(|params| {
                cross_validated_score(
                    kind,
                    params,
                    model_seed,
                    &train,
                    &train_positives,
                    &inner,
                    metric,
                )
            })
            .collect::<Result<Vec<f64>, LinkerError>>()?;
        let (best, best_score) = scores
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, top), (candidate, score)| {
                if *score > top { (candidate, *score) } else { (best, top) }
            });

        let mut best_model = LinkModel::new(kind, &grid[best], model_seed);
        best_model.fit(&train, &train_positives)?;
        let test = training.features.select(&fold.test);
        let truth = training.positives.intersection(&test.index());
        let predicted = linked_pairs(&best_model, &test)?;
        let test_score = ConfusionMatrix::from_links(&truth, &predicted, test.len())
            .performance()
            .get(metric);
        info!(
            fold = idx + 1,
            %metric,
            candidates = grid.len(),
            best_candidate = best,
            train_score = best_score,
            test_score,
            "outer fold evaluated"
        );
        report.train_scores.push(best_score);
        report.test_scores.push(test_score);
        report.best_params.push(grid[best].clone());
        report.best_models.push(best_model);
    }
    Ok(report)
}

/// Files written by [`run_evaluation`].
#[derive(Clone, Debug, Default)]
pub struct EvaluationOutput {
    pub performance_path: PathBuf,
    pub predictions_path: Option<PathBuf>,
    pub best_model_paths: Vec<PathBuf>,
}

/// Evaluate `kind` on the cached training set of `linker` and write reports.
///
/// A missing training cache is a `MissingArtifact` error; nested search on a
/// neural kind fails before anything is read.
pub fn run_evaluation(
    linker: &Linker,
    kind: ClassifierKind,
    params: &Hyperparameters,
    config: &EvaluationConfig,
) -> Result<EvaluationOutput, LinkerError> {
    let grid = match config.strategy {
        EvaluationStrategy::Nested => Some(ParameterGrid::for_kind(kind)?),
        _ => None,
    };
    let training = linker.cached_training_set()?;
    let model_seed = linker.config().seed;
    let performance_text = linker.artifact(&format!("{kind}_{PERFORMANCE_TEXT_SUFFIX}"));
    let predictions_path = linker.artifact(&format!("{kind}_{EVALUATION_PREDICTIONS_SUFFIX}"));
    info!(
        %kind,
        strategy = ?config.strategy,
        k_folds = config.k_folds,
        rows = training.features.len(),
        "starting evaluation"
    );

    match (config.strategy, grid) {
        (EvaluationStrategy::Nested, Some(grid)) => {
            warn!("nested cross-validation is the slowest evaluation option");
            let report =
                nested_k_fold_with_grid_search(kind, &grid, &training, config, model_seed)?;
            let mut best_model_paths = Vec::with_capacity(report.best_models.len());
            for (idx, model) in report.best_models.iter().enumerate() {
                let path = linker.artifact(&format!("{kind}_{BEST_MODEL_SUFFIX}_{}.bin", idx + 1));
                model.save(&path)?;
                best_model_paths.push(path);
            }
            let performance_path = linker.artifact(&format!("{kind}_{PERFORMANCE_JSON_SUFFIX}"));
            write_nested_report(&performance_path, &report, &best_model_paths)?;
            Ok(EvaluationOutput {
                performance_path,
                predictions_path: None,
                best_model_paths,
            })
        }
        (EvaluationStrategy::Single, _) => {
            let report = single_k_fold(kind, params, &training, config, model_seed)?;
            write_single_report(&performance_text, &report)?;
            write_predictions(&predictions_path, &report.predictions)?;
            Ok(EvaluationOutput {
                performance_path: performance_text,
                predictions_path: Some(predictions_path),
                best_model_paths: Vec::new(),
            })
        }
        _ => {
            let report = average_k_fold(kind, params, &training, config, model_seed)?;
            write_average_report(&performance_text, &report)?;
            write_predictions(&predictions_path, &report.predictions)?;
            Ok(EvaluationOutput {
                performance_path: performance_text,
                predictions_path: Some(predictions_path),
                best_model_paths: Vec::new(),
            })
        }
    }
}

pub fn write_average_report(path: &Path, report: &AverageReport) -> Result<(), LinkerError> {
    ensure_parent_dir(path)?;
    let mut out = File::create(path)?;
    for (label, stats) in [
        ("Precision", report.precision),
        ("Recall", report.recall),
        ("F-score", report.fscore),
    ] {
        writeln!(out, "{label}:")?;
        writeln!(out, "\tmean = {}", stats.mean)?;
        writeln!(out, "\tstandard deviation = {}", stats.std)?;
    }
    info!(path = %path.display(), "average performance written");
    Ok(())
}

pub fn write_single_report(path: &Path, report: &SingleReport) -> Result<(), LinkerError> {
    ensure_parent_dir(path)?;
    let mut out = File::create(path)?;
    writeln!(out, "Precision: {}", report.performance.precision)?;
    writeln!(out, "Recall: {}", report.performance.recall)?;
    writeln!(out, "F-score: {}", report.performance.fscore)?;
    writeln!(out, "Confusion matrix:\n{}", report.confusion)?;
    info!(path = %path.display(), "single performance written");
    Ok(())
}

#[derive(Serialize)]
struct NestedJson<'a> {
    metric: Metric,
    train_scores: &'a [f64],
    test_scores: &'a [f64],
    best_params: &'a [Hyperparameters],
    best_models: Vec<String>,
}

pub fn write_nested_report(
    path: &Path,
    report: &NestedReport,
    best_model_paths: &[PathBuf],
) -> Result<(), LinkerError> {
    ensure_parent_dir(path)?;
    let json = NestedJson {
        metric: report.metric,
        train_scores: &report.train_scores,
        test_scores: &report.test_scores,
        best_params: &report.best_params,
        best_models: best_model_paths
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
    };
    fs::write(path, serde_json::to_string_pretty(&json)?)?;
    info!(path = %path.display(), metric = %report.metric, "nested performance written");
    Ok(())
}

/// `QID\tTID` per predicted link.
pub fn write_predictions(path: &Path, predictions: &PairIndex) -> Result<(), LinkerError> {
    ensure_parent_dir(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;
    for pair in predictions {
        writer.write_record([&pair.qid, &pair.tid])?;
    }
    writer.flush()?;
    Ok(())
}
