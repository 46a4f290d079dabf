//! Binary match/non-match classifiers over feature matrices.
//!
//! Four kernels sit behind one [`Classifier`] trait. [`LinkModel`] is the
//! tagged union that gets trained, persisted, and reloaded for inference.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec::{read_record, write_record};
use crate::constants::artifacts::MODEL_RECORD_VERSION;
use crate::constants::classifier::{
    BATCH_SIZE, DECISION_THRESHOLD, DEFAULT_ALPHA, DEFAULT_BINARIZE, DEFAULT_C, EPOCHS,
    HIDDEN_LAYERS, LEARNING_RATE, PATIENCE, VALIDATION_SPLIT,
};
use crate::errors::LinkerError;
use crate::features::FeatureMatrix;
use crate::pairs::PairIndex;

pub mod naive_bayes;
pub mod perceptron;
pub mod svm;

pub use naive_bayes::NaiveBayes;
pub use perceptron::NeuralNetwork;
pub use svm::LinearSvm;

/// Supported classifier kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    NaiveBayes,
    SupportVectorMachines,
    SingleLayerPerceptron,
    MultiLayerPerceptron,
}

impl ClassifierKind {
    pub const ALL: [ClassifierKind; 4] = [
        ClassifierKind::NaiveBayes,
        ClassifierKind::SupportVectorMachines,
        ClassifierKind::SingleLayerPerceptron,
        ClassifierKind::MultiLayerPerceptron,
    ];

    /// Canonical tag.
    pub fn key(self) -> &'static str {
        match self {
            ClassifierKind::NaiveBayes => "naive_bayes",
            ClassifierKind::SupportVectorMachines => "support_vector_machines",
            ClassifierKind::SingleLayerPerceptron => "single_layer_perceptron",
            ClassifierKind::MultiLayerPerceptron => "multi_layer_perceptron",
        }
    }

    /// Short alias accepted on the command line.
    pub fn alias(self) -> &'static str {
        match self {
            ClassifierKind::NaiveBayes => "nb",
            ClassifierKind::SupportVectorMachines => "svm",
            ClassifierKind::SingleLayerPerceptron => "slp",
            ClassifierKind::MultiLayerPerceptron => "mlp",
        }
    }

    /// Neural kernels have no hyperparameter grid.
    pub fn is_neural(self) -> bool {
        matches!(
            self,
            ClassifierKind::SingleLayerPerceptron | ClassifierKind::MultiLayerPerceptron
        )
    }

    /// Every accepted tag, canonical and alias.
    pub fn supported() -> String {
        ClassifierKind::ALL
            .iter()
            .flat_map(|kind| [kind.key(), kind.alias()])
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ClassifierKind {
    type Err = LinkerError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        ClassifierKind::ALL
            .into_iter()
            .find(|kind| kind.key() == tag || kind.alias() == tag)
            .ok_or_else(|| LinkerError::UnsupportedClassifier {
                tag: tag.to_string(),
                supported: ClassifierKind::supported(),
            })
    }
}

/// Per-kernel tunables. Each kernel reads only the fields it needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Naive Bayes: values above this count as present.
    pub binarize: f64,
    /// Naive Bayes: additive smoothing.
    pub alpha: f64,
    /// SVM: inverse regularization strength.
    pub c: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of the training rows (taken from the end) used for early stopping.
    pub validation_split: f64,
    pub patience: usize,
    /// MLP hidden layer widths.
    pub hidden_layers: Vec<usize>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            binarize: DEFAULT_BINARIZE,
            alpha: DEFAULT_ALPHA,
            c: DEFAULT_C,
            learning_rate: LEARNING_RATE,
            epochs: EPOCHS,
            batch_size: BATCH_SIZE,
            validation_split: VALIDATION_SPLIT,
            patience: PATIENCE,
            hidden_layers: HIDDEN_LAYERS.to_vec(),
        }
    }
}

impl Hyperparameters {
    pub fn validated(self) -> Result<Self, LinkerError> {
        if self.alpha <= 0.0 {
            return Err(LinkerError::Configuration(format!(
                "smoothing alpha must be positive, got {}",
                self.alpha
            )));
        }
        if self.c <= 0.0 {
            return Err(LinkerError::Configuration(format!(
                "regularization constant c must be positive, got {}",
                self.c
            )));
        }
        if self.batch_size == 0 || self.epochs == 0 {
            return Err(LinkerError::Configuration(
                "epochs and batch size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(LinkerError::Configuration(format!(
                "validation split must be within [0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(self)
    }
}

/// Hyperparameter candidates explored by nested grid search.
pub struct ParameterGrid;

impl ParameterGrid {
    /// Cartesian grid for `kind`; neural kinds have none.
    pub fn for_kind(kind: ClassifierKind) -> Result<Vec<Hyperparameters>, LinkerError> {
        let base = Hyperparameters::default();
        match kind {
            ClassifierKind::NaiveBayes => Ok([0.1, 0.3, 0.5, 0.7]
                .into_iter()
                .flat_map(|binarize| {
                    let base = base.clone();
                    [1e-4, 1e-2, 1.0].into_iter().map(move |alpha| Hyperparameters {
                        binarize,
                        alpha,
                        ..base.clone()
                    })
                })
                .collect()),
            ClassifierKind::SupportVectorMachines => Ok([0.01, 0.1, 1.0, 10.0]
                .into_iter()
                .map(|c| Hyperparameters { c, ..base.clone() })
                .collect()),
            ClassifierKind::SingleLayerPerceptron | ClassifierKind::MultiLayerPerceptron => {
                Err(LinkerError::Unsupported(format!(
                    "grid search is not available for the neural classifier '{kind}'"
                )))
            }
        }
    }
}

/// Capability set shared by every kernel.
pub trait Classifier {
    fn kind(&self) -> ClassifierKind;

    /// Feature width seen at fit time; `None` before fitting.
    fn input_width(&self) -> Option<usize>;

    /// Fit on `features`, labelling rows whose pair is in `positives` as matches.
    fn fit(&mut self, features: &FeatureMatrix, positives: &PairIndex) -> Result<(), LinkerError>;

    /// Match probability per row, each within `[0, 1]`.
    fn probability(&self, features: &FeatureMatrix) -> Result<Vec<f64>, LinkerError>;

    /// Hard labels at the default decision threshold.
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<bool>, LinkerError> {
        Ok(self
            .probability(features)?
            .into_iter()
            .map(|score| score >= DECISION_THRESHOLD)
            .collect())
    }
}

/// Trained link model, the artifact persisted between training and classification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LinkModel {
    NaiveBayes(NaiveBayes),
    SupportVectorMachines(LinearSvm),
    SingleLayerPerceptron(NeuralNetwork),
    MultiLayerPerceptron(NeuralNetwork),
}

impl LinkModel {
    /// Unfitted model of `kind`.
    pub fn new(kind: ClassifierKind, params: &Hyperparameters, seed: u64) -> Self {
        match kind {
            ClassifierKind::NaiveBayes => LinkModel::NaiveBayes(NaiveBayes::new(params)),
            ClassifierKind::SupportVectorMachines => {
                LinkModel::SupportVectorMachines(LinearSvm::new(params, seed))
            }
            ClassifierKind::SingleLayerPerceptron => {
                LinkModel::SingleLayerPerceptron(NeuralNetwork::single_layer(params, seed))
            }
            ClassifierKind::MultiLayerPerceptron => LinkModel::MultiLayerPerceptron(
                NeuralNetwork::multi_layer(params, &params.hidden_layers, seed),
            ),
        }
    }

    fn kernel(&self) -> &dyn Classifier {
        match self {
            LinkModel::NaiveBayes(model) => model,
            LinkModel::SupportVectorMachines(model) => model,
            LinkModel::SingleLayerPerceptron(model) | LinkModel::MultiLayerPerceptron(model) => {
                model
            }
        }
    }

    fn kernel_mut(&mut self) -> &mut dyn Classifier {
        match self {
            LinkModel::NaiveBayes(model) => model,
            LinkModel::SupportVectorMachines(model) => model,
            LinkModel::SingleLayerPerceptron(model) | LinkModel::MultiLayerPerceptron(model) => {
                model
            }
        }
    }

    /// Persist the model.
    pub fn save(&self, path: &Path) -> Result<(), LinkerError> {
        write_record(path, MODEL_RECORD_VERSION, self)?;
        info!(kind = %self.kind(), path = %path.display(), "model saved");
        Ok(())
    }

    /// Load a model; a missing file is a `MissingArtifact` error naming the path.
    pub fn load(path: &Path) -> Result<Self, LinkerError> {
        let model: LinkModel = read_record(path, MODEL_RECORD_VERSION, "model")?;
        info!(kind = %model.kind(), path = %path.display(), "model loaded");
        Ok(model)
    }

    /// Align `features` to the fitted width.
    ///
    /// Missing columns are appended as sentinel-valued `missing_{i}` columns;
    /// extra columns are an error. Returns the number of columns added.
    pub fn reconcile_width(&self, features: &mut FeatureMatrix) -> Result<usize, LinkerError> {
        let expected = self.input_width().ok_or_else(|| {
            LinkerError::Configuration(format!("{} model has not been fitted", self.kind()))
        })?;
        let actual = features.width();
        if actual > expected {
            return Err(LinkerError::FeatureWidth { expected, actual });
        }
        let added = features.pad_to(expected);
        if added > 0 {
            info!(
                expected,
                actual, added, "feature matrix narrower than the model; padding missing columns"
            );
        }
        Ok(added)
    }
}

impl Classifier for LinkModel {
    fn kind(&self) -> ClassifierKind {
        match self {
            LinkModel::NaiveBayes(_) => ClassifierKind::NaiveBayes,
            LinkModel::SupportVectorMachines(_) => ClassifierKind::SupportVectorMachines,
            LinkModel::SingleLayerPerceptron(_) => ClassifierKind::SingleLayerPerceptron,
            LinkModel::MultiLayerPerceptron(_) => ClassifierKind::MultiLayerPerceptron,
        }
    }

    fn input_width(&self) -> Option<usize> {
        self.kernel().input_width()
    }

    fn fit(&mut self, features: &FeatureMatrix, positives: &PairIndex) -> Result<(), LinkerError> {
        self.kernel_mut().fit(features, positives)
    }

    fn probability(&self, features: &FeatureMatrix) -> Result<Vec<f64>, LinkerError> {
        self.kernel().probability(features)
    }
}

/// Checks shared by every kernel before fitting.
pub(crate) fn training_rows(
    features: &FeatureMatrix,
    positives: &PairIndex,
) -> Result<Vec<bool>, LinkerError> {
    if features.is_empty() {
        return Err(LinkerError::Configuration(
            "cannot fit a classifier on an empty feature matrix".to_string(),
        ));
    }
    Ok(features.labels(positives))
}

/// Width check shared by every kernel before inference.
pub(crate) fn inference_width(
    kind: ClassifierKind,
    fitted: Option<usize>,
    features: &FeatureMatrix,
) -> Result<usize, LinkerError> {
    let expected = fitted.ok_or_else(|| {
        LinkerError::Configuration(format!("{kind} model has not been fitted"))
    })?;
    if features.width() != expected {
        return Err(LinkerError::FeatureWidth {
            expected,
            actual: features.width(),
        });
    }
    Ok(expected)
}

/// Logistic function, stable for large magnitudes.
pub(crate) fn sigmoid(value: f64) -> f64 {
    if value >= 0.0 {
        1.0 / (1.0 + (-value).exp())
    } else {
        let exp = value.exp();
        exp / (1.0 + exp)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn kinds_parse_from_tags_and_aliases() {
        assert_eq!("nb".parse::<ClassifierKind>().unwrap(), ClassifierKind::NaiveBayes);
        assert_eq!(
            "multi_layer_perceptron".parse::<ClassifierKind>().unwrap(),
            ClassifierKind::MultiLayerPerceptron
        );
        let err = "random_forest".parse::<ClassifierKind>().unwrap_err();
        assert!(matches!(
            err,
            LinkerError::UnsupportedClassifier { ref tag, ref supported }
                if tag == "random_forest" && supported.contains("svm")
        ));
    }

    #[test]
    fn neural_kinds_have_no_grid() {
        assert!(ParameterGrid::for_kind(ClassifierKind::NaiveBayes).unwrap().len() > 1);
        assert!(matches!(
            ParameterGrid::for_kind(ClassifierKind::SingleLayerPerceptron),
            Err(LinkerError::Unsupported(_))
        ));
    }

    #[test]
    fn unfitted_model_refuses_inference() {
        let (features, _) = test_support::separable();
        let model = LinkModel::new(ClassifierKind::NaiveBayes, &Hyperparameters::default(), 7);
        assert!(matches!(
            model.probability(&features),
            Err(LinkerError::Configuration(_))
        ));
        let mut padded = features.clone();
        assert!(model.reconcile_width(&mut padded).is_err());
    }

    #[test]
    fn width_reconciliation_pads_narrow_and_rejects_wide() {
        let (features, positives) = test_support::separable();
        let mut model = LinkModel::new(ClassifierKind::NaiveBayes, &Hyperparameters::default(), 7);
        model.fit(&features, &positives).unwrap();

        let narrow = features.select(&[0, 1]);
        let narrow = FeatureMatrix::from_rows(
            narrow.columns()[..2].to_vec(),
            narrow.pairs().iter().cloned().collect(),
            narrow.rows().iter().map(|row| row[..2].to_vec()).collect(),
        )
        .unwrap();
        let mut padded = narrow.clone();
        assert_eq!(model.reconcile_width(&mut padded).unwrap(), 1);
        assert_eq!(padded.columns()[2], "missing_0");
        assert_eq!(model.probability(&padded).unwrap().len(), 2);

        let mut wide = features.clone();
        wide.pad_to(5);
        assert!(matches!(
            model.reconcile_width(&mut wide),
            Err(LinkerError::FeatureWidth { expected: 3, actual: 5 })
        ));
    }

    #[test]
    fn saved_models_reload_with_identical_scores() {
        let dir = tempdir().unwrap();
        let (features, positives) = test_support::separable();
        for kind in [ClassifierKind::NaiveBayes, ClassifierKind::SupportVectorMachines] {
            let mut model = LinkModel::new(kind, &Hyperparameters::default(), 11);
            model.fit(&features, &positives).unwrap();
            let path = dir.path().join(format!("{kind}_model.bin"));
            model.save(&path).unwrap();
            let loaded = LinkModel::load(&path).unwrap();
            assert_eq!(loaded.kind(), kind);
            assert_eq!(
                loaded.probability(&features).unwrap(),
                model.probability(&features).unwrap()
            );
        }
        let err = LinkModel::load(&dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, LinkerError::MissingArtifact { kind: "model", .. }));
    }

    #[test]
    fn every_kernel_separates_toy_data() {
        let (features, positives) = test_support::separable();
        let labels = features.labels(&positives);
        let params = Hyperparameters {
            epochs: 300,
            batch_size: 8,
            learning_rate: 0.5,
            validation_split: 0.0,
            hidden_layers: vec![8, 4],
            ..Hyperparameters::default()
        };
        for kind in ClassifierKind::ALL {
            let mut model = LinkModel::new(kind, &params, 5);
            model.fit(&features, &positives).unwrap();
            let predicted = model.predict(&features).unwrap();
            let correct = predicted
                .iter()
                .zip(&labels)
                .filter(|(left, right)| left == right)
                .count();
            assert!(correct >= 36, "{kind} only got {correct}/40");
            assert!(
                model
                    .probability(&features)
                    .unwrap()
                    .iter()
                    .all(|score| (0.0..=1.0).contains(score))
            );
        }
    }
}
