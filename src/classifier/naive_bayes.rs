use serde::{Deserialize, Serialize};

use super::{Classifier, ClassifierKind, Hyperparameters, inference_width, training_rows};
use crate::errors::LinkerError;
use crate::features::FeatureMatrix;
use crate::pairs::PairIndex;

/// Bernoulli naive Bayes over binarized features.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NaiveBayes {
    binarize: f64,
    alpha: f64,
    fitted: Option<BernoulliTables>,
}

/// Log prior and per-feature log probabilities, indexed `[non-match, match]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct BernoulliTables {
    width: usize,
    class_log_prior: [f64; 2],
    log_present: [Vec<f64>; 2],
    log_absent: [Vec<f64>; 2],
}

impl NaiveBayes {
    pub fn new(params: &Hyperparameters) -> Self {
        Self {
            binarize: params.binarize,
            alpha: params.alpha,
            fitted: None,
        }
    }

    fn joint_log_likelihood(&self, tables: &BernoulliTables, row: &[f64]) -> [f64; 2] {
        let mut jll = tables.class_log_prior;
        for (class, total) in jll.iter_mut().enumerate() {
            for (idx, value) in row.iter().enumerate() {
                *total += if *value > self.binarize {
                    tables.log_present[class][idx]
                } else {
                    tables.log_absent[class][idx]
                };
            }
        }
        jll
    }
}

impl Classifier for NaiveBayes {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::NaiveBayes
    }

    fn input_width(&self) -> Option<usize> {
        self.fitted.as_ref().map(|tables| tables.width)
    }

    fn fit(&mut self, features: &FeatureMatrix, positives: &PairIndex) -> Result<(), LinkerError> {
        let labels = training_rows(features, positives)?;
        if self.alpha <= 0.0 {
            return Err(LinkerError::Configuration(
                "naive Bayes smoothing alpha must be positive".to_string(),
            ));
        }
        let width = features.width();
        let mut class_count = [0usize; 2];
        let mut present = [vec![0usize; width], vec![0usize; width]];
        for (row, label) in features.rows().iter().zip(&labels) {
            let class = usize::from(*label);
            class_count[class] += 1;
            for (idx, value) in row.iter().enumerate() {
                if *value > self.binarize {
                    present[class][idx] += 1;
                }
            }
        }

        let total = labels.len() as f64;
        let class_log_prior = class_count.map(|count| (count as f64 / total).ln());
        let mut log_present = [Vec::with_capacity(width), Vec::with_capacity(width)];
        let mut log_absent = [Vec::with_capacity(width), Vec::with_capacity(width)];
        for class in 0..2 {
            let denominator = class_count[class] as f64 + 2.0 * self.alpha;
            for count in &present[class] {
                let probability = (*count as f64 + self.alpha) / denominator;
                log_present[class].push(probability.ln());
                log_absent[class].push((1.0 - probability).ln());
            }
        }
        self.fitted = Some(BernoulliTables {
            width,
            class_log_prior,
            log_present,
            log_absent,
        });
        Ok(())
    }

    fn probability(&self, features: &FeatureMatrix) -> Result<Vec<f64>, LinkerError> {
        inference_width(self.kind(), self.input_width(), features)?;
        let Some(tables) = &self.fitted else {
            return Err(LinkerError::Configuration(
                "naive_bayes model has not been fitted".to_string(),
            ));
        };
        Ok(features
            .rows()
            .iter()
            .map(|row| {
                let [non_match, matched] = self.joint_log_likelihood(tables, row);
                // An unseen class has a log prior of -inf.
                if matched == f64::NEG_INFINITY {
                    0.0
                } else if non_match == f64::NEG_INFINITY {
                    1.0
                } else {
                    super::sigmoid(matched - non_match)
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::test_support::separable;
    use crate::pairs::CandidatePair;

    #[test]
    fn binarization_threshold_decides_presence() {
        let (features, positives) = separable();
        let strict = Hyperparameters {
            binarize: 0.95,
            ..Hyperparameters::default()
        };
        let mut model = NaiveBayes::new(&strict);
        model.fit(&features, &positives).unwrap();
        // Column `a` (1.0 vs 0.0) still separates the classes.
        let scores = model.probability(&features).unwrap();
        assert!(scores[0] > 0.99);
        assert!(scores[1] < 0.01);
    }

    #[test]
    fn single_class_training_is_degenerate_but_valid() {
        let (features, _) = separable();
        let mut model = NaiveBayes::new(&Hyperparameters::default());
        model.fit(&features, &PairIndex::new()).unwrap();
        assert!(model.probability(&features).unwrap().iter().all(|score| *score == 0.0));

        let everything: PairIndex = features.pairs().iter().cloned().collect();
        model.fit(&features, &everything).unwrap();
        assert!(model.probability(&features).unwrap().iter().all(|score| *score == 1.0));
        assert!(everything.contains(&CandidatePair::new("Q0", "T0")));
    }
}
