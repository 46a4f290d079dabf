use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Classifier, ClassifierKind, Hyperparameters, inference_width, training_rows};
use crate::constants::classifier::{KERNEL_SEED, PLATT_ITERATIONS, SVM_EPOCHS};
use crate::errors::LinkerError;
use crate::features::FeatureMatrix;
use crate::pairs::PairIndex;

/// Linear SVM trained with Pegasos, with Platt-scaled probabilities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearSvm {
    c: f64,
    seed: u64,
    fitted: Option<SvmWeights>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SvmWeights {
    /// Feature weights followed by the bias weight.
    weights: Vec<f64>,
    platt_a: f64,
    platt_b: f64,
}

impl SvmWeights {
    fn decision(&self, row: &[f64]) -> f64 {
        let (bias, weights) = match self.weights.split_last() {
            Some((bias, weights)) => (*bias, weights),
            None => (0.0, &[][..]),
        };
        weights.iter().zip(row).map(|(w, x)| w * x).sum::<f64>() + bias
    }
}

impl LinearSvm {
    pub fn new(params: &Hyperparameters, seed: u64) -> Self {
        Self {
            c: params.c,
            seed,
            fitted: None,
        }
    }
}

impl Classifier for LinearSvm {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::SupportVectorMachines
    }

    fn input_width(&self) -> Option<usize> {
        self.fitted
            .as_ref()
            .map(|fitted| fitted.weights.len().saturating_sub(1))
    }

    fn fit(&mut self, features: &FeatureMatrix, positives: &PairIndex) -> Result<(), LinkerError> {
        let labels = training_rows(features, positives)?;
        if self.c <= 0.0 {
            return Err(LinkerError::Configuration(
                "SVM regularization constant must be positive".to_string(),
            ));
        }
        let rows = features.rows();
        let lambda = 1.0 / (self.c * rows.len() as f64);
        let mut rng = StdRng::seed_from_u64(self.seed ^ KERNEL_SEED);
        // Bias is folded in as a constant trailing input.
        let mut weights = vec![0.0; features.width() + 1];
        let steps = SVM_EPOCHS * rows.len();
        for step in 1..=steps {
            let idx = rng.random_range(0..rows.len());
            let target = if labels[idx] { 1.0 } else { -1.0 };
            let eta = 1.0 / (lambda * step as f64);
            let margin = target * augmented_dot(&weights, &rows[idx]);
            let shrink = 1.0 - eta * lambda;
            for weight in weights.iter_mut() {
                *weight *= shrink;
            }
            if margin < 1.0 {
                for (weight, value) in weights.iter_mut().zip(augmented(&rows[idx])) {
                    *weight += eta * target * value;
                }
            }
        }

        let mut fitted = SvmWeights {
            weights,
            platt_a: 0.0,
            platt_b: 0.0,
        };
        let decisions: Vec<f64> = rows.iter().map(|row| fitted.decision(row)).collect();
        let (platt_a, platt_b) = fit_platt(&decisions, &labels);
        debug!(platt_a, platt_b, steps, "linear SVM fitted");
        fitted.platt_a = platt_a;
        fitted.platt_b = platt_b;
        self.fitted = Some(fitted);
        Ok(())
    }

    fn probability(&self, features: &FeatureMatrix) -> Result<Vec<f64>, LinkerError> {
        inference_width(self.kind(), self.input_width(), features)?;
        let fitted = self.fitted.as_ref().ok_or_else(|| {
            LinkerError::Configuration("support_vector_machines model has not been fitted".into())
        })?;
        Ok(features
            .rows()
            .iter()
            .map(|row| super::sigmoid(-(fitted.platt_a * fitted.decision(row) + fitted.platt_b)))
            .collect())
    }
}

fn augmented(row: &[f64]) -> impl Iterator<Item = f64> + '_ {
    row.iter().copied().chain(std::iter::once(1.0))
}

fn augmented_dot(weights: &[f64], row: &[f64]) -> f64 {
    weights.iter().zip(augmented(row)).map(|(w, x)| w * x).sum()
}

/// Fit `P(match | f) = 1 / (1 + exp(a * f + b))` by Newton's method with
/// backtracking, using Platt's smoothed targets.
fn fit_platt(decisions: &[f64], labels: &[bool]) -> (f64, f64) {
    let positives = labels.iter().filter(|label| **label).count() as f64;
    let negatives = labels.len() as f64 - positives;
    let high = (positives + 1.0) / (positives + 2.0);
    let low = 1.0 / (negatives + 2.0);
    let targets: Vec<f64> = labels
        .iter()
        .map(|label| if *label { high } else { low })
        .collect();

    let objective = |a: f64, b: f64| -> f64 {
        decisions
            .iter()
            .zip(&targets)
            .map(|(f, t)| {
                let fab = f * a + b;
                if fab >= 0.0 {
                    t * fab + (1.0 + (-fab).exp()).ln()
                } else {
                    (t - 1.0) * fab + (1.0 + fab.exp()).ln()
                }
            })
            .sum()
    };

    let sigma = 1e-12;
    let min_step = 1e-10;
    let mut a = 0.0;
    let mut b = ((negatives + 1.0) / (positives + 1.0)).ln();
    let mut value = objective(a, b);
    for _ in 0..PLATT_ITERATIONS {
        let (mut h11, mut h22, mut h21, mut g1, mut g2) = (sigma, sigma, 0.0, 0.0, 0.0);
        for (f, t) in decisions.iter().zip(&targets) {
            let fab = f * a + b;
            let (p, q) = if fab >= 0.0 {
                let e = (-fab).exp();
                (e / (1.0 + e), 1.0 / (1.0 + e))
            } else {
                let e = fab.exp();
                (1.0 / (1.0 + e), e / (1.0 + e))
            };
            let d2 = p * q;
            h11 += f * f * d2;
            h22 += d2;
            h21 += f * d2;
            let d1 = t - p;
            g1 += f * d1;
            g2 += d1;
        }
        if g1.abs() < 1e-5 && g2.abs() < 1e-5 {
            break;
        }
        let det = h11 * h22 - h21 * h21;
        let delta_a = -(h22 * g1 - h21 * g2) / det;
        let delta_b = -(-h21 * g1 + h11 * g2) / det;
        let slope = g1 * delta_a + g2 * delta_b;
        let mut step = 1.0;
        while step >= min_step {
            let (next_a, next_b) = (a + step * delta_a, b + step * delta_b);
            let next = objective(next_a, next_b);
            if next < value + 1e-4 * step * slope {
                a = next_a;
                b = next_b;
                value = next;
                break;
            }
            step /= 2.0;
        }
        if step < min_step {
            break;
        }
    }
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::test_support::separable;

    #[test]
    fn same_seed_same_model() {
        let (features, positives) = separable();
        let mut first = LinearSvm::new(&Hyperparameters::default(), 3);
        let mut second = LinearSvm::new(&Hyperparameters::default(), 3);
        first.fit(&features, &positives).unwrap();
        second.fit(&features, &positives).unwrap();
        assert_eq!(
            first.probability(&features).unwrap(),
            second.probability(&features).unwrap()
        );
    }

    #[test]
    fn platt_scaling_orders_scores_by_margin() {
        let (features, positives) = separable();
        let mut model = LinearSvm::new(&Hyperparameters::default(), 3);
        model.fit(&features, &positives).unwrap();
        let scores = model.probability(&features).unwrap();
        // Even rows are matches.
        assert!(scores[0] > 0.5);
        assert!(scores[1] < 0.5);
    }

    #[test]
    fn platt_fit_on_clean_margins() {
        let decisions = [-2.0, -1.5, -1.0, 1.0, 1.5, 2.0];
        let labels = [false, false, false, true, true, true];
        let (a, b) = fit_platt(&decisions, &labels);
        assert!(a < 0.0);
        assert!(b.abs() < 1e-6);
    }
}
