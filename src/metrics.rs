use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Metric;
use crate::pairs::PairIndex;

/// Confusion counts of predicted links against true links.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tn: usize,
}

impl ConfusionMatrix {
    /// Compare predicted and true link sets over `total` candidate pairs.
    pub fn from_links(truth: &PairIndex, predicted: &PairIndex, total: usize) -> Self {
        let tp = predicted.intersection(truth).len();
        let fp = predicted.len() - tp;
        let fn_ = truth.len() - tp;
        Self {
            tp,
            fp,
            fn_,
            tn: total.saturating_sub(tp + fp + fn_),
        }
    }

    pub fn performance(&self) -> Performance {
        let precision = ratio(self.tp, self.tp + self.fp);
        let recall = ratio(self.tp, self.tp + self.fn_);
        let fscore = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Performance {
            precision,
            recall,
            fscore,
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    /// Two-by-two layout: true matches on the first row, predicted matches in the first column.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[[{} {}]", self.tp, self.fn_)?;
        write!(f, " [{} {}]]", self.fp, self.tn)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Precision, recall, and F-score; each is 0 when undefined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub precision: f64,
    pub recall: f64,
    pub fscore: f64,
}

impl Performance {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Precision => self.precision,
            Metric::Recall => self.recall,
            Metric::F1 => self.fscore,
        }
    }
}

/// Mean and population standard deviation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
}

impl MeanStd {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let count = values.len() as f64;
        let mean = values.iter().sum::<f64>() / count;
        let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / count;
        Self {
            mean,
            std: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::CandidatePair;

    fn index(ids: &[u32]) -> PairIndex {
        ids.iter()
            .map(|id| CandidatePair::new(format!("Q{id}"), format!("T{id}")))
            .collect()
    }

    #[test]
    fn confusion_counts_and_scores() {
        let truth = index(&[1, 2, 3, 4]);
        let predicted = index(&[1, 2, 5]);
        let matrix = ConfusionMatrix::from_links(&truth, &predicted, 10);
        assert_eq!(
            matrix,
            ConfusionMatrix {
                tp: 2,
                fp: 1,
                fn_: 2,
                tn: 5
            }
        );
        let performance = matrix.performance();
        assert!((performance.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((performance.recall - 0.5).abs() < 1e-9);
        assert!((performance.fscore - 4.0 / 7.0).abs() < 1e-9);
        assert_eq!(performance.get(Metric::Recall), performance.recall);
    }

    #[test]
    fn undefined_scores_are_zero() {
        let empty = ConfusionMatrix::from_links(&PairIndex::new(), &PairIndex::new(), 3);
        assert_eq!(empty.performance(), Performance::default());
        assert_eq!(empty.tn, 3);
    }

    #[test]
    fn mean_std_is_population_based() {
        let stats = MeanStd::from_values(&[1.0, 3.0]);
        assert!((stats.mean - 2.0).abs() < 1e-9);
        assert!((stats.std - 1.0).abs() < 1e-9);
        assert_eq!(MeanStd::from_values(&[]), MeanStd::default());
    }
}
