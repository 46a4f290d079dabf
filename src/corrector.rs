//! Deterministic rules applied to raw classifier scores before thresholding.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::constants::corrector::{KNOWLEDGE_BASE_HOST_MARKER, TRAILING_QID_PATTERN};
use crate::data::{EntityRecord, Field, Prediction, RecordSet};
use crate::pairs::PairIndex;

static TRAILING_QID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(TRAILING_QID_PATTERN).expect("trailing item id pattern is valid")
});

/// How many predictions each rule forced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CorrectionStats {
    /// Predictions zeroed by the field-exact-match veto.
    pub vetoed: usize,
    /// Predictions forced to 0 or 1 by the self-reference override.
    pub overridden: usize,
}

impl CorrectionStats {
    pub fn absorb(&mut self, other: CorrectionStats) {
        self.vetoed += other.vetoed;
        self.overridden += other.overridden;
    }
}

/// Post-classification correction rules.
#[derive(Clone, Debug, Default)]
pub struct PostClassification {
    override_fields: Vec<Field>,
}

impl PostClassification {
    /// `override_fields` drive the exact-match veto; empty disables it.
    pub fn new(override_fields: Vec<Field>) -> Self {
        Self { override_fields }
    }

    /// Apply the veto, then the self-reference override, in place.
    ///
    /// Both rules are idempotent; the override wins whenever it fires.
    pub fn apply(
        &self,
        predictions: &mut [Prediction],
        source: &RecordSet,
        target: &RecordSet,
    ) -> CorrectionStats {
        let mut stats = CorrectionStats::default();
        for prediction in predictions.iter_mut() {
            if !self.override_fields.is_empty()
                && self.values_disjoint(&prediction.pair.qid, source, &prediction.pair.tid, target)
            {
                prediction.score = 0.0;
                stats.vetoed += 1;
            }
            if let Some(record) = target.get(&prediction.pair.tid)
                && let Some(encoded) = self_reference(record)
            {
                let forced = if encoded == prediction.pair.qid { 1.0 } else { 0.0 };
                debug!(
                    qid = %prediction.pair.qid,
                    tid = %prediction.pair.tid,
                    encoded,
                    before = prediction.score,
                    after = forced,
                    "self-referencing target link overrides prediction"
                );
                prediction.score = forced;
                stats.overridden += 1;
            }
        }
        stats
    }

    /// Union of the override fields' values on each side; disjoint sets
    /// (including two empty ones) veto the pair.
    fn values_disjoint(
        &self,
        qid: &str,
        source: &RecordSet,
        tid: &str,
        target: &RecordSet,
    ) -> bool {
        let collect = |records: &RecordSet, id: &str| -> BTreeSet<String> {
            self.override_fields
                .iter()
                .filter_map(|field| records.values_for(id, *field))
                .flatten()
                .collect()
        };
        collect(source, qid).is_disjoint(&collect(target, tid))
    }
}

/// Knowledge-base item encoded by the first link of `record` that points at
/// the knowledge base and ends in an item id.
pub fn self_reference(record: &EntityRecord) -> Option<&str> {
    record
        .urls
        .as_ref()?
        .iter()
        .filter(|url| url.contains(KNOWLEDGE_BASE_HOST_MARKER))
        .find_map(|url| TRAILING_QID.captures(url))
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str())
}

/// Keep predictions scoring at least `threshold`, dropping repeated pairs
/// (first occurrence wins). Idempotent.
pub fn threshold_and_dedup(predictions: Vec<Prediction>, threshold: f64) -> Vec<Prediction> {
    let mut seen = PairIndex::new();
    predictions
        .into_iter()
        .filter(|prediction| prediction.score >= threshold)
        .filter(|prediction| seen.insert(prediction.pair.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::CandidatePair;

    fn prediction(qid: &str, tid: &str, score: f64) -> Prediction {
        Prediction::new(CandidatePair::new(qid, tid), score)
    }

    fn records() -> (RecordSet, RecordSet) {
        let source: RecordSet = [
            EntityRecord::new("Q42").with_names(["Douglas Adams"]),
            EntityRecord::new("Q7").with_names(["Someone Else"]),
        ]
        .into_iter()
        .map(EntityRecord::with_derived_tokens)
        .collect();
        let target: RecordSet = [
            EntityRecord::new("T1")
                .with_names(["Douglas Adams"])
                .with_urls([
                    "https://example.org/wikidata-fan-page",
                    "https://www.wikidata.org/wiki/Q42",
                ]),
            EntityRecord::new("T2").with_names(["Douglas Noel Adams"]),
        ]
        .into_iter()
        .map(EntityRecord::with_derived_tokens)
        .collect();
        (source, target)
    }

    #[test]
    fn self_reference_forces_one_or_zero() {
        let (source, target) = records();
        let mut predictions = vec![prediction("Q42", "T1", 0.2), prediction("Q7", "T1", 0.9)];
        let stats = PostClassification::default().apply(&mut predictions, &source, &target);
        assert_eq!(predictions[0].score, 1.0);
        assert_eq!(predictions[1].score, 0.0);
        assert_eq!(stats, CorrectionStats { vetoed: 0, overridden: 2 });
    }

    #[test]
    fn veto_zeroes_disjoint_fields_only() {
        let (source, target) = records();
        let corrector = PostClassification::new(vec![Field::Name]);
        let mut predictions = vec![prediction("Q42", "T2", 0.8), prediction("Q7", "T2", 0.8)];
        let stats = corrector.apply(&mut predictions, &source, &target);
        assert_eq!(predictions[0].score, 0.0);
        assert_eq!(stats.vetoed, 2);

        let tokens = PostClassification::new(vec![Field::NameTokens]);
        let mut predictions = vec![prediction("Q42", "T2", 0.8)];
        tokens.apply(&mut predictions, &source, &target);
        assert_eq!(predictions[0].score, 0.8);
    }

    #[test]
    fn override_takes_precedence_over_veto() {
        let (source, target) = records();
        let corrector = PostClassification::new(vec![Field::DateOfBirth]);
        let mut predictions = vec![prediction("Q42", "T1", 0.3)];
        let stats = corrector.apply(&mut predictions, &source, &target);
        assert_eq!(predictions[0].score, 1.0);
        assert_eq!(stats, CorrectionStats { vetoed: 1, overridden: 1 });
    }

    #[test]
    fn no_fields_and_no_links_pass_through() {
        let (source, target) = records();
        let mut predictions = vec![prediction("Q42", "T2", 0.37)];
        let stats = PostClassification::default().apply(&mut predictions, &source, &target);
        assert_eq!(predictions[0].score, 0.37);
        assert_eq!(stats, CorrectionStats::default());
    }

    #[test]
    fn threshold_and_dedup_is_idempotent() {
        let predictions = vec![
            prediction("Q1", "T1", 0.9),
            prediction("Q1", "T1", 0.7),
            prediction("Q2", "T2", 0.4),
            prediction("Q3", "T3", 0.5),
        ];
        let once = threshold_and_dedup(predictions, 0.5);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].score, 0.9);
        let twice = threshold_and_dedup(once.clone(), 0.5);
        assert_eq!(once, twice);
    }
}
