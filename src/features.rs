//! Feature-vector extraction over candidate pairs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

use crate::constants::features::{MISSING_COLUMN_PREFIX, MISSING_VALUE};
use crate::data::{DateValue, EntityRecord, Field, RecordSet};
use crate::errors::LinkerError;
use crate::pairs::{CandidatePair, PairIndex};
use crate::types::ColumnName;
use crate::utils::{jaccard, overlap_coefficient};

/// One comparison between aligned attributes of a source and a target record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    /// 1.0 when any normalized name is shared.
    NameExact,
    /// Best Jaro-Winkler similarity over all name pairs.
    NameSimilarity,
    /// Jaccard similarity of name tokens.
    NameTokens,
    /// 1.0 when any URL is shared.
    UrlExact,
    /// Jaccard similarity of URL tokens.
    UrlTokens,
    /// Birth dates equal at the coarser precision.
    BirthDate,
    /// Death dates equal at the coarser precision.
    DeathDate,
    /// Overlap coefficient of description tokens.
    DescriptionTokens,
}

impl Comparison {
    /// Fixed column order shared by every matrix the extractor produces.
    pub const ALL: [Comparison; 8] = [
        Comparison::NameExact,
        Comparison::NameSimilarity,
        Comparison::NameTokens,
        Comparison::UrlExact,
        Comparison::UrlTokens,
        Comparison::BirthDate,
        Comparison::DeathDate,
        Comparison::DescriptionTokens,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Comparison::NameExact => "name_exact",
            Comparison::NameSimilarity => "name_similarity",
            Comparison::NameTokens => "name_tokens",
            Comparison::UrlExact => "url_exact",
            Comparison::UrlTokens => "url_tokens",
            Comparison::BirthDate => "birth_date",
            Comparison::DeathDate => "death_date",
            Comparison::DescriptionTokens => "description_tokens",
        }
    }

    /// Compare two records; `None` when either side lacks the attribute.
    fn compare(self, source: &EntityRecord, target: &EntityRecord) -> Option<f64> {
        match self {
            Comparison::NameExact => shared_value(source, target, Field::Name),
            Comparison::NameSimilarity => {
                let left = source.names.as_ref()?;
                let right = target.names.as_ref()?;
                left.iter()
                    .flat_map(|a| {
                        right
                            .iter()
                            .map(move |b| jaro_winkler(&a.to_lowercase(), &b.to_lowercase()))
                    })
                    .reduce(f64::max)
            }
            Comparison::NameTokens => token_score(source, target, Field::NameTokens, jaccard),
            Comparison::UrlExact => shared_value(source, target, Field::Url),
            Comparison::UrlTokens => token_score(source, target, Field::UrlTokens, jaccard),
            Comparison::BirthDate => date_score(source.birth, target.birth),
            Comparison::DeathDate => date_score(source.death, target.death),
            Comparison::DescriptionTokens => token_score(
                source,
                target,
                Field::DescriptionTokens,
                overlap_coefficient,
            ),
        }
    }
}

fn shared_value(source: &EntityRecord, target: &EntityRecord, field: Field) -> Option<f64> {
    let left = source.values(field)?;
    let right = target.values(field)?;
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some(if left.is_disjoint(&right) { 0.0 } else { 1.0 })
}

fn token_score(
    source: &EntityRecord,
    target: &EntityRecord,
    field: Field,
    score: fn(&BTreeSet<String>, &BTreeSet<String>) -> Option<f64>,
) -> Option<f64> {
    score(&source.values(field)?, &target.values(field)?)
}

fn date_score(source: Option<DateValue>, target: Option<DateValue>) -> Option<f64> {
    let (source, target) = (source?, target?);
    Some(if source.matches(&target) { 1.0 } else { 0.0 })
}

/// Fixed-width feature rows, one per unique candidate pair.
///
/// Row `i` belongs to the pair at position `i` of the pair index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeatureMatrix {
    columns: Vec<ColumnName>,
    pairs: PairIndex,
    rows: Vec<Vec<f64>>,
}

impl PartialEq for FeatureMatrix {
    /// Row-wise equality: pair order matters here, unlike for a bare index.
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.rows == other.rows
            && self.pairs.iter().eq(other.pairs.iter())
    }
}

impl FeatureMatrix {
    /// Empty matrix with the given column schema.
    pub fn with_columns(columns: Vec<ColumnName>) -> Self {
        Self {
            columns,
            pairs: PairIndex::new(),
            rows: Vec::new(),
        }
    }

    /// Build a matrix from parts, checking widths and pair uniqueness.
    pub fn from_rows(
        columns: Vec<ColumnName>,
        pairs: Vec<CandidatePair>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, LinkerError> {
        let mut matrix = Self::with_columns(columns);
        if pairs.len() != rows.len() {
            return Err(LinkerError::Configuration(format!(
                "feature matrix has {} pairs but {} rows",
                pairs.len(),
                rows.len()
            )));
        }
        for (pair, row) in pairs.into_iter().zip(rows) {
            matrix.push(pair, row)?;
        }
        Ok(matrix)
    }

    fn push(&mut self, pair: CandidatePair, row: Vec<f64>) -> Result<(), LinkerError> {
        if row.len() != self.columns.len() {
            return Err(LinkerError::FeatureWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        if self.pairs.contains(&pair) {
            return Err(LinkerError::Configuration(format!(
                "feature matrix already has a row for ({}, {})",
                pair.qid, pair.tid
            )));
        }
        self.pairs.insert(pair);
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnName] {
        &self.columns
    }

    /// Pairs in row order.
    pub fn pairs(&self) -> &PairIndex {
        &self.pairs
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The matrix's pairs as a set.
    pub fn index(&self) -> PairIndex {
        self.pairs.clone()
    }

    /// Binary labels: whether each row's pair is in `positives`.
    pub fn labels(&self, positives: &PairIndex) -> Vec<bool> {
        self.pairs.iter().map(|pair| positives.contains(pair)).collect()
    }

    /// Concatenate `other` below `self`; the column schemas must agree and a
    /// pair already present is skipped.
    pub fn append(&mut self, other: FeatureMatrix) -> Result<(), LinkerError> {
        if self.columns.is_empty() && self.rows.is_empty() {
            self.columns = other.columns.clone();
        }
        if self.columns != other.columns {
            return Err(LinkerError::Configuration(format!(
                "cannot concatenate feature matrices with different columns ({} vs {})",
                self.columns.join(","),
                other.columns.join(",")
            )));
        }
        for (pair, row) in other.pairs.iter().zip(other.rows) {
            if self.pairs.insert(pair.clone()) {
                self.rows.push(row);
            }
        }
        Ok(())
    }

    /// Sub-matrix of the given row indices, in the given order.
    ///
    /// Repeated or out-of-range indices are skipped.
    pub fn select(&self, indices: &[usize]) -> FeatureMatrix {
        let mut selected = FeatureMatrix::with_columns(self.columns.clone());
        for &idx in indices {
            if let (Some(pair), Some(row)) = (self.pairs.get(idx), self.rows.get(idx))
                && selected.pairs.insert(pair.clone())
            {
                selected.rows.push(row.clone());
            }
        }
        selected
    }

    /// Append sentinel-valued `missing_{i}` columns until the matrix is `width` wide.
    ///
    /// Returns the number of columns added; a wider matrix is left untouched.
    pub fn pad_to(&mut self, width: usize) -> usize {
        let missing = width.saturating_sub(self.columns.len());
        for idx in 0..missing {
            self.columns.push(format!("{MISSING_COLUMN_PREFIX}{idx}"));
        }
        for row in &mut self.rows {
            row.resize(width.max(row.len()), MISSING_VALUE);
        }
        missing
    }
}

/// Column names produced by [`extract`].
pub fn feature_columns() -> Vec<ColumnName> {
    Comparison::ALL
        .iter()
        .map(|comparison| comparison.column().to_string())
        .collect()
}

/// Compute one feature row per candidate pair.
///
/// Pure function of its inputs. A pair whose record is missing on either
/// side gets an all-sentinel row.
pub fn extract(pairs: &PairIndex, source: &RecordSet, target: &RecordSet) -> FeatureMatrix {
    let mut matrix = FeatureMatrix::with_columns(feature_columns());
    for pair in pairs {
        let row = match (source.get(&pair.qid), target.get(&pair.tid)) {
            (Some(source_record), Some(target_record)) => Comparison::ALL
                .iter()
                .map(|comparison| {
                    comparison
                        .compare(source_record, target_record)
                        .unwrap_or(MISSING_VALUE)
                })
                .collect(),
            _ => vec![MISSING_VALUE; Comparison::ALL.len()],
        };
        // Pairs come from an index, so each is inserted once.
        matrix.pairs.insert(pair.clone());
        matrix.rows.push(row);
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatePrecision, EntityRecord};
    use chrono::NaiveDate;

    fn records() -> (RecordSet, RecordSet) {
        let born = DateValue::new(
            NaiveDate::from_ymd_opt(1926, 5, 26).unwrap(),
            DatePrecision::Day,
        );
        let source: RecordSet = [EntityRecord::new("Q1")
            .with_names(["Miles Davis"])
            .with_birth(born)
            .with_derived_tokens()]
        .into_iter()
        .collect();
        let target: RecordSet = [
            EntityRecord::new("T1")
                .with_names(["miles davis"])
                .with_birth(DateValue::new(
                    NaiveDate::from_ymd_opt(1926, 1, 1).unwrap(),
                    DatePrecision::Year,
                ))
                .with_urls(["https://milesdavis.com"])
                .with_derived_tokens(),
            EntityRecord::new("T2").with_names(["Kind of Blue"]).with_derived_tokens(),
        ]
        .into_iter()
        .collect();
        (source, target)
    }

    #[test]
    fn missing_attributes_yield_sentinel() {
        let (source, target) = records();
        let pairs: PairIndex = [CandidatePair::new("Q1", "T1")].into_iter().collect();
        let matrix = extract(&pairs, &source, &target);
        let row = &matrix.rows()[0];
        assert_eq!(matrix.width(), Comparison::ALL.len());
        assert_eq!(row[0], 1.0);
        assert!((row[1] - 1.0).abs() < 1e-9);
        assert_eq!(row[2], 1.0);
        // Source has no URLs at all.
        assert_eq!(row[3], MISSING_VALUE);
        assert_eq!(row[4], MISSING_VALUE);
        assert_eq!(row[5], 1.0);
        assert_eq!(row[6], MISSING_VALUE);
        assert_eq!(row[7], MISSING_VALUE);
    }

    #[test]
    fn rows_follow_pair_order_and_unknown_records_are_sentinel() {
        let (source, target) = records();
        let pairs: PairIndex = [
            CandidatePair::new("Q1", "T2"),
            CandidatePair::new("Q1", "T1"),
            CandidatePair::new("Q1", "T404"),
        ]
        .into_iter()
        .collect();
        let matrix = extract(&pairs, &source, &target);
        assert_eq!(matrix.pairs().get(0).unwrap().tid, "T2");
        assert_eq!(matrix.rows()[0][0], 0.0);
        assert!(matrix.rows()[2].iter().all(|value| *value == MISSING_VALUE));
    }

    #[test]
    fn padding_keeps_existing_columns() {
        let (source, target) = records();
        let pairs: PairIndex = [CandidatePair::new("Q1", "T1")].into_iter().collect();
        let original = extract(&pairs, &source, &target);
        let mut padded = original.clone();
        assert_eq!(padded.pad_to(11), 3);
        assert_eq!(padded.width(), 11);
        assert_eq!(padded.columns()[8], "missing_0");
        assert_eq!(&padded.rows()[0][..8], &original.rows()[0][..]);
        assert!(padded.rows()[0][8..].iter().all(|v| *v == MISSING_VALUE));
        assert_eq!(padded.pad_to(4), 0);
        assert_eq!(padded.width(), 11);
    }

    #[test]
    fn append_skips_known_pairs_and_rejects_other_schemas() {
        let (source, target) = records();
        let first: PairIndex = [CandidatePair::new("Q1", "T1")].into_iter().collect();
        let second: PairIndex = [CandidatePair::new("Q1", "T1"), CandidatePair::new("Q1", "T2")]
            .into_iter()
            .collect();
        let mut all = FeatureMatrix::default();
        all.append(extract(&first, &source, &target)).unwrap();
        all.append(extract(&second, &source, &target)).unwrap();
        assert_eq!(all.len(), 2);

        let other = FeatureMatrix::with_columns(vec!["x".to_string()]);
        assert!(all.append(other).is_err());
    }

    #[test]
    fn from_rows_checks_width() {
        let err = FeatureMatrix::from_rows(
            vec!["a".to_string()],
            vec![CandidatePair::new("Q1", "T1")],
            vec![vec![0.5, 0.5]],
        )
        .unwrap_err();
        assert!(matches!(err, LinkerError::FeatureWidth { expected: 1, actual: 2 }));
    }

    #[test]
    fn from_rows_rejects_repeated_pairs() {
        let pair = CandidatePair::new("Q1", "T1");
        let err = FeatureMatrix::from_rows(
            vec!["a".to_string()],
            vec![pair.clone(), pair],
            vec![vec![0.1], vec![0.9]],
        )
        .unwrap_err();
        assert!(matches!(err, LinkerError::Configuration(msg) if msg.contains("(Q1, T1)")));
    }

    #[test]
    fn select_keeps_rows_aligned_with_pairs() {
        let matrix = FeatureMatrix::from_rows(
            vec!["a".to_string()],
            (0..4)
                .map(|idx| CandidatePair::new(format!("Q{idx}"), "T1"))
                .collect(),
            (0..4).map(|idx| vec![f64::from(idx)]).collect(),
        )
        .unwrap();
        let picked = matrix.select(&[3, 1, 3, 9]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.pairs().get(0).unwrap().qid, "Q3");
        assert_eq!(picked.rows(), &[vec![3.0], vec![1.0]]);
    }
}
