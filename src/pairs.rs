//! Candidate pair index with set semantics.

use std::collections::BTreeSet;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::types::{Qid, Tid};

/// An ordered `(QID, TID)` candidate pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidatePair {
    pub qid: Qid,
    pub tid: Tid,
}

impl CandidatePair {
    pub fn new(qid: impl Into<Qid>, tid: impl Into<Tid>) -> Self {
        Self {
            qid: qid.into(),
            tid: tid.into(),
        }
    }
}

/// Set of candidate pairs.
///
/// Backed by an insertion-ordered hash set: membership and set algebra are
/// hash based, iteration order is the order pairs were first inserted, which
/// keeps feature-matrix rows deterministic.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PairIndex {
    pairs: IndexSet<CandidatePair>,
}

impl PairIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair; returns `false` when it was already present.
    pub fn insert(&mut self, pair: CandidatePair) -> bool {
        self.pairs.insert(pair)
    }

    pub fn contains(&self, pair: &CandidatePair) -> bool {
        self.pairs.contains(pair)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidatePair> {
        self.pairs.iter()
    }

    /// Pair at insertion position `idx`.
    pub fn get(&self, idx: usize) -> Option<&CandidatePair> {
        self.pairs.get_index(idx)
    }

    /// Pairs in `self` followed by pairs only in `other`.
    pub fn union(&self, other: &PairIndex) -> PairIndex {
        let mut merged = self.clone();
        merged.extend_from(other);
        merged
    }

    /// In-place union, preserving `self`'s order.
    pub fn extend_from(&mut self, other: &PairIndex) {
        for pair in other.iter() {
            if !self.pairs.contains(pair) {
                self.pairs.insert(pair.clone());
            }
        }
    }

    /// Pairs of `self` that are also in `other`, in `self`'s order.
    pub fn intersection(&self, other: &PairIndex) -> PairIndex {
        self.iter()
            .filter(|pair| other.contains(pair))
            .cloned()
            .collect()
    }

    /// Pairs of `self` that are not in `other`, in `self`'s order.
    pub fn difference(&self, other: &PairIndex) -> PairIndex {
        self.iter()
            .filter(|pair| !other.contains(pair))
            .cloned()
            .collect()
    }

    /// Distinct target identifiers referenced by the index.
    pub fn target_ids(&self) -> BTreeSet<Tid> {
        self.iter().map(|pair| pair.tid.clone()).collect()
    }

    /// Distinct source identifiers referenced by the index.
    pub fn source_ids(&self) -> BTreeSet<Qid> {
        self.iter().map(|pair| pair.qid.clone()).collect()
    }
}

impl PartialEq for PairIndex {
    /// Set equality; insertion order is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|pair| other.contains(pair))
    }
}

impl Eq for PairIndex {}

impl FromIterator<CandidatePair> for PairIndex {
    fn from_iter<T: IntoIterator<Item = CandidatePair>>(iter: T) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PairIndex {
    type Item = &'a CandidatePair;
    type IntoIter = indexmap::set::Iter<'a, CandidatePair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}
