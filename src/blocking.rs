//! Candidate pair generation (blocking) against a target catalog.
//!
//! Exact-match blocking pairs source records with target records sharing a
//! value of the configured fields. Full-text blocking widens recall when
//! building training sets. Positive recovery keeps only those known links
//! that blocking actually reaches.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::config::BlockingConfig;
use crate::data::{Field, RecordSet};
use crate::errors::LinkerError;
use crate::pairs::{CandidatePair, PairIndex};
use crate::types::Tid;
use crate::utils::tokenize;

/// Catalog storage reader consumed by blocking and the pipeline.
///
/// Implementations front the catalog's storage; the linker only ever asks for
/// records it has candidates for, so the target side is never loaded in full.
pub trait TargetCatalog: Send + Sync {
    /// Stable catalog identifier used in logs.
    fn id(&self) -> &str;
    /// Target ids whose `field` contains `value` (exact match).
    fn lookup(&self, field: Field, value: &str) -> Result<Vec<Tid>, LinkerError>;
    /// Best `top_n` target ids for a free-text query, best first.
    fn full_text_search(&self, query: &str, top_n: usize) -> Result<Vec<Tid>, LinkerError>;
    /// Records for the given ids; unknown ids are skipped.
    fn records(&self, ids: &BTreeSet<Tid>) -> Result<RecordSet, LinkerError>;
    /// Whether the catalog holds `tid`.
    fn contains(&self, tid: &str) -> Result<bool, LinkerError>;
}

/// In-memory catalog with per-field inverted indexes.
pub struct InMemoryCatalog {
    id: String,
    records: RecordSet,
    index: HashMap<Field, HashMap<String, Vec<Tid>>>,
}

impl InMemoryCatalog {
    /// Build a catalog, indexing every field of every record.
    pub fn new(id: impl Into<String>, records: RecordSet) -> Self {
        let mut index: HashMap<Field, HashMap<String, Vec<Tid>>> = HashMap::new();
        for record in records.iter() {
            for field in Field::ALL {
                let Some(values) = record.values(field) else {
                    continue;
                };
                let by_value = index.entry(field).or_default();
                for value in values {
                    by_value.entry(value).or_default().push(record.id.clone());
                }
            }
        }
        Self {
            id: id.into(),
            records,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl TargetCatalog for InMemoryCatalog {
    fn id(&self) -> &str {
        &self.id
    }

    fn lookup(&self, field: Field, value: &str) -> Result<Vec<Tid>, LinkerError> {
        Ok(self
            .index
            .get(&field)
            .and_then(|by_value| by_value.get(value))
            .cloned()
            .unwrap_or_default())
    }

    fn full_text_search(&self, query: &str, top_n: usize) -> Result<Vec<Tid>, LinkerError> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(usize, usize, &String)> = Vec::new();
        for (position, record) in self.records.iter().enumerate() {
            let mut searchable = record.name_tokens.clone().unwrap_or_default();
            if let Some(description) = &record.description_tokens {
                searchable.extend(description.iter().cloned());
            }
            let hits = query_tokens.intersection(&searchable).count();
            if hits > 0 {
                scored.push((hits, position, &record.id));
            }
        }
        // Best score first, catalog order breaks ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(scored
            .into_iter()
            .take(top_n)
            .map(|(_, _, id)| id.clone())
            .collect())
    }

    fn records(&self, ids: &BTreeSet<Tid>) -> Result<RecordSet, LinkerError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }

    fn contains(&self, tid: &str) -> Result<bool, LinkerError> {
        Ok(self.records.contains(tid))
    }
}

/// Exact-match blocking: one pair per (source record, target record) sharing a value.
///
/// Each distinct value in the chunk is looked up once. Pair order follows
/// source order, then sorted value order, then the catalog's answer order.
pub fn block(
    source_chunk: &RecordSet,
    catalog: &dyn TargetCatalog,
    blocking: &BlockingConfig,
) -> Result<PairIndex, LinkerError> {
    let mut hits: HashMap<String, Vec<Tid>> = HashMap::new();
    let mut pairs = PairIndex::new();
    for record in source_chunk.iter() {
        let Some(values) = record.values(blocking.source_field) else {
            continue;
        };
        for value in values {
            if !hits.contains_key(&value) {
                let found = catalog.lookup(blocking.target_field, &value)?;
                hits.insert(value.clone(), found);
            }
            for tid in &hits[&value] {
                pairs.insert(CandidatePair::new(record.id.clone(), tid.clone()));
            }
        }
    }
    debug!(
        catalog = catalog.id(),
        source_records = source_chunk.len(),
        distinct_values = hits.len(),
        pairs = pairs.len(),
        "exact-match blocking done"
    );
    Ok(pairs)
}

/// Full-text blocking used when building training sets.
///
/// Each source record's names and description form a query; the catalog's
/// top `top_n` answers become candidates.
pub fn full_text_block(
    source_chunk: &RecordSet,
    catalog: &dyn TargetCatalog,
    top_n: usize,
) -> Result<PairIndex, LinkerError> {
    let mut pairs = PairIndex::new();
    for record in source_chunk.iter() {
        let mut query_parts: Vec<&str> = Vec::new();
        if let Some(names) = &record.names {
            query_parts.extend(names.iter().map(String::as_str));
        }
        if let Some(description) = &record.description {
            query_parts.push(description);
        }
        if query_parts.is_empty() {
            continue;
        }
        for tid in catalog.full_text_search(&query_parts.join(" "), top_n)? {
            pairs.insert(CandidatePair::new(record.id.clone(), tid));
        }
    }
    Ok(pairs)
}

/// Pairs the source dataset already asserts through identifier statements.
pub fn identifier_positives(source_chunk: &RecordSet) -> PairIndex {
    source_chunk
        .iter()
        .flat_map(|record| {
            record
                .identifiers
                .iter()
                .map(|tid| CandidatePair::new(record.id.clone(), tid.clone()))
        })
        .collect()
}

/// Keep only positives reached by blocking; returns them with the number dropped.
pub fn recover_positives(
    all_samples: &PairIndex,
    positives: &PairIndex,
    catalog_id: &str,
) -> (PairIndex, usize) {
    let recovered = all_samples.intersection(positives);
    let dropped = positives.len() - recovered.len();
    if dropped > 0 {
        debug!(
            catalog = catalog_id,
            dropped,
            "positive samples from the knowledge base are not in the full set of candidates"
        );
    }
    (recovered, dropped)
}
