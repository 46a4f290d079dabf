#![allow(dead_code)]

use std::path::Path;

use chrono::NaiveDate;

use linkwise::{
    DatePrecision, DateValue, EntityRecord, InMemoryCatalog, InMemoryDataset, LinkerConfig,
    RecordSet,
};

const FIRST_NAMES: [&str; 4] = ["anna", "bruno", "carla", "dario"];

fn born(offset: usize) -> DateValue {
    DateValue::new(
        NaiveDate::from_ymd_opt(1900 + offset as i32, 3, 11).unwrap(),
        DatePrecision::Day,
    )
}

fn name(idx: usize) -> String {
    format!("{} Surname{idx}", FIRST_NAMES[idx % FIRST_NAMES.len()])
}

/// `count` items, each asserting `T{i}` and sharing a first name with a
/// quarter of the catalog.
pub fn source_records(count: usize) -> RecordSet {
    (0..count)
        .map(|idx| {
            EntityRecord::new(format!("Q{idx}"))
                .with_names([name(idx)])
                .with_birth(born(idx))
                .with_identifiers([format!("T{idx}")])
                .with_derived_tokens()
        })
        .collect()
}

/// Target records matching [`source_records`] one to one.
pub fn target_records(count: usize) -> RecordSet {
    (0..count)
        .map(|idx| {
            EntityRecord::new(format!("T{idx}"))
                .with_names([name(idx)])
                .with_birth(born(idx))
                .with_derived_tokens()
        })
        .collect()
}

pub fn dataset(count: usize) -> InMemoryDataset {
    InMemoryDataset::new("wikidata", source_records(count))
}

pub fn catalog(count: usize) -> InMemoryCatalog {
    InMemoryCatalog::new("discogs", target_records(count))
}

pub fn config(dir: &Path, chunk_size: usize) -> LinkerConfig {
    LinkerConfig {
        dir_io: dir.to_path_buf(),
        chunk_size,
        ..LinkerConfig::default()
    }
}
