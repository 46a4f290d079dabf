use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::LinkerError;
use crate::pairs::CandidatePair;
use crate::utils::{normalize_name, tokenize, tokenize_url};

pub use crate::types::{Qid, Tid};

/// Comparable record attribute, also used as a blocking key and override field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    NameTokens,
    Url,
    UrlTokens,
    DateOfBirth,
    DateOfDeath,
    Description,
    DescriptionTokens,
}

impl Field {
    /// Every field, in canonical order.
    pub const ALL: [Field; 8] = [
        Field::Name,
        Field::NameTokens,
        Field::Url,
        Field::UrlTokens,
        Field::DateOfBirth,
        Field::DateOfDeath,
        Field::Description,
        Field::DescriptionTokens,
    ];

    /// Snake-case key used on the command line and in serialized records.
    pub fn key(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::NameTokens => "name_tokens",
            Field::Url => "url",
            Field::UrlTokens => "url_tokens",
            Field::DateOfBirth => "date_of_birth",
            Field::DateOfDeath => "date_of_death",
            Field::Description => "description",
            Field::DescriptionTokens => "description_tokens",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = LinkerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|field| field.key() == value)
            .ok_or_else(|| {
                let supported: Vec<&str> = Field::ALL.iter().map(|field| field.key()).collect();
                LinkerError::Configuration(format!(
                    "unknown field '{value}', expected one of: {}",
                    supported.join(", ")
                ))
            })
    }
}

/// Date precision, mirroring the knowledge base's precision codes (9, 10, 11).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePrecision {
    Year,
    Month,
    Day,
}

impl DatePrecision {
    /// Map a knowledge-base precision code; anything coarser than a year is unsupported.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            9 => Some(DatePrecision::Year),
            10 => Some(DatePrecision::Month),
            11 => Some(DatePrecision::Day),
            _ => None,
        }
    }
}

/// A date with the precision it is known to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateValue {
    pub date: NaiveDate,
    pub precision: DatePrecision,
}

impl DateValue {
    pub fn new(date: NaiveDate, precision: DatePrecision) -> Self {
        Self { date, precision }
    }

    /// Render at a given precision (`1926`, `1926-05`, `1926-05-26`).
    pub fn render_at(&self, precision: DatePrecision) -> String {
        match precision {
            DatePrecision::Year => format!("{:04}", self.date.year()),
            DatePrecision::Month => format!("{:04}-{:02}", self.date.year(), self.date.month()),
            DatePrecision::Day => self.date.format("%Y-%m-%d").to_string(),
        }
    }

    /// Render at the value's own precision.
    pub fn render(&self) -> String {
        self.render_at(self.precision)
    }

    /// Compare two dates at the coarser of their precisions.
    pub fn matches(&self, other: &DateValue) -> bool {
        let precision = self.precision.min(other.precision);
        self.render_at(precision) == other.render_at(precision)
    }
}

/// An entity observation from either dataset.
///
/// Every attribute is optional: `None` means the attribute is unknown, which
/// is different from `Some` of an empty collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// `QID` for source records, `TID` for target records.
    pub id: String,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub name_tokens: Option<BTreeSet<String>>,
    #[serde(default)]
    pub urls: Option<Vec<String>>,
    #[serde(default)]
    pub url_tokens: Option<BTreeSet<String>>,
    #[serde(default)]
    pub birth: Option<DateValue>,
    #[serde(default)]
    pub death: Option<DateValue>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_tokens: Option<BTreeSet<String>>,
    /// Target identifiers already asserted by a source record (training ground truth).
    #[serde(default)]
    pub identifiers: BTreeSet<Tid>,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls = Some(urls.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_birth(mut self, birth: DateValue) -> Self {
        self.birth = Some(birth);
        self
    }

    pub fn with_death(mut self, death: DateValue) -> Self {
        self.death = Some(death);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_identifiers<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifiers = identifiers.into_iter().map(Into::into).collect();
        self
    }

    /// Fill token fields from their raw counterparts when they were not supplied.
    pub fn with_derived_tokens(mut self) -> Self {
        if self.name_tokens.is_none()
            && let Some(names) = &self.names
        {
            self.name_tokens = Some(names.iter().flat_map(|name| tokenize(name)).collect());
        }
        if self.url_tokens.is_none()
            && let Some(urls) = &self.urls
        {
            self.url_tokens = Some(urls.iter().flat_map(|url| tokenize_url(url)).collect());
        }
        if self.description_tokens.is_none()
            && let Some(description) = &self.description
        {
            self.description_tokens = Some(tokenize(description));
        }
        self
    }

    /// Values of `field` as a string set, or `None` when the attribute is absent.
    ///
    /// Names are normalized so exact matching ignores case and spacing.
    pub fn values(&self, field: Field) -> Option<BTreeSet<String>> {
        match field {
            Field::Name => self
                .names
                .as_ref()
                .map(|names| names.iter().map(|name| normalize_name(name)).collect()),
            Field::NameTokens => self.name_tokens.clone(),
            Field::Url => self
                .urls
                .as_ref()
                .map(|urls| urls.iter().filter(|url| !url.is_empty()).cloned().collect()),
            Field::UrlTokens => self.url_tokens.clone(),
            Field::DateOfBirth => self.birth.map(|date| BTreeSet::from([date.render()])),
            Field::DateOfDeath => self.death.map(|date| BTreeSet::from([date.render()])),
            Field::Description => self
                .description
                .as_ref()
                .map(|text| BTreeSet::from([normalize_name(text)])),
            Field::DescriptionTokens => self.description_tokens.clone(),
        }
    }
}

/// Insertion-ordered collection of records keyed by identifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    records: IndexMap<String, EntityRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; an existing record with the same id is kept.
    pub fn insert(&mut self, record: EntityRecord) {
        self.records.entry(record.id.clone()).or_insert(record);
    }

    /// Append every record of `other` not already present.
    pub fn merge(&mut self, other: RecordSet) {
        for (_, record) in other.records {
            self.insert(record);
        }
    }

    pub fn get(&self, id: &str) -> Option<&EntityRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    /// Field values of record `id`; `None` when the record or the attribute is absent.
    pub fn values_for(&self, id: &str, field: Field) -> Option<BTreeSet<String>> {
        self.records.get(id).and_then(|record| record.values(field))
    }
}

impl FromIterator<EntityRecord> for RecordSet {
    fn from_iter<T: IntoIterator<Item = EntityRecord>>(iter: T) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

/// A probability (or 0/1 label) attached to one candidate pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub pair: CandidatePair,
    pub score: f64,
}

impl Prediction {
    pub fn new(pair: CandidatePair, score: f64) -> Self {
        Self { pair, score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32, precision: DatePrecision) -> DateValue {
        DateValue::new(NaiveDate::from_ymd_opt(y, m, d).unwrap(), precision)
    }

    #[test]
    fn dates_compare_at_coarser_precision() {
        let year = date(1926, 1, 1, DatePrecision::Year);
        let day = date(1926, 5, 26, DatePrecision::Day);
        assert!(year.matches(&day));
        assert!(!date(1927, 1, 1, DatePrecision::Year).matches(&day));
        assert_eq!(day.render(), "1926-05-26");
        assert_eq!(date(1926, 5, 1, DatePrecision::Month).render(), "1926-05");
        assert_eq!(DatePrecision::from_code(10), Some(DatePrecision::Month));
        assert_eq!(DatePrecision::from_code(7), None);
    }

    #[test]
    fn absent_attributes_differ_from_empty() {
        let absent = EntityRecord::new("Q1");
        let empty = EntityRecord::new("Q1").with_urls(Vec::<String>::new());
        assert!(absent.values(Field::Url).is_none());
        assert_eq!(empty.values(Field::Url), Some(BTreeSet::new()));
    }

    #[test]
    fn derived_tokens_fill_missing_token_fields() {
        let record = EntityRecord::new("Q1")
            .with_names(["Miles Davis"])
            .with_urls(["https://www.milesdavis.com"])
            .with_description("American jazz trumpeter")
            .with_derived_tokens();
        assert!(record.values(Field::NameTokens).unwrap().contains("davis"));
        assert!(record.values(Field::UrlTokens).unwrap().contains("milesdavis"));
        assert!(record.values(Field::DescriptionTokens).unwrap().contains("jazz"));
        assert!(record.values(Field::Name).unwrap().contains("miles davis"));
    }

    #[test]
    fn field_keys_round_trip_and_reject_unknown() {
        for field in Field::ALL {
            assert_eq!(field.key().parse::<Field>().unwrap(), field);
        }
        let err = "shoe_size".parse::<Field>().unwrap_err();
        assert!(matches!(err, LinkerError::Configuration(msg) if msg.contains("name_tokens")));
    }

    #[test]
    fn record_set_keeps_first_copy() {
        let mut set: RecordSet = [
            EntityRecord::new("T1").with_names(["first"]),
            EntityRecord::new("T2"),
        ]
        .into_iter()
        .collect();
        set.merge([EntityRecord::new("T1").with_names(["second"])].into_iter().collect());
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("T1").unwrap().names.as_ref().unwrap()[0], "first");
        assert!(set.values_for("T3", Field::Name).is_none());
    }
}
