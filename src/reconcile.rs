//! Link-based validation of identifier statements already asserted in the
//! knowledge base.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blocking::TargetCatalog;
use crate::codec::ensure_parent_dir;
use crate::constants::reconcile::{DEFAULT_ID_PATTERN, DESCRIBED_AT_URL, FORMATTER_PLACEHOLDER};
use crate::errors::LinkerError;
use crate::types::{ExternalId, LinkUrl, Pid, Qid, Tid};

/// Identifier statements: each QID with the target ids it asserts.
pub type IdentifierStatements = BTreeMap<Qid, BTreeSet<Tid>>;
/// Links per identifier, on either side.
pub type LinkSets = BTreeMap<String, BTreeSet<LinkUrl>>;
/// Identifier statements to deprecate, keyed by target id.
pub type Deprecations = BTreeMap<Tid, BTreeSet<Qid>>;

/// A `(QID, PID, value)` statement.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Statement {
    pub qid: Qid,
    pub pid: Pid,
    pub value: String,
}

impl Statement {
    pub fn new(qid: impl Into<Qid>, pid: impl Into<Pid>, value: impl Into<String>) -> Self {
        Self {
            qid: qid.into(),
            pid: pid.into(),
            value: value.into(),
        }
    }
}

/// Outcome of [`check_links`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkCheck {
    /// Statements without a shared link.
    pub to_deprecate: Deprecations,
    /// Target links the QID lacks.
    pub to_add: BTreeMap<Qid, BTreeSet<LinkUrl>>,
    /// QIDs skipped because they carry no links.
    pub skipped_qids: usize,
    /// Target ids skipped because they are unknown or carry no links.
    pub skipped_tids: usize,
}

/// Compare the links of each identifier statement's two sides.
///
/// A statement with no shared link is deprecated; target links missing on
/// the QID are proposed for addition. The two outcomes are independent.
pub fn check_links(
    statements: &IdentifierStatements,
    source_links: &LinkSets,
    target_links: &LinkSets,
) -> LinkCheck {
    info!(statements = statements.len(), "checking identifier statements against target links");
    let mut check = LinkCheck::default();
    for (qid, tids) in statements {
        let Some(qid_links) = source_links.get(qid).filter(|links| !links.is_empty()) else {
            warn!(qid = %qid, "skipping check: no links available for item");
            check.skipped_qids += 1;
            continue;
        };
        for tid in tids {
            let Some(tid_links) = target_links.get(tid).filter(|links| !links.is_empty()) else {
                warn!(tid = %tid, "skipping check: no links available for target id");
                check.skipped_tids += 1;
                continue;
            };
            if qid_links.is_disjoint(tid_links) {
                debug!(qid = %qid, tid = %tid, "no shared links, statement will be deprecated");
                check
                    .to_deprecate
                    .entry(tid.clone())
                    .or_default()
                    .insert(qid.clone());
            }
            let extra: BTreeSet<LinkUrl> = tid_links.difference(qid_links).cloned().collect();
            if !extra.is_empty() {
                debug!(qid = %qid, tid = %tid, extra = extra.len(), "target has extra links");
                check.to_add.entry(qid.clone()).or_default().extend(extra);
            }
        }
    }
    info!(
        to_deprecate = check.to_deprecate.len(),
        to_add = check.to_add.len(),
        skipped_qids = check.skipped_qids,
        skipped_tids = check.skipped_tids,
        "link check completed"
    );
    check
}

/// A compiled identifier pattern.
///
/// Patterns the `regex` engine rejects (lookaround, backreferences) are
/// compiled with `fancy-regex` instead.
#[derive(Clone, Debug)]
pub enum FormatterPattern {
    Standard(regex::Regex),
    Extended(fancy_regex::Regex),
}

impl FormatterPattern {
    /// Compile `pattern` so that it must match a whole string.
    pub fn compile(pattern: &str) -> Result<Self, LinkerError> {
        let anchored = format!("^(?:{pattern})$");
        match regex::Regex::new(&anchored) {
            Ok(compiled) => Ok(FormatterPattern::Standard(compiled)),
            Err(standard) => {
                debug!(pattern, error = %standard, "falling back to the extended regex engine");
                fancy_regex::Regex::new(&anchored)
                    .map(FormatterPattern::Extended)
                    .map_err(|extended| LinkerError::Pattern {
                        pattern: pattern.to_string(),
                        reason: extended.to_string(),
                    })
            }
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, FormatterPattern::Extended(_))
    }

    /// Whether `text` matches in full. Extended-engine runtime failures
    /// (backtrack limit) count as no match.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            FormatterPattern::Standard(regex) => regex.is_match(text),
            FormatterPattern::Extended(regex) => regex.is_match(text).unwrap_or_else(|error| {
                warn!(text, %error, "extended pattern failed to evaluate");
                false
            }),
        }
    }
}

/// Serialized form of an external-identifier provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatterSpec {
    pub pid: Pid,
    pub formatter_url: String,
    #[serde(default)]
    pub id_pattern: Option<String>,
}

/// Turns links of one provider back into its external identifiers.
#[derive(Clone, Debug)]
pub struct ExternalIdFormatter {
    pid: Pid,
    prefix: String,
    suffix: String,
    pattern: FormatterPattern,
}

impl ExternalIdFormatter {
    /// `formatter_url` must contain the `$1` placeholder; a missing
    /// `id_pattern` accepts any single path segment.
    pub fn new(
        pid: impl Into<Pid>,
        formatter_url: &str,
        id_pattern: Option<&str>,
    ) -> Result<Self, LinkerError> {
        let Some((prefix, suffix)) = formatter_url.split_once(FORMATTER_PLACEHOLDER) else {
            return Err(LinkerError::Configuration(format!(
                "formatter URL '{formatter_url}' has no '{FORMATTER_PLACEHOLDER}' placeholder"
            )));
        };
        Ok(Self {
            pid: pid.into(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            pattern: FormatterPattern::compile(id_pattern.unwrap_or(DEFAULT_ID_PATTERN))?,
        })
    }

    pub fn from_spec(spec: &FormatterSpec) -> Result<Self, LinkerError> {
        Self::new(spec.pid.clone(), &spec.formatter_url, spec.id_pattern.as_deref())
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// External identifier encoded by `url`, if it was built by this formatter.
    pub fn extract_external_id(&self, url: &str) -> Option<ExternalId> {
        let id = url
            .strip_prefix(&self.prefix)?
            .strip_suffix(self.suffix.as_str())?;
        (!id.is_empty() && self.pattern.matches(id)).then(|| id.to_string())
    }
}

/// Split links to add into external-identifier statements (first matching
/// formatter wins) and plain described-at-URL statements.
pub fn split_additions(
    to_add: &BTreeMap<Qid, BTreeSet<LinkUrl>>,
    formatters: &[ExternalIdFormatter],
) -> (Vec<Statement>, Vec<Statement>) {
    let mut external_ids = Vec::new();
    let mut urls = Vec::new();
    for (qid, links) in to_add {
        for url in links {
            let extracted = formatters.iter().find_map(|formatter| {
                formatter
                    .extract_external_id(url)
                    .map(|id| (formatter.pid(), id))
            });
            match extracted {
                Some((pid, id)) => external_ids.push(Statement::new(qid.clone(), pid, id)),
                None => urls.push(Statement::new(qid.clone(), DESCRIBED_AT_URL, url.clone())),
            }
        }
    }
    info!(
        external_ids = external_ids.len(),
        urls = urls.len(),
        "separated external identifiers from links"
    );
    (external_ids, urls)
}

/// Identifier statements whose target id is absent from `catalog`.
pub fn check_existence(
    statements: &IdentifierStatements,
    catalog: &dyn TargetCatalog,
) -> Result<Deprecations, LinkerError> {
    let mut invalid = Deprecations::new();
    for (qid, tids) in statements {
        for tid in tids {
            if !catalog.contains(tid)? {
                warn!(qid = %qid, tid = %tid, catalog = catalog.id(), "identifier is invalid");
                invalid.entry(tid.clone()).or_default().insert(qid.clone());
            }
        }
    }
    let total: usize = invalid.values().map(BTreeSet::len).sum();
    info!(invalid = total, "existence check completed");
    Ok(invalid)
}

/// Write deprecations as `{tid: [qids]}` JSON.
pub fn write_deprecations(path: &Path, deprecations: &Deprecations) -> Result<(), LinkerError> {
    ensure_parent_dir(path)?;
    serde_json::to_writer_pretty(File::create(path)?, deprecations)?;
    Ok(())
}

/// Write `(QID, PID, value)` triples as headerless TSV.
pub fn write_statements(path: &Path, statements: &[Statement]) -> Result<(), LinkerError> {
    ensure_parent_dir(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;
    for statement in statements {
        writer.write_record([&statement.qid, &statement.pid, &statement.value])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::InMemoryCatalog;
    use crate::data::{EntityRecord, RecordSet};

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn links(entries: &[(&str, &[&str])]) -> LinkSets {
        entries
            .iter()
            .map(|(id, urls)| (id.to_string(), set(urls)))
            .collect()
    }

    #[test]
    fn shared_links_keep_statement_and_extra_links_are_added() {
        let statements: IdentifierStatements =
            [("Q1".to_string(), set(&["T1"])), ("Q2".to_string(), set(&["T2"]))].into();
        let source = links(&[("Q1", &["a", "b"]), ("Q2", &["a"])]);
        let target = links(&[("T1", &["b", "c"]), ("T2", &["c"])]);
        let check = check_links(&statements, &source, &target);

        assert_eq!(check.to_deprecate.len(), 1);
        assert_eq!(check.to_deprecate["T2"], set(&["Q2"]));
        assert_eq!(check.to_add["Q1"], set(&["c"]));
        assert_eq!(check.to_add["Q2"], set(&["c"]));
    }

    #[test]
    fn missing_links_skip_without_failing() {
        let statements: IdentifierStatements = [
            ("Q1".to_string(), set(&["T1", "T9"])),
            ("Q3".to_string(), set(&["T1"])),
        ]
        .into();
        let source = links(&[("Q1", &["a"]), ("Q3", &[])]);
        let target = links(&[("T1", &["a"])]);
        let check = check_links(&statements, &source, &target);
        assert!(check.to_deprecate.is_empty());
        assert!(check.to_add.is_empty());
        assert_eq!(check.skipped_qids, 1);
        assert_eq!(check.skipped_tids, 1);
    }

    #[test]
    fn formatter_extracts_ids_and_falls_back_to_urls() {
        let formatters = vec![
            ExternalIdFormatter::new("P345", "https://www.imdb.com/name/$1/", Some(r"nm\d{7,8}"))
                .unwrap(),
            ExternalIdFormatter::new("P2002", "https://twitter.com/$1", None).unwrap(),
        ];
        let to_add: BTreeMap<Qid, BTreeSet<LinkUrl>> = [(
            "Q1".to_string(),
            set(&[
                "https://www.imdb.com/name/nm0000206/",
                "https://www.imdb.com/name/bogus/",
                "https://twitter.com/someone",
            ]),
        )]
        .into();
        let (ids, urls) = split_additions(&to_add, &formatters);
        assert_eq!(
            ids,
            vec![
                Statement::new("Q1", "P345", "nm0000206"),
                Statement::new("Q1", "P2002", "someone"),
            ]
        );
        assert_eq!(
            urls,
            vec![Statement::new("Q1", DESCRIBED_AT_URL, "https://www.imdb.com/name/bogus/")]
        );
    }

    #[test]
    fn lookaround_patterns_use_the_extended_engine() {
        let pattern = FormatterPattern::compile(r"(?!0)\d+").unwrap();
        assert!(pattern.is_extended());
        assert!(pattern.matches("123"));
        assert!(!pattern.matches("0123"));
        assert!(!FormatterPattern::compile(r"\d+").unwrap().is_extended());
        assert!(matches!(
            FormatterPattern::compile("(unclosed"),
            Err(LinkerError::Pattern { .. })
        ));
        assert!(ExternalIdFormatter::new("P1", "https://no-placeholder", None).is_err());
    }

    #[test]
    fn existence_check_reports_unknown_targets() {
        let records: RecordSet = [EntityRecord::new("T1")].into_iter().collect();
        let catalog = InMemoryCatalog::new("discogs", records);
        let statements: IdentifierStatements = [
            ("Q1".to_string(), set(&["T1", "T2"])),
            ("Q2".to_string(), set(&["T2"])),
        ]
        .into();
        let invalid = check_existence(&statements, &catalog).unwrap();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid["T2"], set(&["Q1", "Q2"]));
    }

    #[test]
    fn writers_produce_json_and_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let deprecations: Deprecations = [("T2".to_string(), set(&["Q2"]))].into();
        let json = dir.path().join("out/deprecated_ids.json");
        write_deprecations(&json, &deprecations).unwrap();
        let parsed: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(parsed["T2"], vec!["Q2".to_string()]);

        let tsv = dir.path().join("urls_to_be_added.tsv");
        write_statements(&tsv, &[Statement::new("Q1", "P973", "c")]).unwrap();
        assert_eq!(std::fs::read_to_string(&tsv).unwrap(), "Q1\tP973\tc\n");
    }
}
