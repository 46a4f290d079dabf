use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::blocking::InMemoryCatalog;
use crate::catalog::CatalogSpec;
use crate::codec::ensure_parent_dir;
use crate::data::{EntityRecord, Prediction, RecordSet};
use crate::errors::LinkerError;
use crate::pipeline::{RecordChunks, SourceDataset};
use crate::reconcile::{
    Deprecations, ExternalIdFormatter, FormatterSpec, IdentifierStatements, LinkSets, Statement,
};
use crate::upload::{UploadAction, Uploader};

/// Source records stored as JSON Lines, one `EntityRecord` per line.
///
/// `path` may be a single file or a directory of `.jsonl` files, read in
/// path order.
pub struct JsonlDataset {
    id: String,
    files: Vec<PathBuf>,
}

impl JsonlDataset {
    pub fn open(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, LinkerError> {
        Ok(Self {
            id: id.into(),
            files: jsonl_files(path.as_ref())?,
        })
    }
}

impl SourceDataset for JsonlDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn chunks(&self, chunk_size: usize) -> Result<RecordChunks<'_>, LinkerError> {
        if chunk_size == 0 {
            return Err(LinkerError::Configuration(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Box::new(JsonlChunks {
            files: self.files.clone().into_iter(),
            current: None,
            chunk_size,
        }))
    }
}

struct JsonlChunks {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, usize, Lines<BufReader<File>>)>,
    chunk_size: usize,
}

impl JsonlChunks {
    fn next_record(&mut self) -> Option<Result<EntityRecord, LinkerError>> {
        loop {
            if self.current.is_none() {
                let path = self.files.next()?;
                match File::open(&path) {
                    Ok(file) => self.current = Some((path, 0, BufReader::new(file).lines())),
                    Err(error) => return Some(Err(error.into())),
                }
            }
            let (path, line_no, lines) = self.current.as_mut()?;
            match lines.next() {
                None => self.current = None,
                Some(Err(error)) => return Some(Err(error.into())),
                Some(Ok(line)) => {
                    *line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(parse_record(path, *line_no, &line));
                }
            }
        }
    }
}

impl Iterator for JsonlChunks {
    type Item = Result<RecordSet, LinkerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = RecordSet::new();
        while chunk.len() < self.chunk_size {
            match self.next_record() {
                None => break,
                Some(Err(error)) => return Some(Err(error)),
                Some(Ok(record)) => chunk.insert(record),
            }
        }
        (!chunk.is_empty()).then_some(Ok(chunk))
    }
}

fn parse_record(path: &Path, line_no: usize, line: &str) -> Result<EntityRecord, LinkerError> {
    serde_json::from_str::<EntityRecord>(line)
        .map(EntityRecord::with_derived_tokens)
        .map_err(|error| {
            LinkerError::Configuration(format!(
                "invalid record at {}:{line_no}: {error}",
                path.display()
            ))
        })
}

/// `.jsonl` files under `root` in path order; a file path is returned as is.
pub fn jsonl_files(root: &Path) -> Result<Vec<PathBuf>, LinkerError> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(LinkerError::MissingArtifact {
            kind: "record file",
            path: root.to_path_buf(),
        });
    }
    let mut files = Vec::new();
    // An unreadable entry would silently shrink the dataset, so it is fatal.
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && is_jsonl_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    debug!(root = %root.display(), files = files.len(), "discovered record files");
    Ok(files)
}

/// True if the path has a `.jsonl` extension (case-insensitive).
pub fn is_jsonl_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false)
}

/// Read every record under `path` into memory.
pub fn load_records(path: &Path) -> Result<RecordSet, LinkerError> {
    let mut records = RecordSet::new();
    for file in jsonl_files(path)? {
        let reader = BufReader::new(File::open(&file)?);
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.insert(parse_record(&file, idx + 1, &line)?);
        }
    }
    Ok(records)
}

/// Load a target catalog dump into an in-memory catalog.
pub fn load_catalog(id: &str, path: &Path) -> Result<InMemoryCatalog, LinkerError> {
    let records = load_records(path)?;
    info!(catalog = id, records = records.len(), path = %path.display(), "loaded target catalog");
    Ok(InMemoryCatalog::new(id, records))
}

fn read_json<T: DeserializeOwned>(path: &Path, kind: &'static str) -> Result<T, LinkerError> {
    if !path.exists() {
        return Err(LinkerError::MissingArtifact {
            kind,
            path: path.to_path_buf(),
        });
    }
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

/// Identifier statements as JSON `{qid: [tids]}`.
pub fn load_statements(path: &Path) -> Result<IdentifierStatements, LinkerError> {
    read_json(path, "identifier statements")
}

/// Links as JSON `{id: [urls]}`.
pub fn load_links(path: &Path) -> Result<LinkSets, LinkerError> {
    read_json(path, "link sets")
}

/// Formatters as a JSON array of `{pid, formatter_url, id_pattern}`.
pub fn load_formatters(path: &Path) -> Result<Vec<ExternalIdFormatter>, LinkerError> {
    let specs: Vec<FormatterSpec> = read_json(path, "formatter list")?;
    specs.iter().map(ExternalIdFormatter::from_spec).collect()
}

/// Uploader that appends each request as one JSON line.
pub struct JsonlUploader {
    path: PathBuf,
}

impl JsonlUploader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, action: &UploadAction) -> Result<(), LinkerError> {
        self.write_line(action)
            .map_err(|err| LinkerError::Collaborator {
                name: "jsonl uploader".to_string(),
                reason: format!("{}: {err}", self.path.display()),
            })
    }

    fn write_line(&self, action: &UploadAction) -> Result<(), LinkerError> {
        ensure_parent_dir(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        serde_json::to_writer(&mut file, action)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

impl Uploader for JsonlUploader {
    fn add_identifiers(
        &mut self,
        catalog: &CatalogSpec,
        links: &[Prediction],
    ) -> Result<(), LinkerError> {
        self.append(&UploadAction::identifiers(catalog, links))
    }

    fn deprecate(
        &mut self,
        catalog: &CatalogSpec,
        deprecations: &Deprecations,
    ) -> Result<(), LinkerError> {
        self.append(&UploadAction::deprecations(catalog, deprecations))
    }

    fn add_statements(&mut self, statements: &[Statement]) -> Result<(), LinkerError> {
        self.append(&UploadAction::AddStatements {
            statements: statements.to_vec(),
        })
    }
}

/// Read back the requests written by a [`JsonlUploader`].
pub fn read_upload_log(path: &Path) -> Result<Vec<UploadAction>, LinkerError> {
    fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(LinkerError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::TargetCatalog;
    use crate::catalog::catalog;
    use tempfile::tempdir;

    fn write_lines(path: &Path, lines: &[&str]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, lines.join("\n")).unwrap();
    }

    #[test]
    fn dataset_chunks_across_files_in_path_order() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("source");
        write_lines(
            &root.join("b.jsonl"),
            &[r#"{"id":"Q3","names":["Gamma"]}"#, r#"{"id":"Q4"}"#],
        );
        write_lines(
            &root.join("a.jsonl"),
            &[r#"{"id":"Q1","names":["Alpha Beta"]}"#, "", r#"{"id":"Q2"}"#],
        );
        fs::write(root.join("notes.txt"), "ignored").unwrap();

        let dataset = JsonlDataset::open("source", &root).unwrap();
        let chunks: Vec<RecordSet> = dataset
            .chunks(3)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
        let first: Vec<&String> = chunks[0].ids().collect();
        assert_eq!(first, ["Q1", "Q2", "Q3"]);
        assert_eq!(chunks[1].len(), 1);
        let tokens = chunks[0].get("Q1").unwrap().name_tokens.clone().unwrap();
        assert!(tokens.contains("alpha"));

        assert!(dataset.chunks(0).is_err());
    }

    #[test]
    fn bad_lines_report_their_location() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("broken.jsonl");
        write_lines(&path, &[r#"{"id":"Q1"}"#, "{not json"]);
        let error = load_records(&path).unwrap_err().to_string();
        assert!(error.contains("broken.jsonl:2"), "{error}");
        assert!(matches!(
            JsonlDataset::open("missing", temp.path().join("nope")),
            Err(LinkerError::MissingArtifact { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_entries_fail_discovery() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("source");
        write_lines(&root.join("a.jsonl"), &[r#"{"id":"Q1"}"#]);
        std::os::unix::fs::symlink(temp.path().join("gone"), root.join("dangling.jsonl"))
            .unwrap();
        assert!(matches!(jsonl_files(&root), Err(LinkerError::Io(_))));
    }

    #[test]
    fn catalog_and_reconciliation_inputs_load() {
        let temp = tempdir().unwrap();
        let dump = temp.path().join("catalog.jsonl");
        write_lines(&dump, &[r#"{"id":"T1","names":["Alpha"]}"#]);
        let target = load_catalog("discogs", &dump).unwrap();
        assert!(target.contains("T1").unwrap());

        let statements = temp.path().join("statements.json");
        fs::write(&statements, r#"{"Q1":["T1","T2"]}"#).unwrap();
        assert_eq!(load_statements(&statements).unwrap()["Q1"].len(), 2);

        let formatters = temp.path().join("formatters.json");
        fs::write(
            &formatters,
            r#"[{"pid":"P345","formatter_url":"https://www.imdb.com/name/$1/"}]"#,
        )
        .unwrap();
        let loaded = load_formatters(&formatters).unwrap();
        assert_eq!(
            loaded[0].extract_external_id("https://www.imdb.com/name/nm0000206/"),
            Some("nm0000206".to_string())
        );
        assert!(matches!(
            load_links(&temp.path().join("absent.json")),
            Err(LinkerError::MissingArtifact { .. })
        ));
    }

    #[test]
    fn uploader_appends_one_line_per_request() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("uploads/log.jsonl");
        let spec = catalog("discogs").unwrap();
        let mut uploader = JsonlUploader::new(&path);
        let deprecations: Deprecations =
            [("T2".to_string(), ["Q2".to_string()].into())].into();
        uploader.deprecate(spec, &deprecations).unwrap();
        uploader
            .add_statements(&[Statement::new("Q1", "P973", "https://example.org")])
            .unwrap();

        let actions = read_upload_log(uploader.path()).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0],
            UploadAction::Deprecate {
                pid: spec.pid.to_string(),
                statements: vec![("Q2".to_string(), "T2".to_string())],
            }
        );
    }

    #[test]
    fn uploader_failures_name_the_collaborator() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let mut uploader = JsonlUploader::new(blocker.join("log.jsonl"));
        let err = uploader.add_statements(&[]).unwrap_err();
        assert!(matches!(
            err,
            LinkerError::Collaborator { ref name, ref reason }
                if name == "jsonl uploader" && reason.contains("log.jsonl")
        ));
    }
}
