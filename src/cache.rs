//! On-disk cache for the accumulated outputs of one pipeline pass.
//!
//! A pass over the source dataset produces three artifacts: the feature
//! matrix and the source and target records it was computed from. Each file
//! carries a fingerprint of the settings that produced it; the cache is a hit
//! only when all three files exist and every fingerprint matches.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{decode_record, write_record};
use crate::constants::artifacts::{
    CACHE_RECORD_VERSION, FEATURES_SUFFIX, SOURCE_RECORDS_SUFFIX, TARGET_RECORDS_SUFFIX,
};
use crate::data::RecordSet;
use crate::errors::LinkerError;
use crate::features::FeatureMatrix;
use crate::hash::stable_hash_parts;
use crate::types::HashPart;

/// `{dir}/{catalog}_{entity}_{tail}`: the naming scheme shared by every artifact.
pub fn artifact_path(dir: &Path, catalog: &str, entity: &str, tail: &str) -> PathBuf {
    dir.join(format!("{catalog}_{entity}_{tail}"))
}

/// Outputs of one complete pipeline pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedArtifacts {
    pub features: FeatureMatrix,
    pub source_records: RecordSet,
    pub target_records: RecordSet,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    fingerprint: u64,
    payload: T,
}

/// The three cache files for one `(catalog, entity, purpose)`.
#[derive(Clone, Debug)]
pub struct ArtifactCache {
    features_path: PathBuf,
    source_path: PathBuf,
    target_path: PathBuf,
    fingerprint: u64,
}

impl ArtifactCache {
    /// `settings` are folded into the fingerprint; changing any of them
    /// invalidates previously written files.
    pub fn new(
        dir: &Path,
        catalog: &str,
        entity: &str,
        purpose: &str,
        settings: &[HashPart],
    ) -> Self {
        let mut parts: Vec<HashPart> =
            vec![catalog.to_string(), entity.to_string(), purpose.to_string()];
        parts.extend(settings.iter().cloned());
        let path =
            |suffix: &str| artifact_path(dir, catalog, entity, &format!("{purpose}_{suffix}"));
        Self {
            features_path: path(FEATURES_SUFFIX),
            source_path: path(SOURCE_RECORDS_SUFFIX),
            target_path: path(TARGET_RECORDS_SUFFIX),
            fingerprint: stable_hash_parts(u64::from(CACHE_RECORD_VERSION), &parts),
        }
    }

    pub fn paths(&self) -> [&Path; 3] {
        [&self.features_path, &self.source_path, &self.target_path]
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Whether all three files are present (fingerprints not checked).
    pub fn is_complete(&self) -> bool {
        self.paths().iter().all(|path| path.is_file())
    }

    /// Load the cached pass, or `None` on a miss.
    ///
    /// Missing, stale, or undecodable files are a miss rather than an error.
    pub fn load(&self) -> Result<Option<CachedArtifacts>, LinkerError> {
        if !self.is_complete() {
            debug!(path = %self.features_path.display(), "artifact cache incomplete");
            return Ok(None);
        }
        let Some(features) = self.read_entry::<FeatureMatrix>(&self.features_path)? else {
            return Ok(None);
        };
        let Some(source_records) = self.read_entry::<RecordSet>(&self.source_path)? else {
            return Ok(None);
        };
        let Some(target_records) = self.read_entry::<RecordSet>(&self.target_path)? else {
            return Ok(None);
        };
        info!(
            path = %self.features_path.display(),
            rows = features.len(),
            "using cached artifacts"
        );
        Ok(Some(CachedArtifacts {
            features,
            source_records,
            target_records,
        }))
    }

    fn read_entry<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, LinkerError> {
        let bytes = fs::read(path)?;
        match decode_record::<CacheEntry<T>>(CACHE_RECORD_VERSION, &bytes) {
            Ok(entry) if entry.fingerprint == self.fingerprint => Ok(Some(entry.payload)),
            Ok(_) => {
                warn!(path = %path.display(), "cached artifact was built with different settings; recomputing");
                Ok(None)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cached artifact unreadable; recomputing");
                Ok(None)
            }
        }
    }

    /// Persist a complete pass, replacing any previous files.
    pub fn store(&self, artifacts: &CachedArtifacts) -> Result<(), LinkerError> {
        self.write_entry(&self.features_path, &artifacts.features)?;
        self.write_entry(&self.source_path, &artifacts.source_records)?;
        self.write_entry(&self.target_path, &artifacts.target_records)?;
        info!(
            path = %self.features_path.display(),
            rows = artifacts.features.len(),
            "artifacts cached"
        );
        Ok(())
    }

    fn write_entry<T: Serialize>(&self, path: &Path, payload: &T) -> Result<(), LinkerError> {
        write_record(
            path,
            CACHE_RECORD_VERSION,
            &CacheEntry {
                fingerprint: self.fingerprint,
                payload,
            },
        )
    }

    /// Delete whatever cache files exist.
    pub fn clear(&self) -> Result<(), LinkerError> {
        for path in self.paths() {
            if path.is_file() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EntityRecord;
    use crate::features::{extract, feature_columns};
    use crate::pairs::{CandidatePair, PairIndex};
    use tempfile::tempdir;

    fn artifacts() -> CachedArtifacts {
        let source: RecordSet = [EntityRecord::new("Q1")
            .with_names(["Nina Simone"])
            .with_derived_tokens()]
        .into_iter()
        .collect();
        let target: RecordSet = [EntityRecord::new("T1")
            .with_names(["Nina Simone"])
            .with_derived_tokens()]
        .into_iter()
        .collect();
        let pairs: PairIndex = [CandidatePair::new("Q1", "T1")].into_iter().collect();
        CachedArtifacts {
            features: extract(&pairs, &source, &target),
            source_records: source,
            target_records: target,
        }
    }

    fn settings(chunk: usize) -> Vec<HashPart> {
        vec![format!("chunk_size={chunk}")]
    }

    #[test]
    fn hit_requires_all_three_files() {
        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(
            dir.path(),
            "discogs",
            "musician",
            "classification",
            &settings(10),
        );
        assert!(cache.load().unwrap().is_none());

        cache.store(&artifacts()).unwrap();
        let loaded = cache.load().unwrap().unwrap();
        assert_eq!(loaded, artifacts());
        assert_eq!(loaded.features.columns(), feature_columns().as_slice());

        fs::remove_file(cache.paths()[2]).unwrap();
        assert!(!cache.is_complete());
        assert!(cache.load().unwrap().is_none());
    }

    #[test]
    fn changed_settings_invalidate_files() {
        let dir = tempdir().unwrap();
        let old = ArtifactCache::new(dir.path(), "discogs", "musician", "training", &settings(10));
        old.store(&artifacts()).unwrap();
        let new = ArtifactCache::new(dir.path(), "discogs", "musician", "training", &settings(20));
        assert_eq!(old.paths(), new.paths());
        assert_ne!(old.fingerprint(), new.fingerprint());
        assert!(new.is_complete());
        assert!(new.load().unwrap().is_none());
    }

    #[test]
    fn corrupt_files_are_a_miss_and_clear_removes_them() {
        let dir = tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), "imdb", "actor", "classification", &settings(5));
        cache.store(&artifacts()).unwrap();
        fs::write(cache.paths()[0], b"garbage").unwrap();
        assert!(cache.load().unwrap().is_none());
        cache.clear().unwrap();
        assert!(cache.paths().iter().all(|path| !path.exists()));
    }

    #[test]
    fn names_follow_catalog_entity_purpose() {
        let cache = ArtifactCache::new(Path::new("/io"), "discogs", "band", "training", &[]);
        assert_eq!(
            cache.paths()[0],
            Path::new("/io/discogs_band_training_features.bin")
        );
    }
}
