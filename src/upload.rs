//! Write-back seam towards the knowledge base.

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSpec;
use crate::data::Prediction;
use crate::errors::LinkerError;
use crate::reconcile::{Deprecations, Statement};
use crate::types::{Pid, Qid, Tid};

/// Accepts linker and reconciliation results for the knowledge base.
pub trait Uploader {
    /// New identifier statements `(QID, catalog PID, TID)` from accepted predictions.
    fn add_identifiers(
        &mut self,
        catalog: &CatalogSpec,
        links: &[Prediction],
    ) -> Result<(), LinkerError>;

    /// Identifier statements to deprecate, keyed by target id.
    fn deprecate(
        &mut self,
        catalog: &CatalogSpec,
        deprecations: &Deprecations,
    ) -> Result<(), LinkerError>;

    /// Arbitrary `(QID, PID, value)` statements.
    fn add_statements(&mut self, statements: &[Statement]) -> Result<(), LinkerError>;
}

/// One upload request, as recorded by [`RecordingUploader`] and file-backed uploaders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UploadAction {
    AddIdentifiers { pid: Pid, links: Vec<(Qid, Tid)> },
    Deprecate { pid: Pid, statements: Vec<(Qid, Tid)> },
    AddStatements { statements: Vec<Statement> },
}

impl UploadAction {
    pub fn identifiers(catalog: &CatalogSpec, links: &[Prediction]) -> Self {
        UploadAction::AddIdentifiers {
            pid: catalog.pid.to_string(),
            links: links
                .iter()
                .map(|link| (link.pair.qid.clone(), link.pair.tid.clone()))
                .collect(),
        }
    }

    pub fn deprecations(catalog: &CatalogSpec, deprecations: &Deprecations) -> Self {
        UploadAction::Deprecate {
            pid: catalog.pid.to_string(),
            statements: deprecations
                .iter()
                .flat_map(|(tid, qids)| qids.iter().map(move |qid| (qid.clone(), tid.clone())))
                .collect(),
        }
    }
}

/// Keeps every request in memory; used for dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingUploader {
    pub actions: Vec<UploadAction>,
}

impl Uploader for RecordingUploader {
    fn add_identifiers(
        &mut self,
        catalog: &CatalogSpec,
        links: &[Prediction],
    ) -> Result<(), LinkerError> {
        self.actions.push(UploadAction::identifiers(catalog, links));
        Ok(())
    }

    fn deprecate(
        &mut self,
        catalog: &CatalogSpec,
        deprecations: &Deprecations,
    ) -> Result<(), LinkerError> {
        self.actions.push(UploadAction::deprecations(catalog, deprecations));
        Ok(())
    }

    fn add_statements(&mut self, statements: &[Statement]) -> Result<(), LinkerError> {
        self.actions.push(UploadAction::AddStatements {
            statements: statements.to_vec(),
        });
        Ok(())
    }
}
