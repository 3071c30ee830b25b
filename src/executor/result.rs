//! Run result types
//!
//! This module defines what export and import runs report back:
//! - [`ExportManifest`]: per-collection files, counts and failures
//! - [`ImportReport`]: per-collection [`ImportOutcome`]s
//! - [`RunOutcome`]: a report plus the error that stopped the run, if any
//!
//! A run that stopped on a fatal error still returns its report, marked
//! partial, so callers can tell "failed entirely" apart from "completed with
//! N per-document failures" through [`RunOutcome::status`].

use std::path::PathBuf;

use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::codec::Form;
use crate::error::{PorterError, Result, extract_error_info};

/// One document that could not be encoded, decoded or written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    /// Zero-based position in the collection or file.
    pub index: u64,
    /// `_id` rendered as text when it could be read.
    pub id: Option<String>,
    pub reason: String,
}

impl DocumentFailure {
    pub fn new(index: u64, id: Option<String>, error: &PorterError) -> Self {
        Self {
            index,
            id,
            reason: failure_reason(error),
        }
    }
}

/// Short reason for a per-document failure.
pub fn failure_reason(error: &PorterError) -> String {
    match error {
        PorterError::MongoDb(e) => extract_error_info(e).reason(),
        PorterError::Format(e) => e.to_string(),
        other => other.to_string(),
    }
}

/// Overall status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Failed documents plus files that could not be read in full.
    CompletedWithFailures(u64),
    Cancelled,
    Failed,
}

/// Reports that can be summarized into a [`RunStatus`].
pub trait RunReport {
    fn failed_documents(&self) -> u64;

    /// Input files that could not be opened or read to the end.
    fn failed_files(&self) -> u64 {
        0
    }

    fn was_cancelled(&self) -> bool;
}

/// A run's report together with the error that aborted it, if any.
#[derive(Debug)]
pub struct RunOutcome<T> {
    pub report: T,
    pub error: Option<PorterError>,
}

impl<T> RunOutcome<T> {
    pub fn completed(report: T) -> Self {
        Self {
            report,
            error: None,
        }
    }

    pub fn failed(report: T, error: PorterError) -> Self {
        Self {
            report,
            error: Some(error),
        }
    }

    /// The report, or the fatal error.
    pub fn into_result(self) -> Result<T> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}

impl<T: RunReport> RunOutcome<T> {
    pub fn status(&self) -> RunStatus {
        if self.error.is_some() {
            RunStatus::Failed
        } else if self.report.was_cancelled() {
            RunStatus::Cancelled
        } else {
            match self.report.failed_documents() + self.report.failed_files() {
                0 => RunStatus::Completed,
                n => RunStatus::CompletedWithFailures(n),
            }
        }
    }
}

/// State of one exported collection file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    /// Every document was read and the file finalized.
    Complete,
    /// No document was written; the file exists and is empty.
    Empty,
    /// The run stopped before the collection was fully read.
    Partial,
}

impl std::fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionStatus::Complete => f.write_str("complete"),
            CollectionStatus::Empty => f.write_str("empty"),
            CollectionStatus::Partial => f.write_str("partial"),
        }
    }
}

/// Export record of one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionManifest {
    pub name: String,
    /// File name relative to the export root.
    pub file: String,
    pub form: Form,
    pub documents_written: u64,
    pub failures: Vec<DocumentFailure>,
    pub status: CollectionStatus,
}

/// Record of an export run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportManifest {
    pub form: Form,
    pub compressed: bool,
    /// Export directory, or the archive file when compressed.
    pub output: PathBuf,
    pub collections: Vec<CollectionManifest>,
    pub cancelled: bool,
}

impl ExportManifest {
    pub fn new(form: Form, compressed: bool, output: PathBuf) -> Self {
        Self {
            form,
            compressed,
            output,
            collections: Vec::new(),
            cancelled: false,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionManifest> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn documents_written(&self) -> u64 {
        self.collections.iter().map(|c| c.documents_written).sum()
    }

    /// Human-readable table of the run.
    pub fn summary(&self) -> String {
        let mut builder = Builder::default();
        builder.push_record(["collection", "file", "written", "failed", "status"]);
        for c in &self.collections {
            builder.push_record([
                c.name.clone(),
                c.file.clone(),
                c.documents_written.to_string(),
                c.failures.len().to_string(),
                c.status.to_string(),
            ]);
        }
        let mut table = builder.build();
        table.with(Style::modern());

        let mut out = table.to_string();
        out.push_str(&format!(
            "\n{} documents written to {}",
            self.documents_written(),
            self.output.display()
        ));
        if self.cancelled {
            out.push_str(" (cancelled, partial)");
        }
        out
    }
}

impl RunReport for ExportManifest {
    fn failed_documents(&self) -> u64 {
        self.collections.iter().map(|c| c.failures.len() as u64).sum()
    }

    fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Conflict rule applied when an imported document's `_id` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    #[default]
    SkipIfExists,
    Overwrite,
    MergeById,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" | "skip-if-exists" => Ok(ConflictPolicy::SkipIfExists),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "merge" | "merge-by-id" | "upsert" => Ok(ConflictPolicy::MergeById),
            other => Err(format!(
                "unknown policy '{other}' (expected skip, overwrite or merge)"
            )),
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::SkipIfExists => f.write_str("skip"),
            ConflictPolicy::Overwrite => f.write_str("overwrite"),
            ConflictPolicy::MergeById => f.write_str("merge"),
        }
    }
}

/// Import counters of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub policy: ConflictPolicy,
    pub inserted: u64,
    pub overwritten: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<DocumentFailure>,
    /// File-level problems, one per file that could not be read in full.
    pub errors: Vec<String>,
    /// The run stopped before every file of the collection was read.
    pub partial: bool,
}

impl ImportOutcome {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Documents written in any way.
    pub fn written(&self) -> u64 {
        self.inserted + self.overwritten
    }

    pub fn processed(&self) -> u64 {
        self.inserted + self.overwritten + self.skipped + self.failed
    }

    pub(crate) fn record_failure(&mut self, failure: DocumentFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }
}

/// Record of an import run, collections in processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub collections: Vec<(String, ImportOutcome)>,
    pub cancelled: bool,
}

impl ImportReport {
    pub fn outcome(&self, collection: &str) -> Option<&ImportOutcome> {
        self.collections
            .iter()
            .find(|(name, _)| name == collection)
            .map(|(_, outcome)| outcome)
    }

    /// Outcome of `collection`, added with `policy` on first use.
    pub(crate) fn outcome_mut(&mut self, collection: &str, policy: ConflictPolicy) -> &mut ImportOutcome {
        let index = match self.collections.iter().position(|(name, _)| name == collection) {
            Some(index) => index,
            None => {
                self.collections
                    .push((collection.to_string(), ImportOutcome::new(policy)));
                self.collections.len() - 1
            }
        };
        &mut self.collections[index].1
    }

    pub fn summary(&self) -> String {
        let mut builder = Builder::default();
        builder.push_record([
            "collection",
            "policy",
            "inserted",
            "overwritten",
            "skipped",
            "failed",
            "note",
        ]);
        for (name, o) in &self.collections {
            let note = if !o.errors.is_empty() {
                o.errors.join("; ")
            } else if o.partial {
                "partial".to_string()
            } else {
                String::new()
            };
            builder.push_record([
                name.clone(),
                o.policy.to_string(),
                o.inserted.to_string(),
                o.overwritten.to_string(),
                o.skipped.to_string(),
                o.failed.to_string(),
                note,
            ]);
        }
        let mut table = builder.build();
        table.with(Style::modern());

        let mut out = table.to_string();
        if self.cancelled {
            out.push_str("\nImport cancelled; remaining collections were not processed");
        }
        out
    }
}

impl RunReport for ImportReport {
    fn failed_documents(&self) -> u64 {
        self.collections.iter().map(|(_, o)| o.failed).sum()
    }

    fn failed_files(&self) -> u64 {
        self.collections.iter().map(|(_, o)| o.errors.len() as u64).sum()
    }

    fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionError, FormatError};

    fn manifest_with_failures(n: usize) -> ExportManifest {
        let mut manifest = ExportManifest::new(Form::Text, false, PathBuf::from("/tmp/out"));
        manifest.collections.push(CollectionManifest {
            name: "users".to_string(),
            file: "users.json".to_string(),
            form: Form::Text,
            documents_written: 3,
            failures: (0..n)
                .map(|i| DocumentFailure {
                    index: i as u64,
                    id: None,
                    reason: "bad".to_string(),
                })
                .collect(),
            status: CollectionStatus::Complete,
        });
        manifest
    }

    #[test]
    fn test_status_distinguishes_failure_kinds() {
        assert_eq!(
            RunOutcome::completed(manifest_with_failures(0)).status(),
            RunStatus::Completed
        );
        assert_eq!(
            RunOutcome::completed(manifest_with_failures(2)).status(),
            RunStatus::CompletedWithFailures(2)
        );

        let mut cancelled = manifest_with_failures(0);
        cancelled.cancelled = true;
        assert_eq!(RunOutcome::completed(cancelled).status(), RunStatus::Cancelled);

        let failed = RunOutcome::failed(
            manifest_with_failures(0),
            ConnectionError::NotConnected.into(),
        );
        assert_eq!(failed.status(), RunStatus::Failed);
        assert_eq!(failed.report.documents_written(), 3);
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("skip".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::SkipIfExists);
        assert_eq!("Overwrite".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Overwrite);
        assert_eq!("merge".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::MergeById);
        assert!("replace-all".parse::<ConflictPolicy>().is_err());
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::SkipIfExists);
    }

    #[test]
    fn test_summaries_mention_every_collection() {
        let manifest = manifest_with_failures(1);
        let summary = manifest.summary();
        assert!(summary.contains("users.json"));
        assert!(summary.contains("3 documents written"));

        let mut report = ImportReport::default();
        let mut outcome = ImportOutcome::new(ConflictPolicy::Overwrite);
        outcome.inserted = 4;
        outcome.record_failure(DocumentFailure::new(
            2,
            Some("7".to_string()),
            &FormatError::UnknownTag("$x".into()).into(),
        ));
        report.collections.push(("orders".to_string(), outcome));

        assert_eq!(report.failed_documents(), 1);
        assert!(report.summary().contains("orders"));
        assert_eq!(report.outcome("orders").unwrap().processed(), 5);
    }

    #[test]
    fn test_unreadable_files_degrade_import_status() {
        let mut report = ImportReport::default();
        report
            .outcome_mut("users", ConflictPolicy::SkipIfExists)
            .errors
            .push("users.json: not an export file".to_string());
        assert_eq!(report.failed_documents(), 0);
        assert_eq!(
            RunOutcome::completed(report.clone()).status(),
            RunStatus::CompletedWithFailures(1)
        );

        // A second file of the same collection lands in the same entry.
        let users = report.outcome_mut("users", ConflictPolicy::Overwrite);
        users.inserted = 2;
        assert_eq!(users.policy, ConflictPolicy::SkipIfExists);
        assert_eq!(report.collections.len(), 1);
        assert!(report.summary().contains("not an export file"));
    }
}
