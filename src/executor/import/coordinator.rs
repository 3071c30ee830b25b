//! Import coordinator
//!
//! Resolves the source into a directory tree, discovers per-collection files
//! in sorted order and applies each collection's conflict policy document by
//! document.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bson::Bson;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::archive::WorkTree;
use crate::codec::{Document, ValueCodec, collection_name_from_stem};
use crate::datasource::DataSource;
use crate::error::{PorterError, Result};
use crate::executor::context::OperationContext;
use crate::executor::progress::ProgressEvent;
use crate::executor::result::{
    ConflictPolicy, DocumentFailure, ImportOutcome, ImportReport, RunOutcome,
};

use super::readers::{RecordReader, open_sections};
use super::{ImportPolicy, ImportSource};

/// Extensions of per-collection files.
const DATA_EXTENSIONS: [&str; 3] = ["json", "bin", "bson"];

/// What happened to one written document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Inserted,
    Overwritten,
    Skipped,
}

/// One per-collection file found in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CollectionFile {
    collection: String,
    path: PathBuf,
}

/// Coordinator for import operations
pub struct Importer {
    target: Arc<dyn DataSource>,
    codec: ValueCodec,
}

impl Importer {
    pub fn new(target: Arc<dyn DataSource>) -> Self {
        Self {
            target,
            codec: ValueCodec::default(),
        }
    }

    /// Use a different nesting ceiling for decoding.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.codec = ValueCodec::new(max_depth);
        self
    }

    /// Import `source` into the target database.
    ///
    /// # Arguments
    /// * `source` - Archive, directory tree or single collection file
    /// * `policy` - Conflict policy per collection
    /// * `ctx` - Cancellation, progress and batch size
    ///
    /// # Returns
    /// * `RunOutcome<ImportReport>` - Per-collection outcomes, with the fatal error if the run aborted
    pub async fn import(
        &self,
        source: &ImportSource,
        policy: &ImportPolicy,
        ctx: &OperationContext,
    ) -> RunOutcome<ImportReport> {
        let span = info_span!(
            "import",
            run = %Uuid::new_v4(),
            db = %self.target.database(),
            source = %source.path().display()
        );
        self.run(source, policy, ctx).instrument(span).await
    }

    async fn run(
        &self,
        source: &ImportSource,
        policy: &ImportPolicy,
        ctx: &OperationContext,
    ) -> RunOutcome<ImportReport> {
        let start = Instant::now();
        let mut report = ImportReport::default();

        if let Err(e) = self.target.ping().await {
            return RunOutcome::failed(report, e);
        }

        // Holds an unpacked archive until the run ends.
        let (files, _tree) = match discover(source).await {
            Ok(found) => found,
            Err(e) => return RunOutcome::failed(report, e),
        };
        info!("Importing {} collection files", files.len());

        'files: for (done, file) in files.iter().enumerate() {
            if ctx.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let sections = match open_sections(&file.path, &file.collection, self.codec).await {
                Ok(sections) => sections,
                Err(e) => {
                    warn!("Cannot read {}: {}", file.path.display(), e);
                    report
                        .outcome_mut(&file.collection, policy.for_collection(&file.collection))
                        .errors
                        .push(file_error(&file.path, &e));
                    continue;
                }
            };

            for (collection, reader) in sections {
                // Files naming the same collection share one outcome.
                let outcome = report.outcome_mut(&collection, policy.for_collection(&collection));
                let fatal = self
                    .import_records(&collection, &file.path, reader, outcome, done, files.len(), ctx)
                    .await;
                let stopped = outcome.partial && fatal.is_none();

                if let Some(e) = fatal {
                    warn!("Import aborted during {}: {}", collection, e);
                    return RunOutcome::failed(report, e);
                }
                if stopped && ctx.is_cancelled() {
                    info!("Import cancelled during {}", collection);
                    report.cancelled = true;
                    break 'files;
                }
            }
        }

        info!(
            "Import finished: {} collections, {} ms",
            report.collections.len(),
            start.elapsed().as_millis()
        );
        RunOutcome::completed(report)
    }

    /// Import the records of one reader into `collection`, adding to `outcome`.
    ///
    /// Record positions continue from what `outcome` already counts.
    /// Returns the error that must end the whole run, if any.
    #[allow(clippy::too_many_arguments)]
    async fn import_records(
        &self,
        collection: &str,
        path: &Path,
        mut reader: Box<dyn RecordReader>,
        outcome: &mut ImportOutcome,
        done: usize,
        total: usize,
        ctx: &OperationContext,
    ) -> Option<PorterError> {
        let total_known = reader.total_hint();
        let batch_size = ctx.batch_size as usize;

        let mut index = outcome.processed();
        let mut read = 0u64;
        loop {
            if ctx.is_cancelled() {
                outcome.partial = true;
                return None;
            }

            let records = match reader.next_batch(batch_size).await {
                Ok(Some(records)) => records,
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopped reading {}: {}", path.display(), e);
                    outcome.errors.push(file_error(path, &e));
                    outcome.partial = true;
                    return None;
                }
            };

            for record in records {
                let position = index;
                index += 1;
                read += 1;

                let doc = match record {
                    Ok(doc) => doc,
                    Err(e) => {
                        debug!("Record {} of {} not decodable: {}", position, collection, e);
                        outcome.record_failure(DocumentFailure::new(position, None, &e.into()));
                        continue;
                    }
                };

                let id = doc.id().map(|id| Bson::from(id.clone()).to_string());
                match self.apply(collection, doc, outcome.policy).await {
                    Ok(Applied::Inserted) => outcome.inserted += 1,
                    Ok(Applied::Overwritten) => outcome.overwritten += 1,
                    Ok(Applied::Skipped) => outcome.skipped += 1,
                    Err(e) if e.is_fatal() => {
                        outcome.partial = true;
                        return Some(e);
                    }
                    Err(e) => {
                        debug!("Document {} of {} not written: {}", position, collection, e);
                        outcome.record_failure(DocumentFailure::new(position, id, &e));
                    }
                }
            }

            ctx.report(ProgressEvent {
                collection: collection.to_string(),
                processed_in_collection: read,
                total_in_collection: total_known,
                collections_done: done,
                collections_total: total,
            });
        }

        debug!(
            "Collection {} imported: {} inserted, {} overwritten, {} skipped, {} failed",
            collection, outcome.inserted, outcome.overwritten, outcome.skipped, outcome.failed
        );
        None
    }

    /// Write one document under `policy`.
    async fn apply(&self, collection: &str, doc: Document, policy: ConflictPolicy) -> Result<Applied> {
        let doc = bson::Document::from(doc);
        let Some(id) = doc.get("_id").cloned() else {
            self.target.insert_one(collection, doc).await?;
            return Ok(Applied::Inserted);
        };

        match policy {
            ConflictPolicy::SkipIfExists => {
                if self.target.exists(collection, &id).await? {
                    return Ok(Applied::Skipped);
                }
                self.target.insert_one(collection, doc).await?;
                Ok(Applied::Inserted)
            }
            ConflictPolicy::Overwrite => {
                if self.target.exists(collection, &id).await? {
                    let result = self.target.replace_one(collection, doc.clone(), false).await?;
                    if result.matched {
                        return Ok(Applied::Overwritten);
                    }
                }
                self.target.insert_one(collection, doc).await?;
                Ok(Applied::Inserted)
            }
            ConflictPolicy::MergeById => {
                let result = self.target.replace_one(collection, doc, true).await?;
                Ok(if result.matched {
                    Applied::Overwritten
                } else {
                    Applied::Inserted
                })
            }
        }
    }
}

/// List the collection files of `source`, with the tree that must outlive
/// reading them.
async fn discover(source: &ImportSource) -> Result<(Vec<CollectionFile>, Option<WorkTree>)> {
    let root = match source {
        ImportSource::File(path) => {
            if !path.is_file() {
                return Err(PorterError::SourceNotFound(path.clone()));
            }
            return Ok((vec![collection_file(path)], None));
        }
        ImportSource::Directory(path) => WorkTree::open(path, false).await?,
        ImportSource::Archive(path) => WorkTree::open(path, true).await?,
    };

    let mut files = Vec::new();
    for entry in WalkDir::new(root.path()).sort_by_file_name() {
        let entry = entry.map_err(|e| PorterError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if is_data_file(entry.path()) {
            files.push(collection_file(entry.path()));
        } else {
            debug!("Skipping {}: not a collection file", entry.path().display());
        }
    }
    debug!(
        "Discovered {} files under {} (temporary: {})",
        files.len(),
        root.path().display(),
        root.is_temporary()
    );
    Ok((files, Some(root)))
}

fn is_data_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            DATA_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// File-level error entry, prefixed with the file name.
fn file_error(path: &Path, error: &PorterError) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{name}: {error}")
}

fn collection_file(path: &Path) -> CollectionFile {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    CollectionFile {
        collection: collection_name_from_stem(&stem),
        path: path.to_path_buf(),
    }
}
