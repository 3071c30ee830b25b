//! Export coordinator
//!
//! Streams every requested collection from the data source in batches,
//! encodes each document, and appends it to the collection's file. When
//! compression is requested the files are staged in a temporary directory
//! next to the archive, packed, and the staging tree removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::archive;
use crate::codec::{Document, Form, ValueCodec, collection_file_name};
use crate::datasource::DataSource;
use crate::error::{ExecutionError, FormatError, PorterError, Result};
use crate::executor::context::OperationContext;
use crate::executor::progress::ProgressEvent;
use crate::executor::result::{
    CollectionManifest, CollectionStatus, DocumentFailure, ExportManifest, RunOutcome,
};

use super::writers::open_writer;

/// Export settings chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub form: Form,
    pub compress: bool,
    /// Nesting ceiling for encoding.
    pub max_depth: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            form: Form::Text,
            compress: false,
            max_depth: crate::codec::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Outcome of one collection inside a run.
struct CollectionRun {
    manifest: CollectionManifest,
    fatal: Option<PorterError>,
    cancelled: bool,
}

/// Coordinator for export operations
pub struct Exporter {
    source: Arc<dyn DataSource>,
    options: ExportOptions,
    codec: ValueCodec,
}

impl Exporter {
    pub fn new(source: Arc<dyn DataSource>, options: ExportOptions) -> Self {
        Self {
            source,
            codec: ValueCodec::new(options.max_depth),
            options,
        }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Export collections to `destination`.
    ///
    /// # Arguments
    /// * `collections` - Collections in processing order; empty means all
    /// * `destination` - Output directory, or the archive file when compressing
    /// * `ctx` - Cancellation, progress and batch size
    ///
    /// # Returns
    /// * `RunOutcome<ExportManifest>` - The manifest, with the fatal error if the run aborted
    pub async fn export(
        &self,
        collections: &[String],
        destination: &Path,
        ctx: &OperationContext,
    ) -> RunOutcome<ExportManifest> {
        let span = info_span!(
            "export",
            run = %Uuid::new_v4(),
            db = %self.source.database(),
            form = %self.options.form
        );
        self.run(collections, destination, ctx).instrument(span).await
    }

    async fn run(
        &self,
        collections: &[String],
        destination: &Path,
        ctx: &OperationContext,
    ) -> RunOutcome<ExportManifest> {
        let start = Instant::now();
        let mut manifest = ExportManifest::new(
            self.options.form,
            self.options.compress,
            destination.to_path_buf(),
        );

        let names = match self.resolve_collections(collections).await {
            Ok(names) => names,
            Err(e) => return RunOutcome::failed(manifest, e),
        };

        // Keeps the staging directory alive until the archive is written.
        let (root, staging) = match prepare_root(destination, self.options.compress) {
            Ok(prepared) => prepared,
            Err(e) => return RunOutcome::failed(manifest, e),
        };
        info!(
            "Exporting {} collections to {}",
            names.len(),
            destination.display()
        );

        for (done, name) in names.iter().enumerate() {
            if ctx.is_cancelled() {
                info!("Export cancelled before collection {}", name);
                manifest.cancelled = true;
                break;
            }

            let run = self
                .export_collection(name, &root, done, names.len(), ctx)
                .await;
            manifest.collections.push(run.manifest);

            if let Some(e) = run.fatal {
                warn!("Export aborted during {}: {}", name, e);
                return RunOutcome::failed(manifest, e);
            }
            if run.cancelled {
                info!("Export cancelled during {}", name);
                manifest.cancelled = true;
                break;
            }
        }

        if self.options.compress {
            match archive::pack_tree(&root, destination).await {
                Ok(size) => debug!("Packed {} bytes into {}", size, destination.display()),
                Err(e) => return RunOutcome::failed(manifest, e),
            }
        }
        drop(staging);

        info!(
            "Export finished: {} documents, {} ms",
            manifest.documents_written(),
            start.elapsed().as_millis()
        );
        RunOutcome::completed(manifest)
    }

    async fn resolve_collections(&self, requested: &[String]) -> Result<Vec<String>> {
        let names = if requested.is_empty() {
            self.source.list_collections().await?
        } else {
            self.source.ping().await?;
            requested.to_vec()
        };
        if names.is_empty() {
            return Err(ExecutionError::NothingToExport(self.source.database().to_string()).into());
        }
        Ok(names)
    }

    async fn export_collection(
        &self,
        name: &str,
        root: &Path,
        done: usize,
        total: usize,
        ctx: &OperationContext,
    ) -> CollectionRun {
        let file = collection_file_name(name, self.options.form);
        let mut run = CollectionRun {
            manifest: CollectionManifest {
                name: name.to_string(),
                file: file.clone(),
                form: self.options.form,
                documents_written: 0,
                failures: Vec::new(),
                status: CollectionStatus::Partial,
            },
            fatal: None,
            cancelled: false,
        };

        let total_known = match self.source.estimated_count(name).await {
            Ok(count) => count,
            Err(e) if e.is_fatal() => {
                run.fatal = Some(e);
                return run;
            }
            Err(e) => {
                debug!("No count for {}: {}", name, e);
                None
            }
        };

        let mut writer = match open_writer(self.options.form, &root.join(&file)).await {
            Ok(w) => w,
            Err(e) => {
                run.fatal = Some(e);
                return run;
            }
        };
        let mut query = match self.source.stream(name, ctx.batch_size, None).await {
            Ok(q) => q,
            Err(e) => {
                let _ = writer.finalize().await;
                run.fatal = Some(e);
                return run;
            }
        };

        let mut index = 0u64;
        let mut exhausted = false;
        loop {
            if ctx.is_cancelled() {
                run.cancelled = true;
                break;
            }

            let docs = match query.next_batch().await {
                Ok(Some(docs)) => docs,
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    run.fatal = Some(e);
                    break;
                }
            };

            let mut records = Vec::with_capacity(docs.len());
            for doc in docs {
                let id = doc.get("_id").map(|id| id.to_string());
                match self.encode(doc) {
                    Ok(bytes) => records.push(bytes),
                    Err(e) => {
                        debug!("Document {} of {} not encodable: {}", index, name, e);
                        run.manifest
                            .failures
                            .push(DocumentFailure::new(index, id, &e.into()));
                    }
                }
                index += 1;
            }

            match writer.write_batch(&records).await {
                Ok(n) => run.manifest.documents_written += n as u64,
                Err(e) => {
                    run.fatal = Some(e);
                    break;
                }
            }

            ctx.report(ProgressEvent {
                collection: name.to_string(),
                processed_in_collection: index,
                total_in_collection: total_known,
                collections_done: done,
                collections_total: total,
            });
        }

        // Partial files stay valid: finalize even when stopping early.
        if let Err(e) = writer.finalize().await {
            run.fatal.get_or_insert(e);
        }
        let _ = query.close().await;

        if exhausted && run.fatal.is_none() {
            run.manifest.status = if run.manifest.documents_written == 0 {
                CollectionStatus::Empty
            } else {
                CollectionStatus::Complete
            };
        }
        debug!(
            "Collection {} exported: {} written, {} failed, {}",
            name,
            run.manifest.documents_written,
            run.manifest.failures.len(),
            run.manifest.status
        );
        run
    }

    fn encode(&self, doc: bson::Document) -> std::result::Result<Vec<u8>, FormatError> {
        let doc = Document::try_from(doc)?;
        self.codec.encode_document(&doc, self.options.form)
    }
}

/// Directory the collection files go to, and the staging directory guard
/// when compressing.
fn prepare_root(destination: &Path, compress: bool) -> Result<(PathBuf, Option<tempfile::TempDir>)> {
    if !compress {
        std::fs::create_dir_all(destination)?;
        return Ok((destination.to_path_buf(), None));
    }

    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".mongoport-staging-")
        .tempdir_in(&parent)?;
    Ok((staging.path().to_path_buf(), Some(staging)))
}
