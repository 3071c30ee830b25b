//! Background execution of export and import runs
//!
//! A run is moved onto its own tokio task so the caller stays responsive.
//! Progress comes back over a channel at batch granularity and the caller
//! keeps the cancellation token that the run polls between batches.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ExecutionError, Result};

use super::context::OperationContext;
use super::export::Exporter;
use super::import::{ImportPolicy, ImportSource, Importer};
use super::progress::{ChannelProgress, ProgressEvent};
use super::result::{ExportManifest, ImportReport, RunOutcome};

/// Handle to a run executing on a worker task.
pub struct WorkerHandle<T> {
    progress: mpsc::Receiver<ProgressEvent>,
    cancel: CancellationToken,
    join: JoinHandle<RunOutcome<T>>,
}

impl<T: Send + 'static> WorkerHandle<T> {
    fn spawn<F>(batch_size: u32, job: impl FnOnce(OperationContext) -> F) -> Self
    where
        F: Future<Output = RunOutcome<T>> + Send + 'static,
    {
        let (sink, progress) = ChannelProgress::channel();
        let cancel = CancellationToken::new();
        let ctx = OperationContext::new(batch_size)
            .with_progress(std::sync::Arc::new(sink))
            .with_cancellation(cancel.clone());
        let join = tokio::spawn(job(ctx));
        Self {
            progress,
            cancel,
            join,
        }
    }

    /// Ask the run to stop after the current batch.
    pub fn cancel(&self) {
        debug!("Cancellation requested for worker");
        self.cancel.cancel();
    }

    /// Token that cancels this run, e.g. for a signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next progress event; `None` once the run has finished and every
    /// event has been received.
    pub async fn next_progress(&mut self) -> Option<ProgressEvent> {
        self.progress.recv().await
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    ///
    /// # Returns
    /// * `Result<RunOutcome<T>>` - The run's outcome, or `WorkerFailed` if the task panicked
    pub async fn join(self) -> Result<RunOutcome<T>> {
        self.join
            .await
            .map_err(|e| ExecutionError::WorkerFailed(e.to_string()).into())
    }
}

/// Run an export on a worker task.
pub fn spawn_export(
    exporter: Exporter,
    collections: Vec<String>,
    destination: PathBuf,
    batch_size: u32,
) -> WorkerHandle<ExportManifest> {
    WorkerHandle::spawn(batch_size, move |ctx| async move {
        exporter.export(&collections, &destination, &ctx).await
    })
}

/// Run an import on a worker task.
pub fn spawn_import(
    importer: Importer,
    source: ImportSource,
    policy: ImportPolicy,
    batch_size: u32,
) -> WorkerHandle<ImportReport> {
    WorkerHandle::spawn(batch_size, move |ctx| async move {
        importer.import(&source, &policy, &ctx).await
    })
}
