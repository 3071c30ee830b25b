//! Operation context
//!
//! Every run receives its cancellation flag, progress sink and batch size
//! through an [`OperationContext`] instead of shared global state. The batch
//! is the unit of both progress reporting and cancellation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::progress::{NoProgress, ProgressEvent, ProgressSink};

/// Default number of documents per batch.
pub const DEFAULT_BATCH_SIZE: u32 = 1000;

/// Per-run cancellation, progress and batching settings.
#[derive(Clone)]
pub struct OperationContext {
    /// Polled between batches.
    pub cancel: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
    pub batch_size: u32,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl OperationContext {
    /// Context with a fresh token and no progress reporting.
    pub fn new(batch_size: u32) -> Self {
        Self {
            cancel: CancellationToken::new(),
            progress: Arc::new(NoProgress),
            batch_size: batch_size.max(1),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report(&self, event: ProgressEvent) {
        self.progress.on_progress(&event);
    }
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_batch_size_is_clamped() {
        assert_eq!(OperationContext::new(0).batch_size, 1);
    }

    #[test]
    fn test_cancellation_is_shared_with_clones() {
        let ctx = OperationContext::default();
        let clone = ctx.clone();
        ctx.cancel.cancel();
        assert!(clone.is_cancelled());
    }
}
