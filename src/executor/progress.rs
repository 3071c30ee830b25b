//! Progress reporting for export, import and schema runs
//!
//! Engines emit one [`ProgressEvent`] after every batch through a
//! [`ProgressSink`] carried by the operation context. Sinks provided here:
//! - [`NoProgress`]: discards events
//! - any `Fn(&ProgressEvent)` closure
//! - [`ChannelProgress`]: forwards events to another task over a channel
//! - [`ProgressTracker`]: terminal progress bar

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// Progress after one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub collection: String,
    pub processed_in_collection: u64,
    /// `None` when the source cannot count cheaply.
    pub total_in_collection: Option<u64>,
    pub collections_done: usize,
    pub collections_total: usize,
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Sink that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Events buffered by [`ChannelProgress::channel`].
pub const PROGRESS_CAPACITY: usize = 256;

/// Sink that sends events over a bounded channel.
///
/// Delivery never blocks the worker. Events are dropped while the channel
/// is full or after the receiver is gone, so a caller that stops draining
/// only misses updates.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn channel() -> (Self, mpsc::Receiver<ProgressEvent>) {
        Self::with_capacity(PROGRESS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event.clone()) {
            trace!("Progress channel full, dropped event for {}", event.collection);
        }
    }
}

/// Progress bar for terminal runs
///
/// Shows the current collection, documents processed and throughput.
pub struct ProgressTracker {
    /// Documents processed across all collections
    processed: AtomicU64,
    /// Documents processed in finished collections
    finished: AtomicU64,
    start_time: Instant,
    /// Progress bar (optional, can be disabled)
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `enable_bar` - Whether to display a progress bar
    pub fn new(enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| {
            let bar = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        });

        Self {
            processed: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Total documents seen so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

impl ProgressSink for ProgressTracker {
    fn on_progress(&self, event: &ProgressEvent) {
        let finished = self.finished.load(Ordering::Relaxed);
        let total = finished + event.processed_in_collection;
        self.processed.store(total, Ordering::Relaxed);

        let collection_done = event
            .total_in_collection
            .is_some_and(|n| event.processed_in_collection >= n);
        if collection_done {
            self.finished.store(total, Ordering::Relaxed);
        }

        if let Some(ref bar) = self.bar {
            bar.set_prefix(format!(
                "{}/{} {}",
                (event.collections_done + 1).min(event.collections_total),
                event.collections_total,
                event.collection
            ));
            bar.set_length(
                event
                    .total_in_collection
                    .unwrap_or(event.processed_in_collection),
            );
            bar.set_position(event.processed_in_collection);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                bar.set_message(format!("({:.0} docs/sec)", total as f64 / elapsed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(processed: u64, total: Option<u64>) -> ProgressEvent {
        ProgressEvent {
            collection: "users".to_string(),
            processed_in_collection: processed,
            total_in_collection: total,
            collections_done: 0,
            collections_total: 2,
        }
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |e: &ProgressEvent| seen.lock().unwrap().push(e.processed_in_collection);
        sink.on_progress(&event(10, None));
        sink.on_progress(&event(20, None));
        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelProgress::channel();
        sink.on_progress(&event(5, Some(5)));
        assert_eq!(rx.recv().await.unwrap(), event(5, Some(5)));

        drop(rx);
        // No receiver left; must not panic.
        sink.on_progress(&event(6, Some(6)));
    }

    #[test]
    fn test_undrained_channel_does_not_grow() {
        let (sink, mut rx) = ChannelProgress::with_capacity(4);
        for n in 0..10_000 {
            sink.on_progress(&event(n, None));
        }

        let mut kept = Vec::new();
        while let Ok(e) = rx.try_recv() {
            kept.push(e.processed_in_collection);
        }
        assert_eq!(kept, vec![0, 1, 2, 3]);

        sink.on_progress(&event(10_000, None));
        assert_eq!(rx.try_recv().unwrap().processed_in_collection, 10_000);
    }

    #[test]
    fn test_tracker_accumulates_across_collections() {
        let tracker = ProgressTracker::new(false);
        tracker.on_progress(&event(100, Some(100)));
        let mut next = event(40, None);
        next.collection = "orders".to_string();
        next.collections_done = 1;
        tracker.on_progress(&next);
        assert_eq!(tracker.processed(), 140);
        tracker.finish();
    }
}
