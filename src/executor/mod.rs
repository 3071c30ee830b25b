//! Execution engine for mongoport runs
//!
//! This module drives the long-running operations against a data source:
//! - Export of collections to per-collection files, optionally archived
//! - Import of exported trees, archives and single files
//! - Progress reporting and cooperative cancellation through [`OperationContext`]
//! - Run results that keep "failed entirely" apart from "completed with
//!   per-document failures"
//! - Worker tasks for callers that must stay responsive

pub mod context;
pub mod export;
pub mod import;
pub mod progress;
pub mod result;
pub mod worker;

pub use context::{DEFAULT_BATCH_SIZE, OperationContext};
pub use export::{ExportOptions, Exporter};
pub use import::{ImportPolicy, ImportSource, Importer};
pub use progress::{ChannelProgress, NoProgress, ProgressEvent, ProgressSink, ProgressTracker};
pub use result::{
    CollectionManifest, CollectionStatus, ConflictPolicy, DocumentFailure, ExportManifest,
    ImportOutcome, ImportReport, RunOutcome, RunReport, RunStatus,
};
pub use worker::{WorkerHandle, spawn_export, spawn_import};
