//! Export of whole databases to per-collection files
//!
//! The export pipeline is built on three components:
//!
//! 1. **StreamingQuery** ([`crate::datasource`]): batches of documents from the source
//! 2. **FormatWriter**: frames encoded documents into a JSON Lines or binary file
//! 3. **Exporter**: drives both per collection, records failures in the
//!    manifest, reports progress and packs the tree when compressing
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use mongoport::codec::Form;
//! use mongoport::datasource::MemoryDataSource;
//! use mongoport::executor::OperationContext;
//! use mongoport::executor::export::{ExportOptions, Exporter};
//!
//! # async fn run() {
//! let source = Arc::new(MemoryDataSource::new("app"));
//! let options = ExportOptions { form: Form::Binary, compress: true, ..Default::default() };
//! let outcome = Exporter::new(source, options)
//!     .export(&[], Path::new("backup.zip"), &OperationContext::default())
//!     .await;
//! println!("{}", outcome.report.summary());
//! # }
//! ```

pub mod coordinator;
pub mod writers;

pub use coordinator::{ExportOptions, Exporter};
pub use writers::{BinaryWriter, FormatWriter, JsonLWriter};

#[cfg(test)]
mod tests;
