//! MongoDB Data Portability Library
//!
//! This library provides the core functionality of mongoport: moving whole
//! databases in and out of MongoDB as portable files, and documenting their
//! structure. It can be used without the command-line binary.
//!
//! # Modules
//!
//! - `archive`: Packing and unpacking of export trees
//! - `cli`: Command-line interface and argument parsing
//! - `codec`: Value model and its text and binary encodings
//! - `config`: Configuration management
//! - `connection`: MongoDB connection management
//! - `datasource`: Database seam used by every run, with MongoDB and in-memory backends
//! - `error`: Error types and handling
//! - `executor`: Export and import engines, progress and cancellation
//! - `schema`: Schema inference and rendering
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use mongoport::{config::Config, connection::ConnectionManager};
//! use mongoport::executor::{ExportOptions, Exporter, OperationContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let mut manager = ConnectionManager::new(config.connection);
//!     manager.connect().await?;
//!
//!     let exporter = Exporter::new(Arc::new(manager.data_source("shop")?), ExportOptions::default());
//!     let outcome = exporter
//!         .export(&[], Path::new("shop-backup"), &OperationContext::default())
//!         .await;
//!     println!("{}", outcome.report.summary());
//!
//!     manager.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod codec;
pub mod config;
pub mod connection;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod schema;

// Re-export commonly used types
pub use codec::{Document, Form, Value, ValueCodec};
pub use config::Config;
pub use connection::ConnectionManager;
pub use datasource::{DataSource, MemoryDataSource, MongoDataSource};
pub use error::{PorterError, Result};
pub use executor::{
    ConflictPolicy, ExportManifest, Exporter, ImportPolicy, ImportReport, ImportSource, Importer,
    OperationContext, RunOutcome, RunStatus,
};
pub use schema::{SchemaFormat, SchemaReport, SchemaSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}
