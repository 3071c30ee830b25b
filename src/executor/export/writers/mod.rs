//! Format writers for export operations
//!
//! A writer frames already-encoded documents into one per-collection file.
//! Encoding happens in the coordinator so that a document that cannot be
//! encoded never reaches the file.

use async_trait::async_trait;
use std::path::Path;
use tokio::fs::File;
use tokio::io::BufWriter;

use crate::codec::Form;
use crate::error::Result;

pub mod binary;
pub mod jsonl;

pub use binary::BinaryWriter;
pub use jsonl::JsonLWriter;

/// Trait for writing encoded documents to a per-collection file
#[async_trait]
pub trait FormatWriter: Send {
    /// Write a batch of encoded documents
    ///
    /// # Arguments
    /// * `records` - One encoded document per element
    ///
    /// # Returns
    /// * `Result<usize>` - Number of documents written
    async fn write_batch(&mut self, records: &[Vec<u8>]) -> Result<usize>;

    /// Flush buffered output. The file stays valid after every call.
    async fn finalize(&mut self) -> Result<()>;

    /// Current file size in bytes
    async fn file_size(&self) -> Result<u64>;
}

/// Create the writer for a form.
pub async fn open_writer(form: Form, path: &Path) -> Result<Box<dyn FormatWriter>> {
    Ok(match form {
        Form::Text => Box::new(JsonLWriter::new(path).await?),
        Form::Binary => Box::new(BinaryWriter::new(path).await?),
    })
}

/// Helper function to create a buffered file writer
pub(crate) async fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).await?;
    Ok(BufWriter::with_capacity(1024 * 1024, file))
}
