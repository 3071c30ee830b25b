//! Live data source seam
//!
//! The exporter, importer and schema inferencer talk to the database only
//! through [`DataSource`]. Documents cross this seam in the driver's own
//! representation (`bson::Document`); conversion into the engine's value
//! model happens per document on the engine side, so a document the model
//! cannot represent fails alone.
//!
//! Two implementations are provided:
//! - [`MongoDataSource`]: a live `mongodb::Database`
//! - [`MemoryDataSource`]: an in-process store for tests and offline runs

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::error::Result;

pub mod memory;
pub mod mongo;

pub use memory::MemoryDataSource;
pub use mongo::{CursorStreamingQuery, MongoDataSource};

/// Trait for streaming documents in batches
///
/// Implementations hold at most one batch in memory.
#[async_trait]
pub trait StreamingQuery: Send {
    /// Fetch the next batch of documents
    ///
    /// # Returns
    /// * `Result<Option<Vec<Document>>>` - Next batch of documents, or None if exhausted
    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>>;

    /// Close the query and release server resources
    async fn close(&mut self) -> Result<()>;
}

/// Outcome of a replace-by-identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaceResult {
    /// A stored document with the same `_id` was replaced.
    pub matched: bool,
    /// No stored document matched and the document was inserted.
    pub upserted: bool,
}

/// Handle to one database.
///
/// Connectivity failures surface as fatal errors (see
/// [`PorterError::is_fatal`](crate::error::PorterError::is_fatal)); a write
/// refused for one document surfaces as a non-fatal one.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Database name.
    fn database(&self) -> &str;

    /// Check that the server is reachable.
    async fn ping(&self) -> Result<()>;

    /// Collection names in a stable order, system collections excluded.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Cheap document count, `None` when the source cannot tell.
    async fn estimated_count(&self, collection: &str) -> Result<Option<u64>>;

    /// Stream a collection in natural order.
    ///
    /// # Arguments
    /// * `collection` - Collection name
    /// * `batch_size` - Documents per batch
    /// * `limit` - Stop after this many documents
    async fn stream(
        &self,
        collection: &str,
        batch_size: u32,
        limit: Option<u64>,
    ) -> Result<Box<dyn StreamingQuery>>;

    /// Whether a document with this `_id` is stored.
    async fn exists(&self, collection: &str, id: &Bson) -> Result<bool>;

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<()>;

    /// Replace the document with the same `_id` as `doc`.
    ///
    /// With `upsert`, a missing document is inserted instead.
    async fn replace_one(&self, collection: &str, doc: Document, upsert: bool)
    -> Result<ReplaceResult>;
}

/// Whether a collection name belongs to the server's own bookkeeping.
pub(crate) fn is_system_collection(name: &str) -> bool {
    name.starts_with("system.")
}
