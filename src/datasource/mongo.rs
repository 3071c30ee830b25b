//! Data source backed by a live MongoDB database.

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{Collection, Cursor, Database};
use tracing::{debug, info};

use super::{DataSource, ReplaceResult, StreamingQuery, is_system_collection};
use crate::error::{ConnectionError, ExecutionError, Result};

/// [`DataSource`] over a driver database handle.
#[derive(Clone, Debug)]
pub struct MongoDataSource {
    db: Database,
}

impl MongoDataSource {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn id_filter(doc: &Document) -> Result<Document> {
    match doc.get("_id") {
        Some(id) => Ok(doc! { "_id": id.clone() }),
        None => Err(ExecutionError::InvalidParameters(
            "replace requires a document with an _id".to_string(),
        )
        .into()),
    }
}

#[async_trait]
impl DataSource for MongoDataSource {
    fn database(&self) -> &str {
        self.db.name()
    }

    async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ConnectionError::PingFailed(e.to_string()))?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .db
            .list_collection_names()
            .await?
            .into_iter()
            .filter(|name| !is_system_collection(name))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn estimated_count(&self, collection: &str) -> Result<Option<u64>> {
        let count = self.collection(collection).estimated_document_count().await?;
        Ok(Some(count))
    }

    async fn stream(
        &self,
        collection: &str,
        batch_size: u32,
        limit: Option<u64>,
    ) -> Result<Box<dyn StreamingQuery>> {
        let coll = self.collection(collection);
        let mut find = coll.find(doc! {}).batch_size(batch_size);
        if let Some(limit) = limit {
            find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let cursor = find.await?;
        Ok(Box::new(CursorStreamingQuery::new(
            cursor,
            batch_size,
            collection.to_string(),
        )))
    }

    async fn exists(&self, collection: &str, id: &Bson) -> Result<bool> {
        let found = self
            .collection(collection)
            .find_one(doc! { "_id": id.clone() })
            .projection(doc! { "_id": 1 })
            .await?;
        Ok(found.is_some())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<()> {
        self.collection(collection).insert_one(doc).await?;
        Ok(())
    }

    async fn replace_one(
        &self,
        collection: &str,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceResult> {
        let filter = id_filter(&doc)?;
        let result = self
            .collection(collection)
            .replace_one(filter, doc)
            .upsert(upsert)
            .await?;
        Ok(ReplaceResult {
            matched: result.matched_count > 0,
            upserted: result.upserted_id.is_some(),
        })
    }
}

/// Cursor-based streaming query
pub struct CursorStreamingQuery {
    cursor: Option<Cursor<Document>>,
    batch_size: u32,
    total_fetched: u64,
    collection: String,
    closed: bool,
}

impl CursorStreamingQuery {
    /// Create a new cursor streaming query
    ///
    /// # Arguments
    /// * `cursor` - Driver cursor from a find operation
    /// * `batch_size` - Number of documents to fetch per batch
    /// * `collection` - Collection name for logging
    pub fn new(cursor: Cursor<Document>, batch_size: u32, collection: String) -> Self {
        Self {
            cursor: Some(cursor),
            batch_size: batch_size.max(1),
            total_fetched: 0,
            collection,
            closed: false,
        }
    }
}

#[async_trait]
impl StreamingQuery for CursorStreamingQuery {
    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        if self.closed {
            return Ok(None);
        }

        let cursor = match self.cursor.as_mut() {
            Some(c) => c,
            None => return Ok(None),
        };

        let mut batch = Vec::with_capacity(self.batch_size as usize);
        for _ in 0..self.batch_size {
            match cursor.try_next().await {
                Ok(Some(doc)) => batch.push(doc),
                Ok(None) => break,
                Err(e) => {
                    // Release the server cursor before reporting.
                    self.cursor = None;
                    self.closed = true;
                    return Err(e.into());
                }
            }
        }

        if batch.is_empty() {
            debug!(
                "Cursor on {} exhausted after {} documents",
                self.collection, self.total_fetched
            );
            self.cursor = None;
            self.closed = true;
            Ok(None)
        } else {
            self.total_fetched += batch.len() as u64;
            debug!(
                "Fetched batch of {} documents from {} (total: {})",
                batch.len(),
                self.collection,
                self.total_fetched
            );
            Ok(Some(batch))
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.cursor = None;
            self.closed = true;
            info!(
                "Closed cursor on {} after fetching {} documents",
                self.collection, self.total_fetched
            );
        }
        Ok(())
    }
}

impl Drop for CursorStreamingQuery {
    fn drop(&mut self) {
        if !self.closed {
            debug!("Cursor on {} dropped without explicit close", self.collection);
            self.cursor = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_query_trait_object() {
        fn _accepts_streaming_query(_query: Box<dyn StreamingQuery>) {}
    }

    #[tokio::test]
    async fn test_stream_against_unreachable_server_is_fatal() {
        let client = mongodb::Client::with_uri_str(
            "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200&connectTimeoutMS=200",
        )
        .await
        .unwrap();
        let source = MongoDataSource::new(client.database("shop"));

        let Err(err) = source.stream("users", 10, Some(5)).await else {
            panic!("stream opened without a server");
        };
        assert!(err.is_fatal(), "{err}");
    }

    #[test]
    fn test_id_filter() {
        let filter = id_filter(&doc! { "_id": 7, "name": "x" }).unwrap();
        assert_eq!(filter, doc! { "_id": 7 });
        assert!(id_filter(&doc! { "name": "x" }).is_err());
    }
}
