//! In-process data source.
//!
//! Holds collections as ordered lists of driver documents. Besides backing
//! tests, it can simulate an unreachable server and refuse writes for chosen
//! identifiers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bson::{Bson, Document};
use tokio::sync::RwLock;

use super::{DataSource, ReplaceResult, StreamingQuery, is_system_collection};
use crate::error::{ConnectionError, ExecutionError, PorterError, Result};

/// [`DataSource`] over in-memory collections.
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    name: String,
    collections: RwLock<BTreeMap<String, Vec<Document>>>,
    offline: AtomicBool,
    rejected: RwLock<Vec<Bson>>,
}

impl MemoryDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style seeding of a collection.
    pub fn with_collection(mut self, name: impl Into<String>, docs: Vec<Document>) -> Self {
        self.collections.get_mut().insert(name.into(), docs);
        self
    }

    /// Replace a collection's contents.
    pub async fn seed(&self, name: impl Into<String>, docs: Vec<Document>) {
        self.collections.write().await.insert(name.into(), docs);
    }

    /// Snapshot of a collection, empty if absent.
    pub async fn documents(&self, name: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every subsequent call fail as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Refuse inserts and replaces of documents with this `_id`.
    pub async fn reject_writes_for(&self, id: impl Into<Bson>) {
        self.rejected.write().await.push(id.into());
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ConnectionError::ConnectionFailed(format!(
                "server for '{}' is unreachable",
                self.name
            ))
            .into())
        } else {
            Ok(())
        }
    }

    async fn check_writable(&self, doc: &Document) -> Result<()> {
        self.check_online()?;
        if let Some(id) = doc.get("_id") {
            if self.rejected.read().await.contains(id) {
                return Err(PorterError::WriteRejected(format!(
                    "document {id} refused by server"
                )));
            }
        }
        Ok(())
    }
}

fn position_of(docs: &[Document], id: &Bson) -> Option<usize> {
    docs.iter().position(|d| d.get("_id") == Some(id))
}

#[async_trait]
impl DataSource for MemoryDataSource {
    fn database(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.check_online()?;
        Ok(self
            .collections
            .read()
            .await
            .keys()
            .filter(|name| !is_system_collection(name))
            .cloned()
            .collect())
    }

    async fn estimated_count(&self, collection: &str) -> Result<Option<u64>> {
        self.check_online()?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.len() as u64))
    }

    async fn stream(
        &self,
        collection: &str,
        batch_size: u32,
        limit: Option<u64>,
    ) -> Result<Box<dyn StreamingQuery>> {
        self.check_online()?;
        let mut docs = self.documents(collection).await;
        if let Some(limit) = limit {
            docs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(Box::new(MemoryStreamingQuery {
            pending: docs.into(),
            batch_size: batch_size.max(1) as usize,
        }))
    }

    async fn exists(&self, collection: &str, id: &Bson) -> Result<bool> {
        self.check_online()?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .is_some_and(|docs| position_of(docs, id).is_some()))
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<()> {
        self.check_writable(&doc).await?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if let Some(id) = doc.get("_id") {
            if position_of(docs, id).is_some() {
                return Err(PorterError::WriteRejected(format!(
                    "duplicate key {id} in {collection}"
                )));
            }
        }
        docs.push(doc);
        Ok(())
    }

    async fn replace_one(
        &self,
        collection: &str,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceResult> {
        self.check_writable(&doc).await?;
        let id = doc.get("_id").cloned().ok_or_else(|| {
            ExecutionError::InvalidParameters("replace requires a document with an _id".into())
        })?;

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        match position_of(docs, &id) {
            Some(index) => {
                docs[index] = doc;
                Ok(ReplaceResult {
                    matched: true,
                    upserted: false,
                })
            }
            None if upsert => {
                docs.push(doc);
                Ok(ReplaceResult {
                    matched: false,
                    upserted: true,
                })
            }
            None => Ok(ReplaceResult::default()),
        }
    }
}

struct MemoryStreamingQuery {
    pending: VecDeque<Document>,
    batch_size: usize,
}

#[async_trait]
impl StreamingQuery for MemoryStreamingQuery {
    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = self.batch_size.min(self.pending.len());
        Ok(Some(self.pending.drain(..take).collect()))
    }

    async fn close(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn people() -> Vec<Document> {
        (1..=5).map(|i| doc! { "_id": i, "n": i * 10 }).collect()
    }

    #[tokio::test]
    async fn test_streams_in_batches() {
        let source = MemoryDataSource::new("db");
        source.seed("people", people()).await;

        let mut query = source.stream("people", 2, None).await.unwrap();
        let mut sizes = Vec::new();
        while let Some(batch) = query.next_batch().await.unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);

        let mut limited = source.stream("people", 10, Some(3)).await.unwrap();
        assert_eq!(limited.next_batch().await.unwrap().unwrap().len(), 3);
        assert!(limited.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_and_upsert() {
        let source = MemoryDataSource::new("db");
        source.seed("people", people()).await;

        let replaced = source
            .replace_one("people", doc! { "_id": 1, "n": -1 }, false)
            .await
            .unwrap();
        assert!(replaced.matched);

        let missing = source
            .replace_one("people", doc! { "_id": 99 }, false)
            .await
            .unwrap();
        assert_eq!(missing, ReplaceResult::default());

        let upserted = source
            .replace_one("people", doc! { "_id": 99 }, true)
            .await
            .unwrap();
        assert!(upserted.upserted);

        let docs = source.documents("people").await;
        assert_eq!(docs.len(), 6);
        assert_eq!(docs[0], doc! { "_id": 1, "n": -1 });
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected_but_not_fatal() {
        let source = MemoryDataSource::new("db");
        source.seed("people", people()).await;

        let err = source
            .insert_one("people", doc! { "_id": 1 })
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_offline_and_rejected_writes() {
        let source = MemoryDataSource::new("db").with_collection("people", people());
        source.reject_writes_for(3).await;

        let err = source
            .insert_one("other", doc! { "_id": 3 })
            .await
            .unwrap_err();
        assert!(matches!(err, PorterError::WriteRejected(_)));

        source.set_offline(true);
        let err = source.ping().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(source.list_collections().await.is_err());

        source.set_offline(false);
        assert_eq!(source.list_collections().await.unwrap(), vec!["people"]);
    }
}
