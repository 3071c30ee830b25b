//! Schema inference over sampled documents
//!
//! Field paths are dotted (`address.city`); elements of an array share the
//! synthetic segment `[]` (`tags[]`, `items[].sku`), so element types are
//! aggregated rather than listed per index. Paths are kept in the order they
//! were first seen.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::{DEFAULT_MAX_DEPTH, Document, TypeTag, Value};
use crate::datasource::DataSource;
use crate::error::Result;
use crate::executor::context::OperationContext;
use crate::executor::progress::ProgressEvent;
use crate::executor::result::{RunOutcome, RunReport};

/// Default number of documents sampled per collection.
pub const DEFAULT_SAMPLE_SIZE: u64 = 1000;

/// Segment used for the elements of an array.
pub const ARRAY_SEGMENT: &str = "[]";

/// Statistics of one field path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStat {
    pub path: String,
    /// Tags in the order they were first seen.
    pub types: Vec<TypeTag>,
    /// Documents in which the path occurs, counted once per document.
    pub occurrences: u64,
    pub total_sampled: u64,
    /// First scalar value seen at the path.
    #[serde(skip)]
    pub example: Option<Value>,
    /// Nesting level, 0 for top-level fields.
    pub depth: usize,
}

impl FieldStat {
    fn new(path: String, depth: usize) -> Self {
        Self {
            path,
            types: Vec::new(),
            occurrences: 0,
            total_sampled: 0,
            example: None,
            depth,
        }
    }

    /// Share of sampled documents containing the path, in `0.0..=1.0`.
    pub fn occurrence_rate(&self) -> f64 {
        if self.total_sampled == 0 {
            0.0
        } else {
            self.occurrences as f64 / self.total_sampled as f64
        }
    }
}

/// Inferred schema of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaSummary {
    pub fields: Vec<FieldStat>,
    pub sampled: u64,
    /// Documents that could not be read into the value model.
    pub skipped: u64,
    #[serde(skip)]
    pub example: Option<Document>,
}

impl SchemaSummary {
    pub fn field(&self, path: &str) -> Option<&FieldStat> {
        self.fields.iter().find(|f| f.path == path)
    }
}

/// Incremental inferencer fed one document at a time.
///
/// Documents nested deeper than the ceiling are counted as skipped.
#[derive(Debug, Clone)]
pub struct SchemaInferencer {
    fields: Vec<FieldStat>,
    index: HashMap<String, usize>,
    sampled: u64,
    skipped: u64,
    example: Option<Document>,
    max_depth: usize,
}

impl Default for SchemaInferencer {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            index: HashMap::new(),
            sampled: 0,
            skipped: 0,
            example: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl SchemaInferencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different nesting ceiling.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn sampled(&self) -> u64 {
        self.sampled
    }

    /// Account for a document that could not be read.
    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    /// Add a driver document, counting it as skipped when it holds a value
    /// outside the value model.
    pub fn observe_raw(&mut self, doc: bson::Document) {
        match Document::try_from(doc) {
            Ok(doc) => self.observe(&doc),
            Err(e) => {
                debug!("Schema sample skipped: {}", e);
                self.skip();
            }
        }
    }

    pub fn observe(&mut self, doc: &Document) {
        if !fits_depth(doc, self.max_depth) {
            debug!("Schema sample skipped: nested deeper than {}", self.max_depth);
            self.skip();
            return;
        }
        if self.example.is_none() {
            self.example = Some(doc.clone());
        }
        self.sampled += 1;

        let mut seen = HashSet::new();
        self.walk_document(doc, "", 0, &mut seen);
    }

    pub fn finish(self) -> SchemaSummary {
        let sampled = self.sampled;
        let fields = self
            .fields
            .into_iter()
            .map(|mut f| {
                f.total_sampled = sampled;
                f
            })
            .collect();
        SchemaSummary {
            fields,
            sampled,
            skipped: self.skipped,
            example: self.example,
        }
    }

    fn walk_document(&mut self, doc: &Document, prefix: &str, depth: usize, seen: &mut HashSet<usize>) {
        for (key, value) in doc.iter() {
            let path = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}.{key}")
            };
            self.walk_value(path, value, depth, seen);
        }
    }

    fn walk_value(&mut self, path: String, value: &Value, depth: usize, seen: &mut HashSet<usize>) {
        let slot = self.record(&path, value, depth);
        if seen.insert(slot) {
            self.fields[slot].occurrences += 1;
        }

        match value {
            Value::Document(inner) => self.walk_document(inner, &path, depth + 1, seen),
            Value::Array(items) => {
                let element_path = format!("{path}{ARRAY_SEGMENT}");
                for item in items {
                    self.walk_value(element_path.clone(), item, depth + 1, seen);
                }
            }
            _ => {}
        }
    }

    /// Register `value` at `path`, returning the field's slot.
    fn record(&mut self, path: &str, value: &Value, depth: usize) -> usize {
        let slot = match self.index.get(path) {
            Some(&slot) => slot,
            None => {
                self.fields.push(FieldStat::new(path.to_string(), depth));
                self.index.insert(path.to_string(), self.fields.len() - 1);
                self.fields.len() - 1
            }
        };

        let field = &mut self.fields[slot];
        let tag = value.tag();
        if !field.types.contains(&tag) {
            field.types.push(tag);
        }
        if field.example.is_none() && !matches!(value, Value::Array(_) | Value::Document(_)) {
            field.example = Some(value.clone());
        }
        slot
    }
}

/// Whether `doc` nests at most `max_depth` levels, the document itself
/// being the first. Arrays count as a level, as in the codec.
fn fits_depth(doc: &Document, max_depth: usize) -> bool {
    fn document_fits(doc: &Document, remaining: usize) -> bool {
        remaining > 0 && doc.iter().all(|(_, v)| value_fits(v, remaining - 1))
    }
    fn value_fits(value: &Value, remaining: usize) -> bool {
        match value {
            Value::Document(doc) => document_fits(doc, remaining),
            Value::Array(items) => remaining > 0 && items.iter().all(|v| value_fits(v, remaining - 1)),
            _ => true,
        }
    }
    document_fits(doc, max_depth)
}

/// Infer a schema from at most `sample_size` documents (0 means all).
pub fn infer<'a>(docs: impl IntoIterator<Item = &'a Document>, sample_size: u64) -> SchemaSummary {
    let mut inferencer = SchemaInferencer::new();
    for doc in docs {
        if sample_size > 0 && inferencer.sampled() >= sample_size {
            break;
        }
        inferencer.observe(doc);
    }
    inferencer.finish()
}

/// Inferred schemas of a database, collections in the requested order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaReport {
    pub database: String,
    pub collections: Vec<(String, SchemaSummary)>,
    pub cancelled: bool,
}

impl SchemaReport {
    pub fn summary(&self, name: &str) -> Option<&SchemaSummary> {
        self.collections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }
}

impl RunReport for SchemaReport {
    fn failed_documents(&self) -> u64 {
        self.collections.iter().map(|(_, s)| s.skipped).sum()
    }

    fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Sample one collection from the data source.
///
/// Stops early, with what was sampled so far, when the context is cancelled.
pub async fn infer_collection(
    source: &dyn DataSource,
    collection: &str,
    sample_size: u64,
    max_depth: usize,
    ctx: &OperationContext,
) -> Result<SchemaSummary> {
    infer_collection_at(source, collection, sample_size, max_depth, ctx, (0, 1)).await
}

async fn infer_collection_at(
    source: &dyn DataSource,
    collection: &str,
    sample_size: u64,
    max_depth: usize,
    ctx: &OperationContext,
    (done, total): (usize, usize),
) -> Result<SchemaSummary> {
    let limit = (sample_size > 0).then_some(sample_size);
    let mut query = source.stream(collection, ctx.batch_size, limit).await?;
    let mut inferencer = SchemaInferencer::new().with_max_depth(max_depth);
    let mut processed = 0u64;

    let result = loop {
        if ctx.is_cancelled() {
            break Ok(());
        }
        match query.next_batch().await {
            Ok(Some(docs)) => {
                processed += docs.len() as u64;
                for doc in docs {
                    inferencer.observe_raw(doc);
                }
                ctx.report(ProgressEvent {
                    collection: collection.to_string(),
                    processed_in_collection: processed,
                    total_in_collection: limit,
                    collections_done: done,
                    collections_total: total,
                });
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let _ = query.close().await;
    result?;

    let summary = inferencer.finish();
    debug!(
        "Schema of {}: {} fields from {} documents",
        collection,
        summary.fields.len(),
        summary.sampled
    );
    Ok(summary)
}

/// Sample several collections; an empty list means every collection.
pub async fn infer_database(
    source: &dyn DataSource,
    collections: &[String],
    sample_size: u64,
    max_depth: usize,
    ctx: &OperationContext,
) -> RunOutcome<SchemaReport> {
    let start = Instant::now();
    let mut report = SchemaReport {
        database: source.database().to_string(),
        ..Default::default()
    };

    let names = if collections.is_empty() {
        match source.list_collections().await {
            Ok(names) => names,
            Err(e) => return RunOutcome::failed(report, e),
        }
    } else {
        if let Err(e) = source.ping().await {
            return RunOutcome::failed(report, e);
        }
        collections.to_vec()
    };

    for (done, name) in names.iter().enumerate() {
        if ctx.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let position = (done, names.len());
        match infer_collection_at(source, name, sample_size, max_depth, ctx, position).await {
            Ok(summary) => report.collections.push((name.clone(), summary)),
            Err(e) => {
                warn!("Schema inference aborted during {}: {}", name, e);
                return RunOutcome::failed(report, e);
            }
        }
    }
    if ctx.is_cancelled() {
        report.cancelled = true;
    }

    info!(
        "Inferred {} collection schemas in {} ms",
        report.collections.len(),
        start.elapsed().as_millis()
    );
    RunOutcome::completed(report)
}
