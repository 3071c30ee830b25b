//! Per-collection file readers for import
//!
//! The layout of each file is detected from its first bytes
//! ([`crate::codec::probe`]). Readers yield one entry per record: a decoded
//! document, or the [`FormatError`] of that record alone. An `Err` from
//! [`RecordReader::next_batch`] means the file itself cannot be read any
//! further.
//!
//! A combined JSON file, one object mapping collection names to arrays of
//! documents, is split into one section per collection by [`open_sections`].

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::debug;

use crate::codec::layout::{BINARY_MAGIC, MAX_BSON_SIZE, PROBE_LEN};
use crate::codec::{Document, FileLayout, Form, ValueCodec, probe};
use crate::error::{FormatError, Result};

/// One record: the document or why it could not be decoded.
pub type Record = std::result::Result<Document, FormatError>;

/// Trait for reading records from an export file in batches
#[async_trait]
pub trait RecordReader: Send {
    /// Next batch of at most `max` records, `None` once the file is exhausted.
    async fn next_batch(&mut self, max: usize) -> Result<Option<Vec<Record>>>;

    /// Number of records when known up front.
    fn total_hint(&self) -> Option<u64> {
        None
    }
}

/// Open a reader for `path`, choosing the layout by content.
pub async fn open_reader(path: &Path, codec: ValueCodec) -> Result<Box<dyn RecordReader>> {
    let mut file = File::open(path).await?;
    let prefix = read_prefix(&mut file).await?;
    let layout = probe(&prefix, &path.display().to_string())?;
    debug!("{} detected as {:?}", path.display(), layout);

    let file = File::open(path).await?;
    Ok(match layout {
        FileLayout::JsonLines => Box::new(JsonLinesReader::new(file, codec)),
        FileLayout::JsonArray => Box::new(JsonArrayReader::open(file, codec).await?),
        FileLayout::Binary => Box::new(BinaryReader::open(file, codec).await?),
        FileLayout::Bson => Box::new(BsonReader::open(file, codec).await?),
    })
}

/// Readers for every collection stored in `path`.
///
/// A combined JSON file yields one section per key; any other file is a
/// single section named `collection`.
pub async fn open_sections(
    path: &Path,
    collection: &str,
    codec: ValueCodec,
) -> Result<Vec<(String, Box<dyn RecordReader>)>> {
    if let Some(sections) = open_combined(path, codec).await? {
        debug!("{} is a combined file of {} collections", path.display(), sections.len());
        return Ok(sections);
    }
    Ok(vec![(collection.to_string(), open_reader(path, codec).await?)])
}

/// Split a combined JSON file, or `None` when `path` is not one.
///
/// The file must not start with a complete JSON Lines record, and must
/// parse as one object whose values are all arrays.
async fn open_combined(
    path: &Path,
    codec: ValueCodec,
) -> Result<Option<Vec<(String, Box<dyn RecordReader>)>>> {
    let mut file = File::open(path).await?;
    let prefix = read_prefix(&mut file).await?;
    if !matches!(probe(&prefix, &path.display().to_string()), Ok(FileLayout::JsonLines)) {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(path).await?);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        let text = line.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&line).trim_ascii();
        if text.is_empty() {
            continue;
        }
        if codec.parse_json(text).is_ok() {
            return Ok(None);
        }
        break;
    }

    let content = tokio::fs::read(path).await?;
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&content);
    // Collection object, then the array, then each document.
    let outer = ValueCodec::new(codec.max_depth() + 2);
    let Ok(JsonValue::Object(sections)) = outer.parse_json(content) else {
        return Ok(None);
    };
    if sections.is_empty() || !sections.values().all(JsonValue::is_array) {
        return Ok(None);
    }

    Ok(Some(
        sections
            .into_iter()
            .filter_map(|(name, docs)| match docs {
                JsonValue::Array(items) => Some((
                    name,
                    Box::new(JsonArrayReader::from_items(items, codec)) as Box<dyn RecordReader>,
                )),
                _ => None,
            })
            .collect(),
    ))
}

async fn read_prefix(file: &mut File) -> Result<Vec<u8>> {
    let mut prefix = vec![0u8; PROBE_LEN];
    let mut filled = 0;
    while filled < PROBE_LEN {
        let n = file.read(&mut prefix[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    prefix.truncate(filled);
    Ok(prefix)
}

/// One document per line; blank lines are ignored.
///
/// Lines are read as raw bytes so a line that is not valid UTF-8 fails on
/// its own instead of ending the file.
pub struct JsonLinesReader {
    reader: BufReader<File>,
    line: Vec<u8>,
    codec: ValueCodec,
}

impl JsonLinesReader {
    pub fn new(file: File, codec: ValueCodec) -> Self {
        Self {
            reader: BufReader::new(file),
            line: Vec::new(),
            codec,
        }
    }
}

#[async_trait]
impl RecordReader for JsonLinesReader {
    async fn next_batch(&mut self, max: usize) -> Result<Option<Vec<Record>>> {
        let mut batch = Vec::with_capacity(max.min(1024));
        while batch.len() < max {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                break;
            }
            let Ok(text) = std::str::from_utf8(&self.line) else {
                batch.push(Err(FormatError::InvalidPayload(
                    "line is not valid UTF-8".into(),
                )));
                continue;
            };
            let text = text.trim_start_matches('\u{feff}').trim();
            if text.is_empty() {
                continue;
            }
            batch.push(decode_json_line(text.as_bytes(), &self.codec));
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}

fn decode_json_line(line: &[u8], codec: &ValueCodec) -> Record {
    let json = codec.parse_json(line)?;
    codec.document_from_json(&json)
}

/// A single JSON array of documents, as written by older exports.
///
/// The array is parsed as a whole; elements are decoded lazily.
pub struct JsonArrayReader {
    pending: VecDeque<JsonValue>,
    total: u64,
    codec: ValueCodec,
}

impl JsonArrayReader {
    pub async fn open(mut file: File, codec: ValueCodec) -> Result<Self> {
        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;
        let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&content);
        // The enclosing array is one level above each document.
        let outer = ValueCodec::new(codec.max_depth() + 1);
        match outer.parse_json(content)? {
            JsonValue::Array(items) => Ok(Self::from_items(items, codec)),
            _ => Err(FormatError::InvalidJson("expected an array of documents".into()).into()),
        }
    }

    pub fn from_items(items: Vec<JsonValue>, codec: ValueCodec) -> Self {
        Self {
            total: items.len() as u64,
            pending: items.into(),
            codec,
        }
    }
}

#[async_trait]
impl RecordReader for JsonArrayReader {
    async fn next_batch(&mut self, max: usize) -> Result<Option<Vec<Record>>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = max.min(self.pending.len());
        Ok(Some(
            self.pending
                .drain(..take)
                .map(|json| self.codec.document_from_json(&json))
                .collect(),
        ))
    }

    fn total_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

/// Framed binary records after the file magic.
pub struct BinaryReader {
    reader: BufReader<File>,
    remaining: u64,
    codec: ValueCodec,
    done: bool,
}

impl BinaryReader {
    pub async fn open(file: File, codec: ValueCodec) -> Result<Self> {
        let size = file.metadata().await?.len();
        let mut reader = BufReader::new(file);
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).await?;
        if &magic != BINARY_MAGIC {
            return Err(FormatError::UnrecognizedFile("missing binary header".into()).into());
        }
        Ok(Self {
            reader,
            remaining: size.saturating_sub(BINARY_MAGIC.len() as u64),
            codec,
            done: false,
        })
    }

    /// Next record, or `None` at a clean end of file.
    async fn next_record(&mut self) -> Result<Option<Record>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.remaining < 4 {
            // A torn length prefix: nothing after it can be framed.
            let needed = 4;
            let remaining = self.remaining as usize;
            self.remaining = 0;
            return Ok(Some(Err(FormatError::Truncated { needed, remaining })));
        }

        let mut len = [0u8; 4];
        self.reader.read_exact(&mut len).await?;
        self.remaining -= 4;
        let len = u64::from(u32::from_le_bytes(len));
        if len > self.remaining {
            let remaining = self.remaining as usize;
            self.remaining = 0;
            return Ok(Some(Err(FormatError::Truncated {
                needed: len as usize,
                remaining,
            })));
        }

        let mut record = vec![0u8; len as usize];
        self.reader.read_exact(&mut record).await?;
        self.remaining -= len;
        Ok(Some(self.codec.decode_document(&record, Form::Binary)))
    }
}

#[async_trait]
impl RecordReader for BinaryReader {
    async fn next_batch(&mut self, max: usize) -> Result<Option<Vec<Record>>> {
        if self.done {
            return Ok(None);
        }
        let mut batch = Vec::with_capacity(max.min(1024));
        while batch.len() < max {
            match self.next_record().await? {
                Some(record) => batch.push(record),
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// Concatenated BSON documents, each framed by its own int32 length.
pub struct BsonReader {
    reader: BufReader<File>,
    remaining: u64,
    codec: ValueCodec,
    done: bool,
}

impl BsonReader {
    pub async fn open(file: File, codec: ValueCodec) -> Result<Self> {
        let size = file.metadata().await?.len();
        Ok(Self {
            reader: BufReader::new(file),
            remaining: size,
            codec,
            done: false,
        })
    }

    /// Next document, or `None` at a clean end of file.
    async fn next_record(&mut self) -> Result<Option<Record>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.remaining < 4 {
            let remaining = self.remaining as usize;
            self.remaining = 0;
            return Ok(Some(Err(FormatError::Truncated { needed: 4, remaining })));
        }

        let mut len_bytes = [0u8; 4];
        self.reader.read_exact(&mut len_bytes).await?;
        let len = i32::from_le_bytes(len_bytes);
        let len = match usize::try_from(len) {
            Ok(n) if (5..=MAX_BSON_SIZE).contains(&n) => n,
            // Without a usable length nothing after this point can be framed.
            _ => {
                self.remaining = 0;
                return Ok(Some(Err(FormatError::InvalidPayload(format!(
                    "bson: document length {len} out of range"
                )))));
            }
        };
        if len as u64 > self.remaining {
            let remaining = self.remaining as usize;
            self.remaining = 0;
            return Ok(Some(Err(FormatError::Truncated {
                needed: len,
                remaining,
            })));
        }

        let mut record = vec![0u8; len];
        record[..4].copy_from_slice(&len_bytes);
        self.reader.read_exact(&mut record[4..]).await?;
        self.remaining -= len as u64;
        Ok(Some(self.codec.decode_bson_document(&record)))
    }
}

#[async_trait]
impl RecordReader for BsonReader {
    async fn next_batch(&mut self, max: usize) -> Result<Option<Vec<Record>>> {
        if self.done {
            return Ok(None);
        }
        let mut batch = Vec::with_capacity(max.min(1024));
        while batch.len() < max {
            match self.next_record().await? {
                Some(record) => batch.push(record),
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}
