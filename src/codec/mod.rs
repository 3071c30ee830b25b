//! Value codec
//!
//! This module converts document values to and from the two serialized forms
//! used by export files:
//! - Structured text (JSON with Extended-JSON type tags)
//! - Compact binary (tag byte + length/count prefixed payloads)
//!
//! # Design
//!
//! Values are an explicit tagged union ([`Value`]); both forms dispatch on
//! the tag, so `decode(encode(v, f), f) == v` for every value and form.
//! Decoding is defensive: unknown tags, prefixes that exceed the buffer and
//! nesting beyond the configured ceiling all fail with a [`FormatError`].

mod binary;
mod convert;
pub mod layout;
mod text;
mod value;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::FormatError;

pub use convert::binary_subtype_to_u8;
pub use layout::{FileLayout, collection_file_name, collection_name_from_stem, probe};
pub use value::{BinaryBlob, Document, RegexValue, TypeTag, Value};

/// Default nesting ceiling for encode and decode.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Highest accepted nesting ceiling. Decoding recurses once per level, so
/// the ceiling also bounds stack use.
pub const MAX_DEPTH_LIMIT: usize = 256;

/// Serialized form of a value or export file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Form {
    /// Structured text (JSON)
    #[default]
    Text,
    /// Compact binary
    Binary,
}

impl Form {
    /// File extension of per-collection files in this form.
    pub fn extension(self) -> &'static str {
        match self {
            Form::Text => "json",
            Form::Binary => "bin",
        }
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Form::Text => f.write_str("text"),
            Form::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for Form {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "json" => Ok(Form::Text),
            "binary" | "bin" => Ok(Form::Binary),
            other => Err(format!("unknown form '{other}' (expected text or binary)")),
        }
    }
}

/// Encoder/decoder for [`Value`]s with a nesting ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueCodec {
    max_depth: usize,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ValueCodec {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Encode a value. Text form yields UTF-8 JSON.
    pub fn encode(&self, value: &Value, form: Form) -> Result<Vec<u8>, FormatError> {
        match form {
            Form::Text => {
                let json = self.to_json(value)?;
                serde_json::to_vec(&json).map_err(|e| FormatError::InvalidJson(e.to_string()))
            }
            Form::Binary => binary::encode(value, self.max_depth),
        }
    }

    /// Decode a value previously produced by [`ValueCodec::encode`].
    pub fn decode(&self, bytes: &[u8], form: Form) -> Result<Value, FormatError> {
        match form {
            Form::Text => {
                let json = self.parse_json(bytes)?;
                self.from_json(&json)
            }
            Form::Binary => binary::decode(bytes, self.max_depth),
        }
    }

    pub fn encode_document(&self, doc: &Document, form: Form) -> Result<Vec<u8>, FormatError> {
        match form {
            Form::Text => {
                let json = text::encode_document(doc, 0, self.max_depth)?;
                serde_json::to_vec(&json).map_err(|e| FormatError::InvalidJson(e.to_string()))
            }
            Form::Binary => {
                // Documents are encoded as a document-tagged value so the
                // binary decoder sees the same shape at every level.
                binary::encode(&Value::Document(doc.clone()), self.max_depth)
            }
        }
    }

    pub fn decode_document(&self, bytes: &[u8], form: Form) -> Result<Document, FormatError> {
        match self.decode(bytes, form)? {
            Value::Document(doc) => Ok(doc),
            other => Err(FormatError::InvalidPayload(format!(
                "expected a document, found {}",
                other.tag()
            ))),
        }
    }

    /// Text form as a JSON tree.
    pub fn to_json(&self, value: &Value) -> Result<JsonValue, FormatError> {
        text::encode_value(value, 0, self.max_depth)
    }

    pub fn document_to_json(&self, doc: &Document) -> Result<JsonValue, FormatError> {
        text::encode_document(doc, 0, self.max_depth)
    }

    /// Inverse of [`ValueCodec::to_json`].
    pub fn from_json(&self, json: &JsonValue) -> Result<Value, FormatError> {
        text::decode_value(json, 0, self.max_depth)
    }

    pub fn document_from_json(&self, json: &JsonValue) -> Result<Document, FormatError> {
        text::decode_document(json, self.max_depth)
    }

    /// Decode one serialized BSON document, as found in `.bson` dump files.
    pub fn decode_bson_document(&self, bytes: &[u8]) -> Result<Document, FormatError> {
        convert::document_from_bson_bytes(bytes, self.max_depth)
    }

    /// Parse JSON text nested no deeper than the text form of a value
    /// within the ceiling can be.
    ///
    /// Tag wrappers add JSON levels that are not value levels, so the JSON
    /// ceiling is `2 * max_depth + 2` and the parser's own fixed recursion
    /// limit is replaced by this check.
    pub fn parse_json(&self, bytes: &[u8]) -> Result<JsonValue, FormatError> {
        if json_nesting(bytes) > self.max_depth.saturating_mul(2).saturating_add(2) {
            return Err(FormatError::DepthExceeded(self.max_depth));
        }
        let mut de = serde_json::Deserializer::from_slice(bytes);
        de.disable_recursion_limit();
        let json = JsonValue::deserialize(&mut de).map_err(|e| FormatError::InvalidJson(e.to_string()))?;
        de.end().map_err(|e| FormatError::InvalidJson(e.to_string()))?;
        Ok(json)
    }
}

/// Deepest bracket nesting of JSON text, ignoring brackets inside strings.
fn json_nesting(bytes: &[u8]) -> usize {
    let (mut depth, mut deepest) = (0usize, 0usize);
    let (mut in_string, mut escaped) = (false, false);
    for &b in bytes {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

/// Step one container level deeper, failing past the ceiling.
pub(crate) fn enter(depth: usize, max_depth: usize) -> Result<usize, FormatError> {
    let next = depth + 1;
    if next > max_depth {
        Err(FormatError::DepthExceeded(max_depth))
    } else {
        Ok(next)
    }
}

#[cfg(test)]
mod tests;
