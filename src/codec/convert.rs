//! Conversion between driver BSON values and the engine's [`Value`] model.
//!
//! Driver types without a counterpart in the value model (Decimal128,
//! timestamps, JavaScript code, ...) fail with
//! [`FormatError::UnsupportedType`]; the exporter records that as a failure of
//! the one document carrying the value.

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, RawBsonRef, RawDocument};

use super::enter;
use super::value::{BinaryBlob, Document, RegexValue, Value};
use crate::error::FormatError;

/// Convert BinarySubtype to its wire byte.
pub fn binary_subtype_to_u8(subtype: BinarySubtype) -> u8 {
    match subtype {
        BinarySubtype::Generic => 0,
        BinarySubtype::Function => 1,
        BinarySubtype::BinaryOld => 2,
        BinarySubtype::UuidOld => 3,
        BinarySubtype::Uuid => 4,
        BinarySubtype::Md5 => 5,
        BinarySubtype::Encrypted => 6,
        BinarySubtype::Column => 7,
        BinarySubtype::Sensitive => 8,
        BinarySubtype::UserDefined(n) | BinarySubtype::Reserved(n) => n,
        _ => 0,
    }
}

impl TryFrom<Bson> for Value {
    type Error = FormatError;

    fn try_from(value: Bson) -> Result<Self, Self::Error> {
        Ok(match value {
            Bson::Null => Value::Null,
            Bson::Boolean(b) => Value::Boolean(b),
            Bson::Int32(n) => Value::Integer(n.into()),
            Bson::Int64(n) => Value::Integer(n),
            Bson::Double(f) => Value::Float(f),
            Bson::String(s) => Value::String(s),
            Bson::Binary(bin) => Value::Binary(BinaryBlob {
                subtype: binary_subtype_to_u8(bin.subtype),
                bytes: bin.bytes,
            }),
            Bson::DateTime(dt) => Value::DateTime(dt),
            Bson::ObjectId(oid) => Value::ObjectId(oid),
            Bson::RegularExpression(regex) => Value::Regex(RegexValue {
                pattern: regex.pattern,
                options: regex.options,
            }),
            Bson::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Bson::Document(doc) => Value::Document(Document::try_from(doc)?),
            other => {
                return Err(FormatError::UnsupportedType(
                    format!("{:?}", other.element_type()).to_lowercase(),
                ));
            }
        })
    }
}

impl TryFrom<bson::Document> for Document {
    type Error = FormatError;

    fn try_from(doc: bson::Document) -> Result<Self, Self::Error> {
        let mut out = Document::new();
        for (key, value) in doc {
            out.insert(key, Value::try_from(value)?);
        }
        Ok(out)
    }
}

impl From<Value> for Bson {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Bson::Null,
            Value::Boolean(b) => Bson::Boolean(b),
            Value::Integer(n) => match i32::try_from(n) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(n),
            },
            Value::Float(f) => Bson::Double(f),
            Value::String(s) => Bson::String(s),
            Value::Binary(blob) => Bson::Binary(Binary {
                subtype: BinarySubtype::from(blob.subtype),
                bytes: blob.bytes,
            }),
            Value::DateTime(dt) => Bson::DateTime(dt),
            Value::ObjectId(oid) => Bson::ObjectId(oid),
            Value::Regex(regex) => Bson::RegularExpression(bson::Regex {
                pattern: regex.pattern,
                options: regex.options,
            }),
            Value::Array(items) => Bson::Array(items.into_iter().map(Bson::from).collect()),
            Value::Document(doc) => Bson::Document(doc.into()),
        }
    }
}

impl From<Document> for bson::Document {
    fn from(doc: Document) -> Self {
        doc.into_iter()
            .map(|(key, value)| (key, Bson::from(value)))
            .collect()
    }
}

/// Decode one serialized BSON document, failing past `max_depth`.
///
/// Elements are walked lazily so the ceiling is checked before any deeper
/// level is parsed.
pub(crate) fn document_from_bson_bytes(bytes: &[u8], max_depth: usize) -> Result<Document, FormatError> {
    let raw = RawDocument::from_bytes(bytes).map_err(raw_error)?;
    raw_document(raw, 0, max_depth)
}

fn raw_document(raw: &RawDocument, depth: usize, max_depth: usize) -> Result<Document, FormatError> {
    let depth = enter(depth, max_depth)?;
    let mut doc = Document::new();
    for element in raw {
        let (key, value) = element.map_err(raw_error)?;
        doc.insert(key, raw_value(value, depth, max_depth)?);
    }
    Ok(doc)
}

fn raw_value(value: RawBsonRef<'_>, depth: usize, max_depth: usize) -> Result<Value, FormatError> {
    Ok(match value {
        RawBsonRef::Null => Value::Null,
        RawBsonRef::Boolean(b) => Value::Boolean(b),
        RawBsonRef::Int32(n) => Value::Integer(n.into()),
        RawBsonRef::Int64(n) => Value::Integer(n),
        RawBsonRef::Double(f) => Value::Float(f),
        RawBsonRef::String(s) => Value::String(s.to_string()),
        RawBsonRef::Binary(bin) => Value::Binary(BinaryBlob {
            subtype: binary_subtype_to_u8(bin.subtype),
            bytes: bin.bytes.to_vec(),
        }),
        RawBsonRef::DateTime(dt) => Value::DateTime(dt),
        RawBsonRef::ObjectId(oid) => Value::ObjectId(oid),
        RawBsonRef::RegularExpression(regex) => Value::Regex(RegexValue {
            pattern: regex.pattern.to_string(),
            options: regex.options.to_string(),
        }),
        RawBsonRef::Array(items) => {
            let depth = enter(depth, max_depth)?;
            let mut out = Vec::new();
            for item in items {
                out.push(raw_value(item.map_err(raw_error)?, depth, max_depth)?);
            }
            Value::Array(out)
        }
        RawBsonRef::Document(doc) => Value::Document(raw_document(doc, depth, max_depth)?),
        other => {
            return Err(FormatError::UnsupportedType(
                format!("{:?}", other.element_type()).to_lowercase(),
            ));
        }
    })
}

fn raw_error(error: bson::raw::Error) -> FormatError {
    FormatError::InvalidPayload(format!("bson: {error}"))
}
