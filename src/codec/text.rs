//! Structured-text form of the value codec.
//!
//! Values map onto JSON. Scalars and containers map directly; date-times,
//! object identifiers, binary blobs, regular expressions and non-finite floats
//! are wrapped in a one-key object whose key names the type, using the same
//! tag names as MongoDB Extended JSON:
//!
//! ```json
//! { "_id": { "$oid": "65705d84dfc3f3b5094e1f72" },
//!   "at":  { "$date": "2023-12-06T11:39:48.373Z" },
//!   "raw": { "$binary": { "base64": "AQID", "subType": "00" } } }
//! ```
//!
//! A NaN other than the canonical quiet NaN is written as
//! `{"$numberDouble": "NaN:<big-endian hex bits>"}`.
//!
//! An embedded document whose first key starts with `$` is wrapped in
//! `{"$document": {...}}` so it can never be read back as a tag.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bson::DateTime;
use bson::oid::ObjectId;
use chrono::{Datelike, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value as JsonValue};

use super::enter;
use super::value::{BinaryBlob, Document, RegexValue, Value};
use crate::error::FormatError;

const OID: &str = "$oid";
const DATE: &str = "$date";
const BINARY: &str = "$binary";
const REGULAR_EXPRESSION: &str = "$regularExpression";
const NUMBER_DOUBLE: &str = "$numberDouble";
const NUMBER_LONG: &str = "$numberLong";
const NUMBER_INT: &str = "$numberInt";
const DOCUMENT: &str = "$document";
const LEGACY_REGEX: &str = "$regex";
const LEGACY_OPTIONS: &str = "$options";
const LEGACY_TYPE: &str = "$type";
const NAN_BITS_PREFIX: &str = "NaN:";

type Result<T> = std::result::Result<T, FormatError>;

/// Encode a value into its JSON representation.
pub fn encode_value(value: &Value, depth: usize, max_depth: usize) -> Result<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Integer(n) => JsonValue::Number((*n).into()),
        Value::Float(f) => match Number::from_f64(*f) {
            Some(n) => JsonValue::Number(n),
            None => tagged(NUMBER_DOUBLE, JsonValue::String(non_finite_name(*f))),
        },
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Binary(blob) => tagged(
            BINARY,
            serde_json::json!({
                "base64": STANDARD.encode(&blob.bytes),
                "subType": hex::encode([blob.subtype]),
            }),
        ),
        Value::DateTime(dt) => tagged(DATE, encode_date(*dt)),
        Value::ObjectId(oid) => tagged(OID, JsonValue::String(oid.to_hex())),
        Value::Regex(regex) => tagged(
            REGULAR_EXPRESSION,
            serde_json::json!({ "pattern": regex.pattern, "options": regex.options }),
        ),
        Value::Array(items) => {
            let depth = enter(depth, max_depth)?;
            JsonValue::Array(
                items
                    .iter()
                    .map(|item| encode_value(item, depth, max_depth))
                    .collect::<Result<_>>()?,
            )
        }
        Value::Document(doc) => encode_document(doc, depth, max_depth)?,
    })
}

/// Encode a document, wrapping it when its first key could pass for a tag.
pub fn encode_document(doc: &Document, depth: usize, max_depth: usize) -> Result<JsonValue> {
    let depth = enter(depth, max_depth)?;
    let mut map = Map::with_capacity(doc.len());
    for (key, value) in doc.iter() {
        map.insert(key.to_string(), encode_value(value, depth, max_depth)?);
    }

    let object = JsonValue::Object(map);
    if doc.first_key().is_some_and(|k| k.starts_with('$')) {
        Ok(tagged(DOCUMENT, object))
    } else {
        Ok(object)
    }
}

/// Decode a JSON value produced by [`encode_value`] (or by other Extended
/// JSON writers using the same tags).
pub fn decode_value(json: &JsonValue, depth: usize, max_depth: usize) -> Result<Value> {
    match json {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
        JsonValue::Number(n) => decode_number(n),
        JsonValue::String(s) => Ok(Value::String(s.clone())),
        JsonValue::Array(items) => {
            let depth = enter(depth, max_depth)?;
            items
                .iter()
                .map(|item| decode_value(item, depth, max_depth))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        JsonValue::Object(map) => match map.keys().next() {
            Some(first) if first.starts_with('$') => decode_tagged(first, map, depth, max_depth),
            _ => decode_fields(map, depth, max_depth).map(Value::Document),
        },
    }
}

/// Decode a top-level document.
pub fn decode_document(json: &JsonValue, max_depth: usize) -> Result<Document> {
    match decode_value(json, 0, max_depth)? {
        Value::Document(doc) => Ok(doc),
        other => Err(FormatError::InvalidPayload(format!(
            "expected a document, found {}",
            other.tag()
        ))),
    }
}

fn decode_fields(map: &Map<String, JsonValue>, depth: usize, max_depth: usize) -> Result<Document> {
    let depth = enter(depth, max_depth)?;
    let mut doc = Document::new();
    for (key, value) in map {
        doc.insert(key.clone(), decode_value(value, depth, max_depth)?);
    }
    Ok(doc)
}

fn decode_number(n: &Number) -> Result<Value> {
    if let Some(i) = n.as_i64() {
        Ok(Value::Integer(i))
    } else if n.is_u64() {
        Err(FormatError::InvalidPayload(format!(
            "integer {n} does not fit in 64 bits"
        )))
    } else {
        n.as_f64()
            .map(Value::Float)
            .ok_or_else(|| FormatError::InvalidPayload(format!("unreadable number {n}")))
    }
}

fn decode_tagged(
    tag: &str,
    map: &Map<String, JsonValue>,
    depth: usize,
    max_depth: usize,
) -> Result<Value> {
    let body = &map[tag];
    match tag {
        OID => {
            single_key(map, tag)?;
            let hex = expect_str(body, tag)?;
            ObjectId::parse_str(hex)
                .map(Value::ObjectId)
                .map_err(|e| invalid(tag, e))
        }
        DATE => {
            single_key(map, tag)?;
            decode_date(body).map(Value::DateTime)
        }
        BINARY => decode_binary(map, body),
        REGULAR_EXPRESSION => {
            single_key(map, tag)?;
            Ok(Value::Regex(RegexValue {
                pattern: expect_str(field(body, "pattern", tag)?, tag)?.to_string(),
                options: expect_str(field(body, "options", tag)?, tag)?.to_string(),
            }))
        }
        LEGACY_REGEX => {
            let options = match map.get(LEGACY_OPTIONS) {
                Some(o) => expect_str(o, LEGACY_OPTIONS)?.to_string(),
                None => String::new(),
            };
            Ok(Value::Regex(RegexValue {
                pattern: expect_str(body, tag)?.to_string(),
                options,
            }))
        }
        NUMBER_DOUBLE => {
            single_key(map, tag)?;
            let text = expect_str(body, tag)?;
            let f = match text {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => match other.strip_prefix(NAN_BITS_PREFIX) {
                    Some(bits) => decode_nan_bits(bits)?,
                    None => other.parse::<f64>().map_err(|e| invalid(tag, e))?,
                },
            };
            Ok(Value::Float(f))
        }
        NUMBER_LONG | NUMBER_INT => {
            single_key(map, tag)?;
            expect_str(body, tag)?
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| invalid(tag, e))
        }
        DOCUMENT => {
            single_key(map, tag)?;
            match body {
                JsonValue::Object(inner) => {
                    decode_fields(inner, depth, max_depth).map(Value::Document)
                }
                _ => Err(invalid(tag, "expected an object")),
            }
        }
        other => Err(FormatError::UnknownTag(other.to_string())),
    }
}

fn decode_binary(map: &Map<String, JsonValue>, body: &JsonValue) -> Result<Value> {
    let (encoded, subtype) = match body {
        JsonValue::Object(_) => {
            single_key(map, BINARY)?;
            (
                expect_str(field(body, "base64", BINARY)?, BINARY)?,
                expect_str(field(body, "subType", BINARY)?, BINARY)?,
            )
        }
        // Legacy shape: {"$binary": "<base64>", "$type": "<hex>"}
        JsonValue::String(encoded) => {
            let subtype = map
                .get(LEGACY_TYPE)
                .map(|t| expect_str(t, LEGACY_TYPE))
                .transpose()?
                .unwrap_or("00");
            (encoded.as_str(), subtype)
        }
        _ => return Err(invalid(BINARY, "expected an object or a string")),
    };

    let bytes = STANDARD.decode(encoded).map_err(|e| invalid(BINARY, e))?;
    let subtype = u8::from_str_radix(subtype, 16).map_err(|e| invalid(BINARY, e))?;
    Ok(Value::Binary(BinaryBlob { subtype, bytes }))
}

/// Relaxed form (RFC 3339 with milliseconds) for years 1970..=9999,
/// canonical `$numberLong` millis otherwise.
fn encode_date(dt: DateTime) -> JsonValue {
    let millis = dt.timestamp_millis();
    match Utc.timestamp_millis_opt(millis).single() {
        Some(utc) if (1970..=9999).contains(&utc.year()) => {
            JsonValue::String(utc.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        _ => tagged(NUMBER_LONG, JsonValue::String(millis.to_string())),
    }
}

fn decode_date(body: &JsonValue) -> Result<DateTime> {
    let millis = match body {
        JsonValue::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|e| invalid(DATE, e))?
            .timestamp_millis(),
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid(DATE, "milliseconds must be an integer"))?,
        JsonValue::Object(inner) => {
            let text = inner
                .get(NUMBER_LONG)
                .ok_or_else(|| invalid(DATE, "expected $numberLong"))?;
            expect_str(text, NUMBER_LONG)?
                .parse::<i64>()
                .map_err(|e| invalid(DATE, e))?
        }
        _ => return Err(invalid(DATE, "unexpected value")),
    };
    Ok(DateTime::from_millis(millis))
}

fn tagged(tag: &str, body: JsonValue) -> JsonValue {
    let mut map = Map::with_capacity(1);
    map.insert(tag.to_string(), body);
    JsonValue::Object(map)
}

/// `NaN` for the canonical quiet NaN, `NaN:<bits>` for any other sign or
/// payload so the exact bit pattern survives.
fn non_finite_name(f: f64) -> String {
    if f.is_nan() {
        if f.to_bits() == f64::NAN.to_bits() {
            "NaN".to_string()
        } else {
            format!("{NAN_BITS_PREFIX}{}", hex::encode(f.to_bits().to_be_bytes()))
        }
    } else if f.is_sign_positive() {
        "Infinity".to_string()
    } else {
        "-Infinity".to_string()
    }
}

fn decode_nan_bits(text: &str) -> Result<f64> {
    let mut bits = [0u8; 8];
    hex::decode_to_slice(text, &mut bits).map_err(|e| invalid(NUMBER_DOUBLE, e))?;
    let f = f64::from_bits(u64::from_be_bytes(bits));
    if f.is_nan() {
        Ok(f)
    } else {
        Err(invalid(NUMBER_DOUBLE, format!("{text} is not a NaN bit pattern")))
    }
}

fn single_key(map: &Map<String, JsonValue>, tag: &str) -> Result<()> {
    if map.len() == 1 {
        Ok(())
    } else {
        Err(invalid(tag, "tag object must have exactly one key"))
    }
}

fn field<'a>(body: &'a JsonValue, name: &str, tag: &str) -> Result<&'a JsonValue> {
    body.get(name)
        .ok_or_else(|| invalid(tag, format!("missing '{name}'")))
}

fn expect_str<'a>(value: &'a JsonValue, tag: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| invalid(tag, "expected a string"))
}

fn invalid(tag: &str, detail: impl std::fmt::Display) -> FormatError {
    FormatError::InvalidPayload(format!("{tag}: {detail}"))
}
