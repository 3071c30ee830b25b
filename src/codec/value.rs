//! Tagged value model for documents moving through the engine.
//!
//! Every field value carries an explicit [`TypeTag`]; both serialized forms
//! dispatch on it so that identifiers, dates, blobs and patterns come back
//! with the same type they left with.

use std::fmt;

use bson::DateTime;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeTag {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    Binary,
    DateTime,
    ObjectId,
    Regex,
    Array,
    Document,
}

impl TypeTag {
    /// Every tag, in discriminant order.
    pub const ALL: [TypeTag; 11] = [
        TypeTag::Null,
        TypeTag::Boolean,
        TypeTag::Integer,
        TypeTag::Float,
        TypeTag::String,
        TypeTag::Binary,
        TypeTag::DateTime,
        TypeTag::ObjectId,
        TypeTag::Regex,
        TypeTag::Array,
        TypeTag::Document,
    ];

    /// Name used in schema output.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Boolean => "boolean",
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::String => "string",
            TypeTag::Binary => "binary",
            TypeTag::DateTime => "dateTime",
            TypeTag::ObjectId => "objectId",
            TypeTag::Regex => "regex",
            TypeTag::Array => "array",
            TypeTag::Document => "document",
        }
    }

    /// Discriminant byte used by the binary form.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Inverse of [`TypeTag::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binary blob with its subtype byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBlob {
    pub subtype: u8,
    pub bytes: Vec<u8>,
}

/// Regular expression pattern and its option flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexValue {
    pub pattern: String,
    pub options: String,
}

/// A field value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Binary(BinaryBlob),
    DateTime(DateTime),
    ObjectId(ObjectId),
    Regex(RegexValue),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Null,
            Value::Boolean(_) => TypeTag::Boolean,
            Value::Integer(_) => TypeTag::Integer,
            Value::Float(_) => TypeTag::Float,
            Value::String(_) => TypeTag::String,
            Value::Binary(_) => TypeTag::Binary,
            Value::DateTime(_) => TypeTag::DateTime,
            Value::ObjectId(_) => TypeTag::ObjectId,
            Value::Regex(_) => TypeTag::Regex,
            Value::Array(_) => TypeTag::Array,
            Value::Document(_) => TypeTag::Document,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

// Floats compare by bit pattern so that NaN payloads and signed zeros survive
// the round-trip checks unchanged.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::ObjectId(a), Value::ObjectId(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ObjectId> for Value {
    fn from(oid: ObjectId) -> Self {
        Value::ObjectId(oid)
    }
}

impl From<DateTime> for Value {
    fn from(dt: DateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

/// Ordered mapping from field name to [`Value`] with unique keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing an existing value in place.
    ///
    /// Returns the previous value when the key was already present; the field
    /// keeps its original position in that case.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The `_id` field, if present.
    pub fn id(&self) -> Option<&Value> {
        self.get("_id")
    }

    pub fn first_key(&self) -> Option<&str> {
        self.fields.first().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_in_place() {
        let mut doc = Document::new();
        doc.insert("a", 1);
        doc.insert("b", "two");
        let previous = doc.insert("a", 3.5);

        assert_eq!(previous, Some(Value::Integer(1)));
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(doc.get("a"), Some(&Value::Float(3.5)));
    }

    #[test]
    fn test_tag_codes_are_stable() {
        for (i, tag) in TypeTag::ALL.iter().enumerate() {
            assert_eq!(tag.code() as usize, i);
            assert_eq!(TypeTag::from_code(tag.code()), Some(*tag));
        }
        assert_eq!(TypeTag::from_code(11), None);
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Integer(1), Value::Float(1.0));
    }
}
