//! Compact binary form of the value codec.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! scalar    := tag:u8 len:u32 payload[len]
//! array     := 0x09 count:u32 value*count
//! document  := 0x0A count:u32 (keylen:u32 key[keylen] value)*count
//! regex     := 0x08 len:u32 (plen:u32 pattern olen:u32 options)
//! binary    := 0x05 len:u32 (subtype:u8 bytes[len-1])
//! ```
//!
//! Tags are the [`TypeTag`] discriminants. Every prefix is checked against the
//! bytes actually remaining before anything is read or allocated.

use bson::DateTime;
use bson::oid::ObjectId;

use super::enter;
use super::value::{BinaryBlob, Document, RegexValue, TypeTag, Value};
use crate::error::FormatError;

type Result<T> = std::result::Result<T, FormatError>;

/// Encode a value.
pub fn encode(value: &Value, max_depth: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_value(&mut out, value, 0, max_depth)?;
    Ok(out)
}

/// Decode exactly one value occupying the whole buffer.
pub fn decode(bytes: &[u8], max_depth: usize) -> Result<Value> {
    let mut reader = Reader::new(bytes);
    let value = reader.value(0, max_depth)?;
    if reader.remaining() != 0 {
        return Err(FormatError::InvalidPayload(format!(
            "{} trailing bytes after value",
            reader.remaining()
        )));
    }
    Ok(value)
}

fn write_value(out: &mut Vec<u8>, value: &Value, depth: usize, max_depth: usize) -> Result<()> {
    out.push(value.tag().code());
    match value {
        Value::Null => write_len(out, 0)?,
        Value::Boolean(b) => write_payload(out, &[u8::from(*b)])?,
        Value::Integer(n) => write_payload(out, &n.to_le_bytes())?,
        Value::Float(f) => write_payload(out, &f.to_bits().to_le_bytes())?,
        Value::String(s) => write_payload(out, s.as_bytes())?,
        Value::Binary(blob) => {
            write_len(out, blob.bytes.len() + 1)?;
            out.push(blob.subtype);
            out.extend_from_slice(&blob.bytes);
        }
        Value::DateTime(dt) => write_payload(out, &dt.timestamp_millis().to_le_bytes())?,
        Value::ObjectId(oid) => write_payload(out, &oid.bytes())?,
        Value::Regex(regex) => {
            let mut inner = Vec::with_capacity(regex.pattern.len() + regex.options.len() + 8);
            write_payload(&mut inner, regex.pattern.as_bytes())?;
            write_payload(&mut inner, regex.options.as_bytes())?;
            write_payload(out, &inner)?;
        }
        Value::Array(items) => {
            let depth = enter(depth, max_depth)?;
            write_len(out, items.len())?;
            for item in items {
                write_value(out, item, depth, max_depth)?;
            }
        }
        Value::Document(doc) => write_document(out, doc, depth, max_depth)?,
    }
    Ok(())
}

fn write_document(out: &mut Vec<u8>, doc: &Document, depth: usize, max_depth: usize) -> Result<()> {
    let depth = enter(depth, max_depth)?;
    write_len(out, doc.len())?;
    for (key, value) in doc.iter() {
        write_payload(out, key.as_bytes())?;
        write_value(out, value, depth, max_depth)?;
    }
    Ok(())
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| FormatError::InvalidPayload(format!("length {len} exceeds u32")))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_payload(out: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
    write_len(out, payload.len())?;
    out.extend_from_slice(payload);
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(FormatError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_len(&mut self) -> Result<usize> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| truncated(4, 0))?;
        Ok(u32::from_le_bytes(bytes) as usize)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| FormatError::InvalidPayload(format!("invalid UTF-8: {e}")))
    }

    fn value(&mut self, depth: usize, max_depth: usize) -> Result<Value> {
        let code = self.take(1)?[0];
        let tag = TypeTag::from_code(code)
            .ok_or_else(|| FormatError::UnknownTag(format!("0x{code:02x}")))?;

        match tag {
            TypeTag::Array => {
                let depth = enter(depth, max_depth)?;
                let count = self.read_len()?;
                // Each element needs at least five bytes; never trust the count for allocation.
                let mut items = Vec::with_capacity(count.min(self.remaining() / 5));
                for _ in 0..count {
                    items.push(self.value(depth, max_depth)?);
                }
                Ok(Value::Array(items))
            }
            TypeTag::Document => {
                let depth = enter(depth, max_depth)?;
                let count = self.read_len()?;
                let mut doc = Document::new();
                for _ in 0..count {
                    let key = self.string()?;
                    let value = self.value(depth, max_depth)?;
                    if doc.insert(key.clone(), value).is_some() {
                        return Err(FormatError::InvalidPayload(format!(
                            "duplicate field '{key}'"
                        )));
                    }
                }
                Ok(Value::Document(doc))
            }
            scalar => {
                let len = self.read_len()?;
                let payload = self.take(len)?;
                decode_scalar(scalar, payload)
            }
        }
    }
}

fn decode_scalar(tag: TypeTag, payload: &[u8]) -> Result<Value> {
    Ok(match tag {
        TypeTag::Null => {
            fixed::<0>(tag, payload)?;
            Value::Null
        }
        TypeTag::Boolean => match fixed::<1>(tag, payload)? {
            [0] => Value::Boolean(false),
            [1] => Value::Boolean(true),
            [other] => {
                return Err(FormatError::InvalidPayload(format!(
                    "boolean byte 0x{other:02x}"
                )));
            }
        },
        TypeTag::Integer => Value::Integer(i64::from_le_bytes(fixed::<8>(tag, payload)?)),
        TypeTag::Float => Value::Float(f64::from_bits(u64::from_le_bytes(fixed::<8>(
            tag, payload,
        )?))),
        TypeTag::String => Value::String(
            String::from_utf8(payload.to_vec())
                .map_err(|e| FormatError::InvalidPayload(format!("invalid UTF-8: {e}")))?,
        ),
        TypeTag::Binary => match payload.split_first() {
            Some((subtype, bytes)) => Value::Binary(BinaryBlob {
                subtype: *subtype,
                bytes: bytes.to_vec(),
            }),
            None => return Err(FormatError::InvalidPayload("binary without subtype".into())),
        },
        TypeTag::DateTime => Value::DateTime(DateTime::from_millis(i64::from_le_bytes(
            fixed::<8>(tag, payload)?,
        ))),
        TypeTag::ObjectId => Value::ObjectId(ObjectId::from_bytes(fixed::<12>(tag, payload)?)),
        TypeTag::Regex => {
            let mut inner = Reader::new(payload);
            let pattern = inner.string()?;
            let options = inner.string()?;
            if inner.remaining() != 0 {
                return Err(FormatError::InvalidPayload("regex payload too long".into()));
            }
            Value::Regex(RegexValue { pattern, options })
        }
        TypeTag::Array | TypeTag::Document => {
            return Err(FormatError::InvalidPayload(format!(
                "{tag} cannot be decoded as a scalar"
            )));
        }
    })
}

fn fixed<const N: usize>(tag: TypeTag, payload: &[u8]) -> Result<[u8; N]> {
    payload.try_into().map_err(|_| {
        FormatError::InvalidPayload(format!(
            "{tag} payload must be {N} bytes, found {}",
            payload.len()
        ))
    })
}

fn truncated(needed: usize, remaining: usize) -> FormatError {
    FormatError::Truncated { needed, remaining }
}
