//! On-disk layout of per-collection export files.
//!
//! - Text files hold one encoded document per line (JSON Lines). The
//!   array-of-objects layout written by older exports is accepted on read.
//! - Binary files start with [`BINARY_MAGIC`] followed by records of
//!   `len:u32 LE` + one binary-encoded document, so a corrupt record can be
//!   skipped without losing the rest of the file.
//! - BSON dump files (`.bson`, as written by `mongodump`) are concatenated
//!   BSON documents and are accepted on read.
//!
//! The layout is detected from the first bytes of the file, never from its
//! extension.

use super::Form;
use crate::error::FormatError;

/// Largest document the server accepts.
pub const MAX_BSON_SIZE: usize = 16 * 1024 * 1024;

/// Leading bytes of every binary export file.
pub const BINARY_MAGIC: &[u8; 8] = b"MPORTBIN";

/// Number of leading bytes [`probe`] needs to decide.
pub const PROBE_LEN: usize = 64;

/// Physical layout of a per-collection file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLayout {
    JsonLines,
    JsonArray,
    Binary,
    Bson,
}

/// Detect the layout from the first bytes of a file.
///
/// An empty (or whitespace-only) prefix is an empty JSON Lines file.
pub fn probe(prefix: &[u8], file: &str) -> Result<FileLayout, FormatError> {
    if prefix.starts_with(BINARY_MAGIC) {
        return Ok(FileLayout::Binary);
    }
    if starts_with_bson_document(prefix) {
        return Ok(FileLayout::Bson);
    }

    let text = prefix.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(prefix);
    match text.iter().find(|b| !b.is_ascii_whitespace()) {
        None => Ok(FileLayout::JsonLines),
        Some(b'{') => Ok(FileLayout::JsonLines),
        Some(b'[') => Ok(FileLayout::JsonArray),
        Some(_) => Err(FormatError::UnrecognizedFile(file.to_string())),
    }
}

/// Whether `prefix` opens with a plausible BSON document: an int32 length
/// within server limits, a known element type (or the terminator of an
/// empty document), and a terminal zero byte when the document fits.
///
/// Text never matches: any printable or whitespace fourth byte puts the
/// length far beyond [`MAX_BSON_SIZE`].
fn starts_with_bson_document(prefix: &[u8]) -> bool {
    let Some(len) = prefix.first_chunk::<4>().map(|b| i32::from_le_bytes(*b)) else {
        return false;
    };
    let Ok(len) = usize::try_from(len) else {
        return false;
    };
    if !(5..=MAX_BSON_SIZE).contains(&len) || prefix.len() < 5 {
        return false;
    }
    let first_type = prefix[4];
    let known_type = matches!(first_type, 0x01..=0x13 | 0x7f | 0xff) || (len == 5 && first_type == 0);
    let terminated = prefix.get(len - 1).is_none_or(|&b| b == 0);
    known_type && terminated
}

const ESCAPED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '%'];

/// File name for a collection's export file.
///
/// Characters that are unsafe in file names (and a leading dot) are written
/// as `%XX` so the name maps back with [`collection_name_from_stem`].
pub fn collection_file_name(collection: &str, form: Form) -> String {
    let mut stem = String::with_capacity(collection.len());
    for (i, c) in collection.chars().enumerate() {
        if ESCAPED.contains(&c) || c.is_control() || (i == 0 && c == '.') {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                stem.push('%');
                stem.push_str(&hex::encode_upper([byte]));
            }
        } else {
            stem.push(c);
        }
    }
    format!("{stem}.{}", form.extension())
}

/// Recover the collection name from an export file stem.
///
/// Malformed escapes are kept literally.
pub fn collection_name_from_stem(stem: &str) -> String {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(decoded) = hex::decode(&bytes[i + 1..i + 3]) {
                out.extend_from_slice(&decoded);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts_are_detected_from_content() {
        assert_eq!(probe(b"MPORTBIN\x01\x00", "a").unwrap(), FileLayout::Binary);
        assert_eq!(probe(b"  {\"a\":1}\n", "a").unwrap(), FileLayout::JsonLines);
        assert_eq!(probe(b"\n[\n  {}\n]", "a").unwrap(), FileLayout::JsonArray);
        assert_eq!(probe(b"", "a").unwrap(), FileLayout::JsonLines);
        assert!(matches!(
            probe(b"PK\x03\x04", "users.json"),
            Err(FormatError::UnrecognizedFile(_))
        ));
    }

    #[test]
    fn test_renamed_binary_file_is_still_binary() {
        let mut content = BINARY_MAGIC.to_vec();
        content.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(probe(&content, "users.json").unwrap(), FileLayout::Binary);
    }

    #[test]
    fn test_concatenated_bson_is_detected() {
        let mut dump = bson::to_vec(&bson::doc! { "_id": 1, "name": "Ada" }).unwrap();
        dump.extend(bson::to_vec(&bson::doc! { "_id": 2 }).unwrap());
        assert_eq!(probe(&dump[..PROBE_LEN.min(dump.len())], "users.bson").unwrap(), FileLayout::Bson);
        assert_eq!(probe(&[5, 0, 0, 0, 0], "empty.bson").unwrap(), FileLayout::Bson);

        // Length fits but the document is not terminated.
        assert!(probe(&[6, 0, 0, 0, 0x08, 1], "x.bson").is_err());
        // Unknown first element type.
        assert!(probe(&[9, 0, 0, 0, 0x42, 0, 0, 0, 0], "x.bson").is_err());
        // Short text files are never BSON.
        assert_eq!(probe(b"{}\n", "a").unwrap(), FileLayout::JsonLines);
        assert_eq!(probe(b"{\"_id\":1}", "a").unwrap(), FileLayout::JsonLines);
    }

    #[test]
    fn test_collection_file_names() {
        assert_eq!(collection_file_name("users", Form::Text), "users.json");
        assert_eq!(collection_file_name("users", Form::Binary), "users.bin");
        assert_eq!(
            collection_file_name("logs/2024:q1", Form::Text),
            "logs%2F2024%3Aq1.json"
        );
        assert_eq!(collection_file_name(".hidden", Form::Text), "%2Ehidden.json");
    }

    #[test]
    fn test_collection_names_round_trip() {
        for name in ["users", "logs/2024:q1", ".hidden", "50%off", "a|b", "system.views"] {
            let file = collection_file_name(name, Form::Text);
            let stem = file.strip_suffix(".json").unwrap();
            assert_eq!(collection_name_from_stem(stem), name);
        }
        assert_eq!(collection_name_from_stem("bad%zz"), "bad%zz");
    }
}
