//! Classification of MongoDB driver errors
//!
//! Driver errors are either run-fatal (the server is unreachable or refuses
//! the credentials) or concern a single document. The latter are reduced to
//! an [`ErrorInfo`] whose [`reason`](ErrorInfo::reason) ends up in run
//! reports next to the document's `_id`.

use std::fmt;

use mongodb::error::{Error, ErrorKind, WriteFailure};
use serde::Serialize;

/// Structured information extracted from a driver error.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    /// Driver error family, e.g. `write` or `command`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(rename = "name", skip_serializing_if = "Option::is_none")]
    pub code_name: Option<&'static str>,
    pub message: String,
}

impl ErrorInfo {
    fn server(kind: &'static str, code: i32, message: &str) -> Self {
        let message = if is_duplicate_key(code) {
            "duplicate key".to_string()
        } else {
            message.to_string()
        };
        Self {
            kind: Some(kind),
            code: Some(code),
            code_name: code_name(code),
            message,
        }
    }

    /// One-line description, e.g. `DuplicateKey (11000): duplicate key`.
    pub fn reason(&self) -> String {
        match (self.code_name, self.code) {
            (Some(name), Some(code)) => format!("{name} ({code}): {}", self.message),
            (None, Some(code)) => format!("code {code}: {}", self.message),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "MongoDB {kind} error: {}", self.reason()),
            None => write!(f, "MongoDB error: {}", self.reason()),
        }
    }
}

/// `Display` of `PorterError::MongoDb`.
pub(crate) fn format_mongodb_error(f: &mut fmt::Formatter<'_>, error: &Error) -> fmt::Result {
    write!(f, "{}", extract_error_info(error))
}

/// Whether a driver error means the server cannot be used at all.
///
/// Such errors abort a whole export or import run; everything else
/// concerns a single document.
pub fn is_transport_failure(error: &Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Authentication { .. }
            | ErrorKind::InvalidTlsConfig { .. }
    )
}

/// Extract code, name and message from a driver error.
pub fn extract_error_info(error: &Error) -> ErrorInfo {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => ErrorInfo::server("write", e.code, &e.message),
        ErrorKind::Write(WriteFailure::WriteConcernError(e)) => {
            ErrorInfo::server("write concern", e.code, &e.message)
        }
        ErrorKind::Command(e) => ErrorInfo::server("command", e.code, &e.message),
        ErrorKind::InsertMany(e) => {
            let first = e
                .write_errors
                .as_ref()
                .and_then(|errors| errors.first())
                .map(|w| (w.code, w.message.as_str()))
                .or_else(|| {
                    e.write_concern_error
                        .as_ref()
                        .map(|w| (w.code, w.message.as_str()))
                });
            match first {
                Some((code, message)) => ErrorInfo::server("bulk write", code, message),
                None => plain(Some("bulk write"), error.to_string()),
            }
        }
        ErrorKind::Authentication { message, .. } => plain(Some("authentication"), message.clone()),
        ErrorKind::ServerSelection { message, .. } => {
            plain(Some("server selection"), message.clone())
        }
        ErrorKind::InvalidArgument { message, .. } => {
            plain(Some("invalid argument"), message.clone())
        }
        _ => plain(None, error.to_string()),
    }
}

fn plain(kind: Option<&'static str>, message: String) -> ErrorInfo {
    ErrorInfo {
        kind,
        message,
        ..Default::default()
    }
}

fn is_duplicate_key(code: i32) -> bool {
    matches!(code, 11000 | 11001)
}

/// Server error codes that show up when writing imported documents.
fn code_name(code: i32) -> Option<&'static str> {
    Some(match code {
        2 => "BadValue",
        10 => "CannotIndexParallelArrays",
        11000 | 11001 => "DuplicateKey",
        13 => "Unauthorized",
        17280 => "KeyTooLong",
        18 => "AuthenticationFailed",
        26 => "NamespaceNotFound",
        50 => "MaxTimeMSExpired",
        66 => "ImmutableField",
        121 => "DocumentValidationFailure",
        10334 => "BSONObjectTooLarge",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_names() {
        assert_eq!(code_name(11000), Some("DuplicateKey"));
        assert_eq!(code_name(121), Some("DocumentValidationFailure"));
        assert_eq!(code_name(9999), None);
    }

    #[test]
    fn test_server_info_reason() {
        let info = ErrorInfo::server("write", 11000, "E11000 duplicate key error collection: shop.users");
        assert_eq!(info.reason(), "DuplicateKey (11000): duplicate key");
        assert_eq!(info.to_string(), "MongoDB write error: DuplicateKey (11000): duplicate key");

        let unknown = ErrorInfo::server("command", 4242, "odd");
        assert_eq!(unknown.reason(), "code 4242: odd");

        let bare = plain(None, "boom".to_string());
        assert_eq!(bare.reason(), "boom");
        assert_eq!(
            serde_json::to_value(&bare).unwrap(),
            serde_json::json!({ "message": "boom" })
        );
    }

    #[test]
    fn test_io_errors_are_transport_failures() {
        let error = Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert!(is_transport_failure(&error));
        assert_eq!(extract_error_info(&error).kind, None);
    }
}
