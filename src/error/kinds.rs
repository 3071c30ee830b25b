use std::path::PathBuf;
use std::{fmt, io};

use crate::error::mongo::{format_mongodb_error, is_transport_failure};

/// Crate-wide `Result` type using [`PorterError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, PorterError>;

/// Top-level error type for mongoport operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum PorterError {
    /// Malformed or unsupported encoded value or file.
    Format(FormatError),

    /// Archive entry tried to escape the destination tree.
    Security(SecurityError),

    /// Missing file, directory or container.
    SourceNotFound(PathBuf),

    /// Connection-related errors.
    Connection(ConnectionError),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// The server refused to write one document.
    WriteRejected(String),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// Run orchestration errors.
    Execution(ExecutionError),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Encoding and decoding failures of the value codec and file readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Type tag not known to the decoder.
    UnknownTag(String),

    /// A length or count prefix points past the end of the buffer.
    Truncated { needed: usize, remaining: usize },

    /// Nesting deeper than the configured ceiling.
    DepthExceeded(usize),

    /// Payload present but not valid for its tag.
    InvalidPayload(String),

    /// Input is not well-formed JSON.
    InvalidJson(String),

    /// Driver value type that has no counterpart in the value model.
    UnsupportedType(String),

    /// File content matches neither the text nor the binary layout.
    UnrecognizedFile(String),
}

/// Archive integrity violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Entry path resolves outside the destination tree.
    PathTraversal { entry: String },
}

/// Connection-specific errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection.
    ConnectionFailed(String),

    /// Connection timeout.
    Timeout,

    /// Invalid connection URI.
    InvalidUri(String),

    /// Not currently connected to MongoDB.
    NotConnected,

    /// Ping command failed.
    PingFailed(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/// Run orchestration errors.
#[derive(Debug)]
pub enum ExecutionError {
    /// The database has no collections to export.
    NothingToExport(String),

    /// Invalid operation parameters.
    InvalidParameters(String),

    /// The worker task running the operation panicked or was aborted.
    WorkerFailed(String),
}

impl PorterError {
    /// Whether this error aborts the whole run.
    ///
    /// Connectivity, missing sources and archive traversal attempts are fatal.
    /// Driver write/command failures and format errors only concern the
    /// document being processed and are recovered into outcome counters.
    pub fn is_fatal(&self) -> bool {
        match self {
            PorterError::Format(_) | PorterError::WriteRejected(_) => false,
            PorterError::MongoDb(e) => is_transport_failure(e),
            PorterError::Security(_)
            | PorterError::SourceNotFound(_)
            | PorterError::Connection(_)
            | PorterError::Config(_)
            | PorterError::Io(_)
            | PorterError::Execution(_)
            | PorterError::Generic(_) => true,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for PorterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PorterError::Format(e) => write!(f, "Format error: {e}"),
            PorterError::Security(e) => write!(f, "Security error: {e}"),
            PorterError::SourceNotFound(path) => {
                write!(f, "Source not found: {}", path.display())
            }
            PorterError::Connection(e) => write!(f, "Connection error: {e}"),
            PorterError::MongoDb(e) => format_mongodb_error(f, e),
            PorterError::WriteRejected(msg) => write!(f, "Write rejected: {msg}"),
            PorterError::Config(e) => write!(f, "Configuration error: {e}"),
            PorterError::Io(e) => write!(f, "I/O error: {e}"),
            PorterError::Execution(e) => write!(f, "Execution error: {e}"),
            PorterError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::UnknownTag(tag) => write!(f, "unrecognized type tag {tag}"),
            FormatError::Truncated { needed, remaining } => write!(
                f,
                "length prefix of {needed} bytes exceeds the {remaining} remaining"
            ),
            FormatError::DepthExceeded(limit) => {
                write!(f, "nesting depth exceeds the limit of {limit}")
            }
            FormatError::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            FormatError::InvalidJson(msg) => write!(f, "invalid JSON: {msg}"),
            FormatError::UnsupportedType(ty) => write!(f, "unsupported value type {ty}"),
            FormatError::UnrecognizedFile(path) => {
                write!(f, "{path} is neither a text nor a binary export file")
            }
        }
    }
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityError::PathTraversal { entry } => {
                write!(f, "archive entry '{entry}' escapes the destination directory")
            }
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::Timeout => write!(f, "Connection timeout"),
            ConnectionError::InvalidUri(uri) => write!(f, "Invalid connection URI: {uri}"),
            ConnectionError::NotConnected => write!(f, "Not connected to MongoDB"),
            ConnectionError::PingFailed(msg) => write!(f, "Ping failed: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::NothingToExport(db) => {
                write!(f, "No collections found in database '{db}'")
            }
            ExecutionError::InvalidParameters(msg) => write!(f, "Invalid parameters: {msg}"),
            ExecutionError::WorkerFailed(msg) => write!(f, "Worker task failed: {msg}"),
        }
    }
}

impl std::error::Error for PorterError {}
impl std::error::Error for FormatError {}
impl std::error::Error for SecurityError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ExecutionError {}

/* ========================= Conversions to PorterError ========================= */

impl From<io::Error> for PorterError {
    fn from(err: io::Error) -> Self {
        PorterError::Io(err)
    }
}

impl From<mongodb::error::Error> for PorterError {
    fn from(err: mongodb::error::Error) -> Self {
        PorterError::MongoDb(err)
    }
}

impl From<FormatError> for PorterError {
    fn from(err: FormatError) -> Self {
        PorterError::Format(err)
    }
}

impl From<SecurityError> for PorterError {
    fn from(err: SecurityError) -> Self {
        PorterError::Security(err)
    }
}

impl From<ConnectionError> for PorterError {
    fn from(err: ConnectionError) -> Self {
        PorterError::Connection(err)
    }
}

impl From<ConfigError> for PorterError {
    fn from(err: ConfigError) -> Self {
        PorterError::Config(err)
    }
}

impl From<ExecutionError> for PorterError {
    fn from(err: ExecutionError) -> Self {
        PorterError::Execution(err)
    }
}

impl From<zip::result::ZipError> for PorterError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => PorterError::Io(e),
            other => PorterError::Format(FormatError::InvalidPayload(format!(
                "archive: {other}"
            ))),
        }
    }
}

impl From<String> for PorterError {
    fn from(msg: String) -> Self {
        PorterError::Generic(msg)
    }
}

impl From<&str> for PorterError {
    fn from(msg: &str) -> Self {
        PorterError::Generic(msg.to_owned())
    }
}
