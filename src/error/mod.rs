//! Error handling for export, import and schema runs.
//!
//! This module provides:
//! - The crate-wide [`PorterError`] and its specific kinds
//! - Classification of errors into run-fatal and per-document severity
//! - Structured error information extracted from MongoDB driver errors
//!
//! # Example
//!
//! ```rust,no_run
//! use mongoport::error::{FormatError, PorterError, Result};
//!
//! fn decode_step() -> Result<()> {
//!     Err(FormatError::UnknownTag("0x7f".to_string()).into())
//! }
//!
//! match decode_step() {
//!     Err(e) if !e.is_fatal() => println!("recorded: {e}"),
//!     Err(e) => println!("run aborted: {e}"),
//!     Ok(()) => {}
//! }
//! ```

pub mod kinds;
pub mod mongo;

// Re-export commonly used types
pub use kinds::{
    ConfigError, ConnectionError, ExecutionError, FormatError, PorterError, Result, SecurityError,
};
pub use mongo::{ErrorInfo, extract_error_info};
