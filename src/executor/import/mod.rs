//! Import of exported trees, archives and single files
//!
//! Every per-collection file found in the source is decoded batch by batch
//! and written to the target according to the collection's
//! [`ConflictPolicy`]. Decode and write failures are counted per document;
//! only connectivity problems end the run.

pub mod coordinator;
pub mod readers;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::archive::ARCHIVE_EXTENSION;
use crate::error::{PorterError, Result};
use crate::executor::result::ConflictPolicy;

pub use coordinator::Importer;
pub use readers::{RecordReader, open_reader, open_sections};

/// Where the exported data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// Compressed container produced by a compressed export.
    Archive(PathBuf),
    /// Uncompressed export tree.
    Directory(PathBuf),
    /// One collection file; the collection is named after the file stem.
    File(PathBuf),
}

impl ImportSource {
    /// Pick the variant from what is on disk.
    ///
    /// Directories are trees, files with the archive extension are
    /// containers, and anything else is a single collection file.
    pub fn detect(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .map_err(|_| PorterError::SourceNotFound(path.to_path_buf()))?;
        if metadata.is_dir() {
            return Ok(ImportSource::Directory(path.to_path_buf()));
        }
        let is_archive = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
        Ok(if is_archive {
            ImportSource::Archive(path.to_path_buf())
        } else {
            ImportSource::File(path.to_path_buf())
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            ImportSource::Archive(p) | ImportSource::Directory(p) | ImportSource::File(p) => p,
        }
    }
}

/// Conflict policy per collection, with a fallback for unmapped names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportPolicy {
    pub per_collection: HashMap<String, ConflictPolicy>,
    pub default: ConflictPolicy,
}

impl ImportPolicy {
    /// Same policy for every collection.
    pub fn uniform(policy: ConflictPolicy) -> Self {
        Self {
            per_collection: HashMap::new(),
            default: policy,
        }
    }

    pub fn with(mut self, collection: impl Into<String>, policy: ConflictPolicy) -> Self {
        self.per_collection.insert(collection.into(), policy);
        self
    }

    pub fn for_collection(&self, collection: &str) -> ConflictPolicy {
        self.per_collection
            .get(collection)
            .copied()
            .unwrap_or(self.default)
    }
}
