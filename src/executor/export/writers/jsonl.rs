//! JSON Lines writer for export operations
//!
//! Each line is one document in the structured-text form.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::Result;

use super::{FormatWriter, create_writer};

/// Writer for JSON Lines format
pub struct JsonLWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl JsonLWriter {
    /// Create a new JSON Lines writer, truncating any existing file.
    pub async fn new(path: &Path) -> Result<Self> {
        let writer = create_writer(path).await?;
        debug!("Created JSON Lines writer for: {}", path.display());

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            written: 0,
        })
    }
}

#[async_trait]
impl FormatWriter for JsonLWriter {
    async fn write_batch(&mut self, records: &[Vec<u8>]) -> Result<usize> {
        for record in records {
            self.writer.write_all(record).await?;
            self.writer.write_all(b"\n").await?;
        }

        self.written += records.len();
        debug!(
            "Wrote {} documents to JSON Lines (total: {})",
            records.len(),
            self.written
        );
        Ok(records.len())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.writer.flush().await?;
        debug!(
            "Finalized JSON Lines file: {} ({} documents)",
            self.path.display(),
            self.written
        );
        Ok(())
    }

    async fn file_size(&self) -> Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::fs;

    #[tokio::test]
    async fn test_jsonl_writer_multiple_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let mut writer = JsonLWriter::new(&path).await.unwrap();

        writer
            .write_batch(&[b"{\"id\":1}".to_vec(), b"{\"id\":2}".to_vec()])
            .await
            .unwrap();
        writer.write_batch(&[b"{\"id\":3}".to_vec()]).await.unwrap();
        writer.finalize().await.unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n");
        assert_eq!(writer.file_size().await.unwrap(), content.len() as u64);
    }

    #[tokio::test]
    async fn test_jsonl_writer_invalid_directory() {
        let result = JsonLWriter::new(Path::new("/nonexistent/directory/file.json")).await;
        assert!(result.is_err());
    }
}
