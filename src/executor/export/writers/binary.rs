//! Binary writer for export operations
//!
//! Writes the file magic followed by `len:u32 LE` framed records.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::codec::layout::BINARY_MAGIC;
use crate::error::{FormatError, Result};

use super::{FormatWriter, create_writer};

/// Writer for framed binary files
pub struct BinaryWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl BinaryWriter {
    /// Create the file and write its magic header.
    pub async fn new(path: &Path) -> Result<Self> {
        let mut writer = create_writer(path).await?;
        writer.write_all(BINARY_MAGIC).await?;
        debug!("Created binary writer for: {}", path.display());

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            written: 0,
        })
    }
}

#[async_trait]
impl FormatWriter for BinaryWriter {
    async fn write_batch(&mut self, records: &[Vec<u8>]) -> Result<usize> {
        for record in records {
            let len = u32::try_from(record.len()).map_err(|_| {
                FormatError::InvalidPayload(format!("record of {} bytes", record.len()))
            })?;
            self.writer.write_all(&len.to_le_bytes()).await?;
            self.writer.write_all(record).await?;
        }

        self.written += records.len();
        debug!(
            "Wrote {} binary records (total: {})",
            records.len(),
            self.written
        );
        Ok(records.len())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.writer.flush().await?;
        debug!(
            "Finalized binary file: {} ({} documents)",
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

    #[tokio::test]
    async fn test_binary_writer_frames_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.bin");
        let mut writer = BinaryWriter::new(&path).await.unwrap();
        writer
            .write_batch(&[vec![1, 2, 3], vec![]])
            .await
            .unwrap();
        writer.finalize().await.unwrap();

        let bytes = tokio::fs::read(&path).await.unwrap();
        let mut expected = BINARY_MAGIC.to_vec();
        expected.extend_from_slice(&[3, 0, 0, 0, 1, 2, 3, 0, 0, 0, 0]);
        assert_eq!(bytes, expected);
    }

    #[tokio::test]
    async fn test_empty_binary_file_has_only_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let mut writer = BinaryWriter::new(&path).await.unwrap();
        writer.finalize().await.unwrap();
        assert_eq!(writer.file_size().await.unwrap(), BINARY_MAGIC.len() as u64);
    }
}
