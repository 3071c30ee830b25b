//! Archive adapter
//!
//! Packs an export tree into a single ZIP container and unpacks containers
//! back into a tree. Packing walks the tree in sorted order and stamps every
//! entry with the same modification time, so the same tree always packs to
//! the same bytes.
//!
//! Unpacking validates every entry name before anything is written: a
//! container with one escaping entry fails as a whole with
//! [`SecurityError::PathTraversal`].

use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ExecutionError, PorterError, Result, SecurityError};

/// Extension of archive containers.
pub const ARCHIVE_EXTENSION: &str = "zip";

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// Pack a directory tree into container bytes.
pub fn pack(dir: &Path) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    write_tree(dir, &mut buf)?;
    Ok(buf.into_inner())
}

/// Pack a directory tree into a container file, replacing it if present.
pub fn pack_to_file(dir: &Path, file: &Path) -> Result<u64> {
    let mut out = File::create(file)?;
    write_tree(dir, &mut out)?;
    out.flush()?;
    Ok(out.metadata()?.len())
}

fn write_tree<W: Write + Seek>(dir: &Path, sink: W) -> Result<()> {
    if !dir.is_dir() {
        return Err(PorterError::SourceNotFound(dir.to_path_buf()));
    }

    let mut writer = ZipWriter::new(sink);
    let options = entry_options();

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| PorterError::Io(io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| PorterError::Generic(e.to_string()))?;
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut input = File::open(entry.path())?;
            io::copy(&mut input, &mut writer)?;
        } else {
            debug!("Skipping non-regular file {}", entry.path().display());
        }
    }

    writer.finish()?;
    Ok(())
}

/// Container entry name for a relative path: `/`-separated on every platform.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Unpack container bytes into `dest`.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<usize> {
    extract(ZipArchive::new(Cursor::new(bytes))?, dest)
}

/// Unpack a container file into `dest`.
pub fn unpack_file(file: &Path, dest: &Path) -> Result<usize> {
    if !file.is_file() {
        return Err(PorterError::SourceNotFound(file.to_path_buf()));
    }
    let reader = BufReader::new(File::open(file)?);
    extract(ZipArchive::new(reader)?, dest)
}

/// Returns the number of files written.
fn extract<R: Read + Seek>(mut archive: ZipArchive<R>, dest: &Path) -> Result<usize> {
    // Validate every name first so a rejected container writes nothing.
    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let relative = safe_relative_path(entry.name())?;
        plan.push((index, relative, entry.is_dir()));
    }

    fs::create_dir_all(dest)?;
    let mut files = 0;
    for (index, relative, is_dir) in plan {
        let target = dest.join(&relative);
        if is_dir || relative.as_os_str().is_empty() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut entry = archive.by_index(index)?;
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        files += 1;
    }

    debug!("Unpacked {} files into {}", files, dest.display());
    Ok(files)
}

/// Resolve an entry name to a path that stays below the destination.
fn safe_relative_path(name: &str) -> std::result::Result<PathBuf, SecurityError> {
    let reject = || SecurityError::PathTraversal {
        entry: name.to_string(),
    };

    if name.starts_with('/') || name.starts_with('\\') {
        return Err(reject());
    }

    let mut path = PathBuf::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(reject()),
            s if s.contains(':') => return Err(reject()),
            s => path.push(s),
        }
    }

    // Platform-specific prefixes (drive letters, UNC roots) that slipped through.
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(reject());
    }
    Ok(path)
}

/// Pack on the blocking pool.
pub async fn pack_tree(dir: &Path, file: &Path) -> Result<u64> {
    let (dir, file) = (dir.to_path_buf(), file.to_path_buf());
    tokio::task::spawn_blocking(move || pack_to_file(&dir, &file))
        .await
        .map_err(|e| ExecutionError::WorkerFailed(e.to_string()))?
}

/// Unpack on the blocking pool.
pub async fn unpack_tree(file: &Path, dest: &Path) -> Result<usize> {
    let (file, dest) = (file.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || unpack_file(&file, &dest))
        .await
        .map_err(|e| ExecutionError::WorkerFailed(e.to_string()))?
}

/// Directory tree an import reads from.
///
/// A container is unpacked into a temporary directory owned by the tree and
/// removed when the tree is dropped. A plain directory is used in place.
#[derive(Debug)]
pub struct WorkTree {
    root: PathBuf,
    temp: Option<TempDir>,
}

impl WorkTree {
    /// # Arguments
    /// * `path` - Container file or directory
    /// * `compressed` - Whether `path` is a container
    pub async fn open(path: &Path, compressed: bool) -> Result<Self> {
        if !compressed {
            if !path.is_dir() {
                return Err(PorterError::SourceNotFound(path.to_path_buf()));
            }
            return Ok(Self {
                root: path.to_path_buf(),
                temp: None,
            });
        }

        if !path.is_file() {
            return Err(PorterError::SourceNotFound(path.to_path_buf()));
        }
        let temp = tempfile::Builder::new().prefix("mongoport-").tempdir()?;
        let root = temp.path().to_path_buf();
        unpack_tree(path, &root).await?;
        Ok(Self {
            root,
            temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .map(|e| {
                let name = entry_name(e.path().strip_prefix(root).unwrap());
                let content = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
                (name, content)
            })
            .collect()
    }

    fn sample_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("users.json"), b"{\"a\":1}\n{\"a\":2}\n").unwrap();
        fs::write(dir.path().join("blobs.bin"), [b'M', 0, 255, 7]).unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("nested/deeper/x.json"), b"").unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        dir
    }

    fn crafted(entries: &[&str]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for name in entries {
            writer.start_file(name.to_string(), entry_options()).unwrap();
            writer.write_all(b"payload").unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_pack_unpack_preserves_tree() {
        let source = sample_tree();
        let bytes = pack(source.path()).unwrap();

        let dest = tempfile::tempdir().unwrap();
        let files = unpack(&bytes, dest.path()).unwrap();

        assert_eq!(files, 3);
        assert_eq!(snapshot(dest.path()), snapshot(source.path()));
    }

    #[test]
    fn test_pack_is_deterministic() {
        let source = sample_tree();
        assert_eq!(pack(source.path()).unwrap(), pack(source.path()).unwrap());
    }

    #[test]
    fn test_unpack_twice_gives_identical_trees() {
        let source = sample_tree();
        let bytes = pack(source.path()).unwrap();

        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        unpack(&bytes, first.path()).unwrap();
        unpack(&bytes, second.path()).unwrap();
        assert_eq!(snapshot(first.path()), snapshot(second.path()));
    }

    #[test]
    fn test_traversal_entry_is_rejected_before_writing() {
        let outer = tempfile::tempdir().unwrap();
        let dest = outer.path().join("dest");
        let bytes = crafted(&["ok.json", "../escape"]);

        let err = unpack(&bytes, &dest).unwrap_err();
        assert!(matches!(
            err,
            PorterError::Security(SecurityError::PathTraversal { ref entry }) if entry == "../escape"
        ));
        assert!(!outer.path().join("escape").exists());
        assert!(!dest.join("ok.json").exists());
    }

    #[test]
    fn test_other_escaping_names_are_rejected() {
        for name in ["/etc/passwd", "a/../../b", "..\\evil", "C:\\windows\\x", "\\\\server\\share"] {
            assert!(
                matches!(
                    safe_relative_path(name),
                    Err(SecurityError::PathTraversal { .. })
                ),
                "{name} accepted"
            );
        }
        assert_eq!(
            safe_relative_path("./a//b/c.json").unwrap(),
            Path::new("a").join("b").join("c.json")
        );
    }

    #[test]
    fn test_missing_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.zip");
        assert!(matches!(
            unpack_file(&missing, dir.path()),
            Err(PorterError::SourceNotFound(_))
        ));
        assert!(matches!(
            pack(&dir.path().join("absent")),
            Err(PorterError::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_work_tree_removes_temp_dir_on_drop() {
        let source = sample_tree();
        let scratch = tempfile::tempdir().unwrap();
        let container = scratch.path().join("export.zip");
        pack_tree(source.path(), &container).await.unwrap();

        let tree = WorkTree::open(&container, true).await.unwrap();
        let root = tree.path().to_path_buf();
        assert!(tree.is_temporary());
        assert!(root.join("users.json").is_file());

        drop(tree);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_work_tree_passthrough_for_directories() {
        let source = sample_tree();
        let tree = WorkTree::open(source.path(), false).await.unwrap();
        assert!(!tree.is_temporary());
        assert_eq!(tree.path(), source.path());

        drop(tree);
        assert!(source.path().join("users.json").exists());
    }
}
