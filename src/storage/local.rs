//! Local filesystem sink for tile payloads.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── KLAT01.zip          # one file per key (terminal URL segment)
//! ├── KLAT02.zip
//! └── KLAT03.zip.part     # in-flight write, never treated as present
//! ```
//!
//! Payloads are written to `{key}.part` and renamed into place, so a file
//! named by its key is always complete. An interrupted run leaves at most
//! a stale `.part` file, which the next run overwrites.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{PayloadSink, StoreOutcome};

const PART_SUFFIX: &str = ".part";

/// Local filesystem payload sink.
#[derive(Debug, Clone)]
pub struct FileSink {
    root_dir: PathBuf,
}

impl FileSink {
    /// Create a sink rooted at the given directory. The directory is created
    /// on first write.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the full path for a key.
    fn path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(AppError::validation(format!("Invalid file key: {key:?}")));
        }
        Ok(self.root_dir.join(key))
    }
}

#[async_trait]
impl PayloadSink for FileSink {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(key)?).await?)
    }

    async fn store(&self, key: &str, payload: &[u8]) -> Result<StoreOutcome> {
        let path = self.path(key)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(StoreOutcome::Skipped);
        }
        write_atomic(&path, payload).await?;
        Ok(StoreOutcome::Written)
    }
}

/// Write bytes atomically (write to `<path>.part`, then rename).
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(PART_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read bytes, returning None if the file doesn't exist.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_exists() {
        let tmp = TempDir::new().unwrap();
        let sink = FileSink::new(tmp.path().join("output"));

        assert!(!sink.exists("a.zip").await.unwrap());
        let outcome = sink.store("a.zip", b"hello").await.unwrap();
        assert_eq!(outcome, StoreOutcome::Written);
        assert!(sink.exists("a.zip").await.unwrap());

        let data = std::fs::read(tmp.path().join("output/a.zip")).unwrap();
        assert_eq!(data, b"hello");
        assert!(!tmp.path().join("output/a.zip.part").exists());
    }

    #[tokio::test]
    async fn test_existing_key_is_skipped_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.zip"), b"original").unwrap();
        let sink = FileSink::new(tmp.path());

        let outcome = sink.store("b.zip", b"replacement").await.unwrap();
        assert_eq!(outcome, StoreOutcome::Skipped);
        assert_eq!(std::fs::read(tmp.path().join("b.zip")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_stale_part_file_is_not_presence() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("c.zip.part"), b"trunc").unwrap();
        let sink = FileSink::new(tmp.path());

        assert!(!sink.exists("c.zip").await.unwrap());
        sink.store("c.zip", b"complete").await.unwrap();
        assert_eq!(std::fs::read(tmp.path().join("c.zip")).unwrap(), b"complete");
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let tmp = TempDir::new().unwrap();
        let sink = FileSink::new(tmp.path());
        assert!(sink.store("../escape.zip", b"x").await.is_err());
        assert!(sink.exists("").await.is_err());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let data = read_optional(&tmp.path().join("nope.txt")).await.unwrap();
        assert!(data.is_none());
    }
}
