//! File-backed save store.
//!
//! ```text
//! {root}/
//!   {name}          # final file
//!   {name}.tmp      # in-flight write, renamed over {name} on success
//! ```
//!
//! A crash mid-write leaves at worst a stray `.tmp`; the previous version of
//! `{name}` is never truncated.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{validate_name, SaveStore, StoreError, StoreResult};

/// Save store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileSaveStore {
    root: PathBuf,
}

impl FileSaveStore {
    /// Create a store under `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    async fn ensure_root(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::file_io(&self.root, e))
    }
}

#[async_trait]
impl SaveStore for FileSaveStore {
    async fn exists(&self, name: &str) -> StoreResult<bool> {
        let path = self.path_of(name)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::file_io(&path, e))
    }

    async fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_of(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::file_io(&path, e)),
        }
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let final_path = self.path_of(name)?;
        self.ensure_root().await?;
        let temp_path = self.root.join(format!("{}.tmp", name));

        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| StoreError::file_io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| StoreError::file_io(&final_path, e))?;

        debug!(path = %final_path.display(), bytes = bytes.len(), "file written");
        Ok(())
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::file_io(&path, e)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let from_path = self.path_of(from)?;
        let to_path = self.path_of(to)?;
        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| StoreError::file_io(&from_path, e))?;
        debug!(from = %from_path.display(), to = %to_path.display(), "file renamed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let store = FileSaveStore::new(dir.path());
        assert_eq!(store.read("nothing.sav").await.unwrap(), None);
        assert!(!store.exists("nothing.sav").await.unwrap());
        assert!(!store.delete("nothing.sav").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_creates_root_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let store = FileSaveStore::new(dir.path().join("nested").join("saves"));

        store.write("slot.sav", b"first").await.unwrap();
        store.write("slot.sav", b"second").await.unwrap();

        assert_eq!(store.read("slot.sav").await.unwrap(), Some(b"second".to_vec()));
        assert!(!store.root().join("slot.sav.tmp").exists());
        assert!(store.exists("slot.sav").await.unwrap());

        assert!(store.delete("slot.sav").await.unwrap());
        assert!(!store.exists("slot.sav").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let dir = TempDir::new().unwrap();
        let store = FileSaveStore::new(dir.path());
        let err = store.write("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_rename_replaces_target() {
        let dir = TempDir::new().unwrap();
        let store = FileSaveStore::new(dir.path());
        store.write("slot.sav", b"old").await.unwrap();
        store.write("slot.sav.staged", b"new").await.unwrap();

        store.rename("slot.sav.staged", "slot.sav").await.unwrap();
        assert_eq!(store.read("slot.sav").await.unwrap(), Some(b"new".to_vec()));
        assert!(!store.exists("slot.sav.staged").await.unwrap());
        assert!(matches!(
            store.rename("slot.sav.staged", "slot.sav").await,
            Err(StoreError::FileIo { .. })
        ));
    }
}
