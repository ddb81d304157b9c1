//! Save-file storage backends.
//!
//! A store maps file names to opaque byte blobs. Every save produces two
//! files (data and metadata); the manager decides their names and order,
//! the store only moves bytes.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use std::path::PathBuf;

/// Store failure, carrying the file or path it concerns.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error on a concrete path.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File name would escape the store root.
    #[error("invalid file name '{0}'")]
    InvalidName(String),
}

impl StoreError {
    /// I/O error with path context.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Byte storage for save files.
///
/// `read` of a missing file is `Ok(None)`, never an error; `write` replaces
/// the whole file.
#[async_trait]
pub trait SaveStore: Send + Sync {
    /// Whether `name` exists.
    async fn exists(&self, name: &str) -> StoreResult<bool>;

    /// Contents of `name`, if present.
    async fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the contents of `name`.
    async fn write(&self, name: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Remove `name`. Returns whether it existed.
    async fn delete(&self, name: &str) -> StoreResult<bool>;

    /// Move `from` over `to`, replacing it. `from` must exist.
    async fn rename(&self, from: &str, to: &str) -> StoreResult<()>;
}

/// Reject names that are empty or could address anything outside the root.
pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

pub use file::FileSaveStore;
pub use memory::InMemorySaveStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("slot1.sav").is_ok());
        assert!(validate_name("slot1.meta.json").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a\\b").is_err());
    }
}
