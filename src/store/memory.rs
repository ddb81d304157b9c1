//! In-memory save store for testing.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;

use super::{validate_name, SaveStore, StoreError, StoreResult};

/// In-memory save store.
///
/// Uses a BTreeMap so listings come back in name order.
#[derive(Debug, Default)]
pub struct InMemorySaveStore {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemorySaveStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every stored file.
    pub fn names(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Overwrite a file in place, bypassing the pipeline. Lets tests corrupt
    /// stored bytes.
    pub fn tamper<F: FnOnce(&mut Vec<u8>)>(&self, name: &str, f: F) -> bool {
        match self.files.write().get_mut(name) {
            Some(bytes) => {
                f(bytes);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SaveStore for InMemorySaveStore {
    async fn exists(&self, name: &str) -> StoreResult<bool> {
        validate_name(name)?;
        Ok(self.files.read().contains_key(name))
    }

    async fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_name(name)?;
        Ok(self.files.read().get(name).cloned())
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        validate_name(name)?;
        self.files.write().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        validate_name(name)?;
        Ok(self.files.write().remove(name).is_some())
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        validate_name(from)?;
        validate_name(to)?;
        let mut files = self.files.write();
        let bytes = files
            .remove(from)
            .ok_or_else(|| StoreError::file_io(from, ErrorKind::NotFound.into()))?;
        files.insert(to.to_string(), bytes);
        Ok(())
    }
}
