//! JSON file-backed record storage.
//!
//! Records are stored at `~/.local/share/marketkey/records.json` on Linux,
//! the equivalent data directory on macOS, and `%APPDATA%\marketkey\records.json`
//! on Windows. Every mutation rewrites the whole file.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};

use super::memory::StoreData;
use super::{CredentialRow, RecordStore, StoreError};
use crate::model::{CredentialId, Seller, SellerId};

/// Disk-backed record store.
///
/// # Thread Safety
///
/// The write lock is held across the file write, so concurrent mutations are
/// serialized and the file always reflects a consistent snapshot.
pub struct FileRecordStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl FileRecordStore {
    /// Get the default storage path for records.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "marketkey", "marketkey")
            .ok_or(StoreError::DataDirUnavailable)?;

        Ok(dirs.data_dir().join("records.json"))
    }

    /// Load the store from the default location.
    pub fn load() -> Result<Self, StoreError> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the store from a specific path.
    ///
    /// Creates parent directories if they don't exist. A missing file is an
    /// empty store; it is written on the first mutation.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            StoreData::default()
        };

        tracing::debug!(path = %path.display(), "loaded record store");

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, data: &StoreData) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    /// Apply a mutation and persist the result.
    ///
    /// The in-memory tables are only replaced once the file write succeeded.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut data = self.data.write();
        let mut next = data.clone();
        let value = f(&mut next)?;
        self.write(&next)?;
        *data = next;
        Ok(value)
    }
}

impl std::fmt::Debug for FileRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRecordStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn create_seller(&self, name: Option<String>) -> Result<Seller, StoreError> {
        self.mutate(|data| Ok(data.create_seller(name)))
    }

    async fn find_seller(&self, id: SellerId) -> Result<Option<Seller>, StoreError> {
        Ok(self.data.read().find_seller(id))
    }

    async fn list_sellers(&self) -> Result<Vec<Seller>, StoreError> {
        Ok(self.data.read().list_sellers())
    }

    async fn delete_seller(&self, id: SellerId) -> Result<Vec<CredentialId>, StoreError> {
        self.mutate(|data| data.delete_seller(id))
    }

    async fn insert_credentials(&self, row: CredentialRow) -> Result<CredentialRow, StoreError> {
        self.mutate(|data| data.insert_credentials(row))
    }

    async fn find_credentials(
        &self,
        id: CredentialId,
    ) -> Result<Option<CredentialRow>, StoreError> {
        Ok(self.data.read().find_credentials(id))
    }

    async fn save_credentials(&self, row: CredentialRow) -> Result<CredentialRow, StoreError> {
        self.mutate(|data| data.save_credentials(row))
    }

    async fn list_credentials(
        &self,
        seller_id: SellerId,
    ) -> Result<Vec<CredentialRow>, StoreError> {
        Ok(self.data.read().list_credentials(seller_id))
    }

    async fn delete_credentials(&self, id: CredentialId) -> Result<(), StoreError> {
        self.mutate(|data| data.delete_credentials(id))
    }
}
