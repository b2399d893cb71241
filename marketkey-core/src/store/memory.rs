//! In-memory record storage implementation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CredentialRow, RecordStore, StoreError};
use crate::model::{CredentialId, Seller, SellerId};

/// Table contents shared by the memory and file stores.
///
/// Ids are assigned from monotonically increasing counters and never reused,
/// so a deleted record's cache keys cannot be inherited by a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreData {
    /// Version of the store format (for future migrations).
    pub(crate) version: u32,
    next_seller_id: u64,
    next_credential_id: u64,
    sellers: BTreeMap<SellerId, Seller>,
    credentials: BTreeMap<CredentialId, CredentialRow>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: 1,
            next_seller_id: 1,
            next_credential_id: 1,
            sellers: BTreeMap::new(),
            credentials: BTreeMap::new(),
        }
    }
}

impl StoreData {
    pub(crate) fn create_seller(&mut self, name: Option<String>) -> Seller {
        let id = SellerId::new(self.next_seller_id);
        self.next_seller_id += 1;

        let now = Utc::now();
        let seller = Seller {
            id,
            name,
            created_at: now,
            updated_at: now,
        };
        self.sellers.insert(id, seller.clone());
        seller
    }

    pub(crate) fn find_seller(&self, id: SellerId) -> Option<Seller> {
        self.sellers.get(&id).cloned()
    }

    pub(crate) fn list_sellers(&self) -> Vec<Seller> {
        self.sellers.values().cloned().collect()
    }

    pub(crate) fn delete_seller(&mut self, id: SellerId) -> Result<Vec<CredentialId>, StoreError> {
        if self.sellers.remove(&id).is_none() {
            return Err(StoreError::seller_not_found(id));
        }

        let owned: Vec<CredentialId> = self
            .credentials
            .values()
            .filter(|row| row.seller_id == id)
            .map(|row| row.id)
            .collect();

        for credential_id in &owned {
            self.credentials.remove(credential_id);
        }

        Ok(owned)
    }

    pub(crate) fn insert_credentials(
        &mut self,
        mut row: CredentialRow,
    ) -> Result<CredentialRow, StoreError> {
        if !self.sellers.contains_key(&row.seller_id) {
            return Err(StoreError::MissingSeller {
                seller_id: row.seller_id,
            });
        }

        row.id = CredentialId::new(self.next_credential_id);
        self.next_credential_id += 1;

        let now = Utc::now();
        row.created_at = now;
        row.updated_at = now;

        self.credentials.insert(row.id, row.clone());
        Ok(row)
    }

    pub(crate) fn find_credentials(&self, id: CredentialId) -> Option<CredentialRow> {
        self.credentials.get(&id).cloned()
    }

    pub(crate) fn save_credentials(
        &mut self,
        mut row: CredentialRow,
    ) -> Result<CredentialRow, StoreError> {
        if !self.sellers.contains_key(&row.seller_id) {
            return Err(StoreError::MissingSeller {
                seller_id: row.seller_id,
            });
        }

        let existing = self
            .credentials
            .get_mut(&row.id)
            .ok_or_else(|| StoreError::credentials_not_found(row.id))?;

        if row.updated_at < existing.updated_at {
            return Err(StoreError::Conflict { id: row.id });
        }

        // `updated_at` doubles as the row version and must strictly increase.
        let now = Utc::now();
        row.created_at = existing.created_at;
        row.updated_at = if now > existing.updated_at {
            now
        } else {
            existing.updated_at + chrono::Duration::microseconds(1)
        };
        *existing = row.clone();
        Ok(row)
    }

    pub(crate) fn list_credentials(&self, seller_id: SellerId) -> Vec<CredentialRow> {
        self.credentials
            .values()
            .filter(|row| row.seller_id == seller_id)
            .cloned()
            .collect()
    }

    pub(crate) fn delete_credentials(&mut self, id: CredentialId) -> Result<(), StoreError> {
        self.credentials
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::credentials_not_found(id))
    }
}

/// In-memory record store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
#[derive(Default)]
pub struct MemoryRecordStore {
    data: RwLock<StoreData>,
}

impl MemoryRecordStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        f.debug_struct("MemoryRecordStore")
            .field("sellers", &data.sellers.len())
            .field("credentials", &data.credentials.len())
            .finish()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_seller(&self, name: Option<String>) -> Result<Seller, StoreError> {
        Ok(self.data.write().create_seller(name))
    }

    async fn find_seller(&self, id: SellerId) -> Result<Option<Seller>, StoreError> {
        Ok(self.data.read().find_seller(id))
    }

    async fn list_sellers(&self) -> Result<Vec<Seller>, StoreError> {
        Ok(self.data.read().list_sellers())
    }

    async fn delete_seller(&self, id: SellerId) -> Result<Vec<CredentialId>, StoreError> {
        self.data.write().delete_seller(id)
    }

    async fn insert_credentials(&self, row: CredentialRow) -> Result<CredentialRow, StoreError> {
        self.data.write().insert_credentials(row)
    }

    async fn find_credentials(
        &self,
        id: CredentialId,
    ) -> Result<Option<CredentialRow>, StoreError> {
        Ok(self.data.read().find_credentials(id))
    }

    async fn save_credentials(&self, row: CredentialRow) -> Result<CredentialRow, StoreError> {
        self.data.write().save_credentials(row)
    }

    async fn list_credentials(
        &self,
        seller_id: SellerId,
    ) -> Result<Vec<CredentialRow>, StoreError> {
        Ok(self.data.read().list_credentials(seller_id))
    }

    async fn delete_credentials(&self, id: CredentialId) -> Result<(), StoreError> {
        self.data.write().delete_credentials(id)
    }
}
