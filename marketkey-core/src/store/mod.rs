//! Seller and credential persistence.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`CredentialRow`] - The at-rest shape of a credential record (secrets encrypted)
//! - [`RecordStore`] - Trait for seller/credential storage backends
//! - [`MemoryRecordStore`] - In-memory implementation for testing
//! - [`FileRecordStore`] - JSON file implementation for the CLI
//!
//! # Schema
//!
//! Stores mirror two relational tables:
//!
//! ```text
//! walmart_api_sellers(id, name?, created_at, updated_at)
//! walmart_api_credentials(id, seller_id -> sellers ON DELETE CASCADE,
//!     client_id, client_secret, consumer_id?, private_key?, channel_type?,
//!     partner_id?, refresh_token?, grant_type, country, created_at, updated_at)
//! ```
//!
//! Stores never see plaintext secrets: `client_secret`, `private_key` and
//! `refresh_token` arrive as codec ciphertext.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::model::{Country, CredentialId, GrantType, Seller, SellerId};

mod file;
mod memory;

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value.
/// The buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// At-rest representation of a credential record.
///
/// The sensitive columns hold ciphertext produced by a
/// [`SecretCodec`](crate::codec::SecretCodec); see
/// [`Credentials::to_row`](crate::credentials::Credentials::to_row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRow {
    pub id: CredentialId,
    pub seller_id: SellerId,
    pub client_id: String,

    /// Encrypted.
    pub client_secret: String,

    pub consumer_id: Option<String>,

    /// Encrypted.
    pub private_key: Option<String>,

    pub channel_type: Option<String>,
    pub partner_id: Option<String>,

    /// Encrypted.
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub grant_type: GrantType,

    #[serde(default)]
    pub country: Country,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Error type for record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A credential row referenced a seller that does not exist.
    #[error("seller {seller_id} does not exist")]
    MissingSeller { seller_id: SellerId },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error reading or writing the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data directory not available.
    #[error("data directory not available")]
    DataDirUnavailable,

    /// The row was changed by another writer since it was loaded.
    #[error("credentials {id} were changed by another writer")]
    Conflict { id: CredentialId },

    /// The write did not complete in time.
    #[error("store write timed out after {after:?}")]
    Timeout { after: Duration },
}

impl StoreError {
    pub fn seller_not_found(id: SellerId) -> Self {
        Self::NotFound {
            entity: "seller",
            id: id.to_string(),
        }
    }

    pub fn credentials_not_found(id: CredentialId) -> Self {
        Self::NotFound {
            entity: "credentials",
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Abstraction over seller/credential storage backends.
///
/// Implementations include:
/// - [`MemoryRecordStore`] - In-memory storage for testing
/// - [`FileRecordStore`] - JSON file in the platform data directory
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a seller, assigning its id and timestamps.
    async fn create_seller(&self, name: Option<String>) -> Result<Seller, StoreError>;

    /// Retrieve a seller by id.
    ///
    /// Returns `Ok(None)` if the seller doesn't exist.
    async fn find_seller(&self, id: SellerId) -> Result<Option<Seller>, StoreError>;

    async fn list_sellers(&self) -> Result<Vec<Seller>, StoreError>;

    /// Delete a seller and, by cascade, all of its credentials.
    ///
    /// Returns the ids of the deleted credential rows.
    async fn delete_seller(&self, id: SellerId) -> Result<Vec<CredentialId>, StoreError>;

    /// Insert a new credential row.
    ///
    /// The `id` and timestamps of `row` are ignored; the store assigns them.
    async fn insert_credentials(&self, row: CredentialRow) -> Result<CredentialRow, StoreError>;

    /// Retrieve a credential row by id.
    ///
    /// Returns `Ok(None)` if the row doesn't exist.
    async fn find_credentials(&self, id: CredentialId)
    -> Result<Option<CredentialRow>, StoreError>;

    /// Overwrite an existing credential row, bumping `updated_at`.
    async fn save_credentials(&self, row: CredentialRow) -> Result<CredentialRow, StoreError>;

    /// List the credential rows owned by a seller.
    async fn list_credentials(&self, seller_id: SellerId)
    -> Result<Vec<CredentialRow>, StoreError>;

    /// Delete a credential row.
    async fn delete_credentials(&self, id: CredentialId) -> Result<(), StoreError>;

    /// Check if a credential row exists without decoding it.
    async fn credentials_exist(&self, id: CredentialId) -> Result<bool, StoreError> {
        Ok(self.find_credentials(id).await?.is_some())
    }
}
