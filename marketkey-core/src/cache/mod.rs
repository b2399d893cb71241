//! Expiring key-value cache for access tokens.
//!
//! This module provides:
//! - [`TokenCache`] - Trait for cache backends with absolute expiry
//! - [`MemoryCache`] - Process-local implementation
//!
//! # Key Convention
//!
//! Keys follow the pattern `{namespace}.access_token.{credential_id}` and
//! `{namespace}.expires_at.{credential_id}`; see
//! [`CredentialContext`](crate::credentials::CredentialContext).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod memory;

pub use memory::MemoryCache;

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache backend encountered an error.
    #[error("cache backend error: {message}")]
    BackendError { message: String },
}

/// Abstraction over expiring key-value caches.
///
/// Entries become invisible once `expire_at` has passed. Values are opaque
/// strings; callers encrypt anything sensitive before putting it.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Retrieve a live value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value that expires at `expire_at`.
    ///
    /// Overwrites any existing value. An `expire_at` in the past stores nothing.
    async fn put(&self, key: &str, value: &str, expire_at: DateTime<Utc>)
    -> Result<(), CacheError>;

    /// Remove a key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn forget(&self, key: &str) -> Result<(), CacheError>;
}
