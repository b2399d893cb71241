//! Top-level error types for Marketkey.

use thiserror::Error;

use crate::cache::CacheError;
use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::exchange::ExchangeError;
use crate::registry::RegistryError;
use crate::settings::SettingsError;
use crate::store::StoreError;

/// Top-level error type encompassing all Marketkey errors.
#[derive(Debug, Error)]
pub enum MarketkeyError {
    /// Encrypting or decrypting a stored secret failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Request configuration error, including signing with a placeholder.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error reading from the record store, including unknown ids.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Writing a credential record failed.
    #[error("failed to persist credentials: {0}")]
    Persistence(#[source] StoreError),

    /// Error from the token cache.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The vendor token endpoint failed.
    #[error("token exchange failed: {0}")]
    Exchange(#[from] ExchangeError),

    /// Capability or provider lookup failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Error loading settings.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Generic internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl MarketkeyError {
    /// `true` if the error reports an unknown seller or credential id.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(err) => err.is_not_found(),
            _ => false,
        }
    }
}
