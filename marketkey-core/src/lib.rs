//! # Marketkey Core
//!
//! Credential and access-token lifecycle for the Walmart marketplace APIs.
//!
//! This crate provides:
//! - Encrypted persistence of sellers and their credential records
//! - Lazy access-token resolution (memory, then cache, then a live exchange)
//!   with invalidation on every credential change
//! - Signed-request configurations, including placeholders that refuse to sign
//! - A registry turning credential identities into capability and provider clients
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use marketkey_core::{
//!     API_BASE_URL, AesGcmCodec, CredentialContext, CredentialRegistry,
//!     HttpTokenExchange, MemoryCache, MemoryRecordStore,
//! };
//!
//! async fn orders_client(key: &str) -> Result<(), marketkey_core::MarketkeyError> {
//!     let ctx = CredentialContext::new(
//!         Arc::new(MemoryRecordStore::new()),
//!         Arc::new(MemoryCache::new()),
//!         Arc::new(AesGcmCodec::from_base64(key)?),
//!         Arc::new(HttpTokenExchange::with_base_url(API_BASE_URL)?),
//!     );
//!     let registry = CredentialRegistry::new(Arc::new(ctx))?;
//!     let client = registry.build_client("mp::us::OrdersApi", 42).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod exchange;
pub mod model;
pub mod registry;
pub mod settings;
pub mod store;

// Re-export commonly used types at crate root
pub use model::{
    Country,
    CredentialId,
    GrantType,
    ParseError,
    Seller,
    SellerId,
};

pub use codec::{
    AesGcmCodec,
    CodecError,
    SecretCodec,
};

pub use cache::{
    CacheError,
    MemoryCache,
    TokenCache,
};

pub use config::{
    API_BASE_URL,
    AccessToken,
    ApiConfiguration,
    ConfigError,
    ConfigurationOptions,
};

pub use credentials::{
    CredentialContext,
    Credentials,
    CredentialsUpdate,
    NewCredentials,
};

pub use exchange::{
    ExchangeError,
    TokenExchangeClient,
    TokenRequest,
    TokenResponse,
};

#[cfg(feature = "http-exchange")]
pub use exchange::HttpTokenExchange;

pub use registry::{
    ApiClient,
    CapabilityClass,
    CredentialRef,
    CredentialRegistry,
    ProviderClient,
    ProviderKind,
    RegistryError,
    infer_region,
};

pub use settings::{
    Settings,
    SettingsError,
};

pub use store::{
    CredentialRow,
    FileRecordStore,
    MemoryRecordStore,
    RecordStore,
    Secret,
    StoreError,
};

pub use error::MarketkeyError;
