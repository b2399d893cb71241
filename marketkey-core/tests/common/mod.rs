//! Shared fakes for the integration tests.
//!
//! The cache, store and exchange fakes append to one [`EventLog`] so tests can
//! assert both how often and in which order collaborators are called.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketkey_core::{
    AesGcmCodec, ApiConfiguration, CacheError, CredentialContext, CredentialId, CredentialRow,
    ExchangeError, MemoryCache, MemoryRecordStore, RecordStore, Secret, Seller, SellerId,
    StoreError, TokenCache, TokenExchangeClient, TokenRequest, TokenResponse,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const KEY: [u8; 32] = [7u8; 32];

/// RSA private key (base64 PKCS#8 DER) for request signing.
pub const SIGNING_KEY: &str = include_str!("../fixtures/signing_key.b64");

#[derive(Debug, Default, Clone)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Memory cache that records every call.
pub struct RecordingCache {
    pub inner: MemoryCache,
    pub log: EventLog,
}

#[async_trait]
impl TokenCache for RecordingCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.log.push(format!("cache.get {key}"));
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str, expire_at: DateTime<Utc>) -> Result<(), CacheError> {
        self.log.push(format!("cache.put {key}"));
        self.inner.put(key, value, expire_at).await
    }

    async fn forget(&self, key: &str) -> Result<(), CacheError> {
        self.log.push(format!("cache.forget {key}"));
        self.inner.forget(key).await
    }
}

/// Memory store that records credential writes and can be told to fail them.
pub struct RecordingStore {
    pub inner: MemoryRecordStore,
    pub log: EventLog,
    pub fail_saves: AtomicBool,
    pub save_delay: Mutex<Option<Duration>>,
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn create_seller(&self, name: Option<String>) -> Result<Seller, StoreError> {
        self.inner.create_seller(name).await
    }

    async fn find_seller(&self, id: SellerId) -> Result<Option<Seller>, StoreError> {
        self.inner.find_seller(id).await
    }

    async fn list_sellers(&self) -> Result<Vec<Seller>, StoreError> {
        self.inner.list_sellers().await
    }

    async fn delete_seller(&self, id: SellerId) -> Result<Vec<CredentialId>, StoreError> {
        self.inner.delete_seller(id).await
    }

    async fn insert_credentials(&self, row: CredentialRow) -> Result<CredentialRow, StoreError> {
        self.inner.insert_credentials(row).await
    }

    async fn find_credentials(&self, id: CredentialId) -> Result<Option<CredentialRow>, StoreError> {
        self.inner.find_credentials(id).await
    }

    async fn save_credentials(&self, row: CredentialRow) -> Result<CredentialRow, StoreError> {
        self.log.push(format!("store.save {}", row.id));
        let delay = *self.save_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: "disk full".to_string(),
            });
        }
        self.inner.save_credentials(row).await
    }

    async fn list_credentials(&self, seller_id: SellerId) -> Result<Vec<CredentialRow>, StoreError> {
        self.inner.list_credentials(seller_id).await
    }

    async fn delete_credentials(&self, id: CredentialId) -> Result<(), StoreError> {
        self.inner.delete_credentials(id).await
    }
}

/// Exchange returning scripted responses.
pub struct ScriptedExchange {
    pub log: EventLog,
    pub calls: AtomicUsize,
    pub access_token: Mutex<String>,
    pub refresh_token: Mutex<Option<String>>,
    pub expires_in: Mutex<i64>,
    pub delay: Mutex<Option<Duration>>,
    pub fail: AtomicBool,
    pub requests: Mutex<Vec<TokenRequest>>,
}

impl ScriptedExchange {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn respond_with(&self, access_token: &str, refresh_token: Option<&str>, expires_in: i64) {
        *self.access_token.lock() = access_token.to_string();
        *self.refresh_token.lock() = refresh_token.map(str::to_string);
        *self.expires_in.lock() = expires_in;
    }
}

#[async_trait]
impl TokenExchangeClient for ScriptedExchange {
    async fn exchange(
        &self,
        _config: &ApiConfiguration,
        request: &TokenRequest,
    ) -> Result<TokenResponse, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.push("exchange");
        self.requests.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(ExchangeError::Rejected {
                status: 401,
                body: "invalid_client".to_string(),
            });
        }

        Ok(TokenResponse {
            access_token: Secret::new(self.access_token.lock().clone()),
            refresh_token: self.refresh_token.lock().clone().map(Secret::new),
            token_type: "Bearer".to_string(),
            expires_in: *self.expires_in.lock(),
        })
    }
}

pub struct Harness {
    pub ctx: CredentialContext,
    pub log: EventLog,
    pub cache: Arc<RecordingCache>,
    pub store: Arc<RecordingStore>,
    pub exchange: Arc<ScriptedExchange>,
    pub codec: Arc<AesGcmCodec>,
}

impl Harness {
    pub fn new() -> Self {
        let log = EventLog::default();
        let cache = Arc::new(RecordingCache {
            inner: MemoryCache::new(),
            log: log.clone(),
        });
        let store = Arc::new(RecordingStore {
            inner: MemoryRecordStore::new(),
            log: log.clone(),
            fail_saves: AtomicBool::new(false),
            save_delay: Mutex::new(None),
        });
        let exchange = Arc::new(ScriptedExchange {
            log: log.clone(),
            calls: AtomicUsize::new(0),
            access_token: Mutex::new("tok123".to_string()),
            refresh_token: Mutex::new(None),
            expires_in: Mutex::new(900),
            delay: Mutex::new(None),
            fail: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        });
        let codec = Arc::new(AesGcmCodec::new(&KEY));

        let ctx = CredentialContext::new(
            store.clone(),
            cache.clone(),
            codec.clone(),
            exchange.clone(),
        );

        Self {
            ctx,
            log,
            cache,
            store,
            exchange,
            codec,
        }
    }

    pub fn with_context(mut self, f: impl FnOnce(CredentialContext) -> CredentialContext) -> Self {
        self.ctx = f(self.ctx);
        self
    }
}
