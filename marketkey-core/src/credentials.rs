//! Credential records and the access-token lifecycle.
//!
//! This module provides:
//! - [`CredentialContext`] - The collaborators a record needs (store, cache, codec, exchange)
//! - [`Credentials`] - A seller's credential record with its transient token state
//! - [`NewCredentials`] / [`CredentialsUpdate`] - Creation and mutation payloads
//!
//! # Token resolution
//!
//! [`Credentials::access_token`] resolves a token lazily, in this order:
//!
//! 1. the in-memory token, if present and not expired (no I/O);
//! 2. the cache entries `{namespace}.access_token.{id}` / `{namespace}.expires_at.{id}`;
//! 3. a live exchange with the vendor token endpoint, serialized per
//!    credential id. The returned refresh token is persisted first, and only
//!    then are the memory fields and cache entries populated, since persisting
//!    invalidates them.
//!
//! # Invalidation
//!
//! Every write of a persisted field goes through [`Credentials::save`], which
//! forgets the cached token and clears the in-memory one *before* writing. A
//! token issued under old credentials can therefore never be used to sign
//! requests after an edit.
//!
//! # Example
//!
//! ```rust,ignore
//! use marketkey_core::{CredentialContext, Credentials, CredentialId};
//!
//! async fn signed_config(ctx: &CredentialContext) -> Result<(), marketkey_core::MarketkeyError> {
//!     let mut credentials = Credentials::find(ctx, CredentialId::new(42)).await?;
//!     let config = credentials.to_api_configuration(ctx, false).await?;
//!     let signature = config.sign("/v3/orders", "GET", 1_700_000_000_000, "")?;
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, TokenCache};
use crate::codec::{self, SecretCodec};
use crate::config::{AccessToken, ApiConfiguration, ConfigurationOptions};
use crate::error::MarketkeyError;
use crate::exchange::{ExchangeError, TokenExchangeClient, TokenRequest};
use crate::model::{Country, CredentialId, GrantType, Seller, SellerId};
use crate::settings::Settings;
use crate::store::{CredentialRow, RecordStore, Secret, StoreError};

/// Default prefix of the token cache keys.
pub const DEFAULT_CACHE_NAMESPACE: &str = "walmart-api";

/// Default upper bound on a single token exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Collaborators shared by all credential records of a process.
pub struct CredentialContext {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn TokenCache>,
    codec: Arc<dyn SecretCodec>,
    exchange: Arc<dyn TokenExchangeClient>,
    namespace: String,
    redirect_url: Option<String>,
    exchange_timeout: Duration,
    debug: bool,
    exchange_guards: Mutex<HashMap<CredentialId, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn TokenCache>,
        codec: Arc<dyn SecretCodec>,
        exchange: Arc<dyn TokenExchangeClient>,
    ) -> Self {
        Self {
            store,
            cache,
            codec,
            exchange,
            namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            redirect_url: None,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            debug: false,
            exchange_guards: Mutex::new(HashMap::new()),
        }
    }

    /// Take namespace, redirect URL, exchange timeout and debug flag from settings.
    pub fn with_settings(self, settings: &Settings) -> Self {
        self.with_namespace(settings.cache_namespace.clone())
            .with_redirect_url(settings.redirect_url.clone())
            .with_exchange_timeout(settings.exchange_timeout())
            .with_debug(settings.debug)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Redirect URL sent with `authorization_code` exchanges.
    pub fn with_redirect_url(mut self, redirect_url: Option<String>) -> Self {
        self.redirect_url = redirect_url.filter(|url| !url.is_empty());
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Mark every configuration built from this context as debug.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &dyn TokenCache {
        self.cache.as_ref()
    }

    pub fn codec(&self) -> &dyn SecretCodec {
        self.codec.as_ref()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn access_token_cache_key(&self, id: CredentialId) -> String {
        format!("{}.access_token.{}", self.namespace, id)
    }

    pub fn expires_at_cache_key(&self, id: CredentialId) -> String {
        format!("{}.expires_at.{}", self.namespace, id)
    }

    /// Forget both cache entries of a credential record.
    pub async fn forget_tokens(&self, id: CredentialId) -> Result<(), CacheError> {
        self.cache.forget(&self.access_token_cache_key(id)).await?;
        self.cache.forget(&self.expires_at_cache_key(id)).await
    }

    fn exchange_guard(&self, id: CredentialId) -> Arc<tokio::sync::Mutex<()>> {
        self.exchange_guards
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn create_seller(&self, name: Option<String>) -> Result<Seller, MarketkeyError> {
        let seller = self
            .store
            .create_seller(name.filter(|n| !n.is_empty()))
            .await
            .map_err(MarketkeyError::Persistence)?;

        info!(seller = %seller.id, "created seller");
        Ok(seller)
    }

    /// Delete a seller together with its credentials and their cached tokens.
    ///
    /// Returns the ids of the deleted credential records.
    pub async fn delete_seller(&self, id: SellerId) -> Result<Vec<CredentialId>, MarketkeyError> {
        let deleted = self.store.delete_seller(id).await.map_err(|e| match e {
            e @ StoreError::NotFound { .. } => MarketkeyError::Store(e),
            e => MarketkeyError::Persistence(e),
        })?;

        for credential_id in &deleted {
            self.forget_tokens(*credential_id).await?;
            self.exchange_guards.lock().remove(credential_id);
        }

        info!(seller = %id, credentials = deleted.len(), "deleted seller");
        Ok(deleted)
    }

    /// Load every credential record owned by a seller.
    pub async fn credentials_for_seller(
        &self,
        seller_id: SellerId,
    ) -> Result<Vec<Credentials>, MarketkeyError> {
        let rows = self.store.list_credentials(seller_id).await?;
        rows.into_iter()
            .map(|row| Credentials::from_row(row, self.codec()).map_err(MarketkeyError::from))
            .collect()
    }
}

impl std::fmt::Debug for CredentialContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialContext")
            .field("namespace", &self.namespace)
            .field("redirect_url", &self.redirect_url)
            .field("exchange_timeout", &self.exchange_timeout)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// Fields of a credential record to be created.
#[derive(Debug, Clone)]
pub struct NewCredentials {
    pub seller_id: SellerId,
    pub client_id: String,
    pub client_secret: Secret,
    pub consumer_id: Option<String>,
    pub private_key: Option<Secret>,
    pub channel_type: Option<String>,
    pub partner_id: Option<String>,
    pub refresh_token: Option<Secret>,
    pub grant_type: GrantType,
    pub country: Country,
}

impl NewCredentials {
    /// Client-credentials record for the US marketplace.
    pub fn new(
        seller_id: SellerId,
        client_id: impl Into<String>,
        client_secret: impl Into<Secret>,
    ) -> Self {
        Self {
            seller_id,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            consumer_id: None,
            private_key: None,
            channel_type: None,
            partner_id: None,
            refresh_token: None,
            grant_type: GrantType::default(),
            country: Country::default(),
        }
    }

    pub fn with_grant_type(mut self, grant_type: GrantType) -> Self {
        self.grant_type = grant_type;
        self
    }

    pub fn with_country(mut self, country: Country) -> Self {
        self.country = country;
        self
    }

    pub fn with_consumer_id(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = Some(consumer_id.into());
        self
    }

    pub fn with_private_key(mut self, private_key: impl Into<Secret>) -> Self {
        self.private_key = Some(private_key.into());
        self
    }

    pub fn with_channel_type(mut self, channel_type: impl Into<String>) -> Self {
        self.channel_type = Some(channel_type.into());
        self
    }

    pub fn with_partner_id(mut self, partner_id: impl Into<String>) -> Self {
        self.partner_id = Some(partner_id.into());
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<Secret>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

/// Patch of persisted fields.
///
/// `None` leaves a field unchanged. For optional fields an empty value clears
/// the field.
#[derive(Debug, Clone, Default)]
pub struct CredentialsUpdate {
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
    pub consumer_id: Option<String>,
    pub private_key: Option<Secret>,
    pub channel_type: Option<String>,
    pub partner_id: Option<String>,
    pub refresh_token: Option<Secret>,
    pub grant_type: Option<GrantType>,
    pub country: Option<Country>,
}

impl CredentialsUpdate {
    pub fn is_empty(&self) -> bool {
        self.client_id.is_none()
            && self.client_secret.is_none()
            && self.consumer_id.is_none()
            && self.private_key.is_none()
            && self.channel_type.is_none()
            && self.partner_id.is_none()
            && self.refresh_token.is_none()
            && self.grant_type.is_none()
            && self.country.is_none()
    }
}

/// Memory-only token state. Never persisted.
#[derive(Debug, Clone, Default)]
struct TokenState {
    access_token: Option<Secret>,
    token_type: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    fn live_token(&self, now: DateTime<Utc>) -> Option<&Secret> {
        let token = self.access_token.as_ref().filter(|t| !t.is_empty())?;
        match self.expires_at {
            Some(expires_at) if expires_at <= now => None,
            _ => Some(token),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn non_empty_secret(value: Option<Secret>) -> Option<Secret> {
    value.filter(|v| !v.is_empty())
}

/// A seller's credential record.
///
/// Persisted fields are only changed through [`update`](Self::update) (or
/// by the token exchange itself), so every change passes the invalidation in
/// [`save`](Self::save).
#[derive(Debug, Clone)]
pub struct Credentials {
    id: CredentialId,
    seller_id: SellerId,
    client_id: String,
    client_secret: Secret,
    consumer_id: Option<String>,
    private_key: Option<Secret>,
    channel_type: Option<String>,
    partner_id: Option<String>,
    refresh_token: Option<Secret>,
    grant_type: GrantType,
    country: Country,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    access_code: Option<Secret>,
    token: TokenState,
}

impl Credentials {
    /// Insert a new record into the store.
    pub async fn create(
        ctx: &CredentialContext,
        new: NewCredentials,
    ) -> Result<Self, MarketkeyError> {
        let now = Utc::now();
        let mut credentials = Self {
            id: CredentialId::new(0),
            seller_id: new.seller_id,
            client_id: new.client_id,
            client_secret: new.client_secret,
            consumer_id: non_empty(new.consumer_id),
            private_key: non_empty_secret(new.private_key),
            channel_type: non_empty(new.channel_type),
            partner_id: non_empty(new.partner_id),
            refresh_token: non_empty_secret(new.refresh_token),
            grant_type: new.grant_type,
            country: new.country,
            created_at: now,
            updated_at: now,
            access_code: None,
            token: TokenState::default(),
        };

        let row = credentials.to_row(ctx.codec())?;
        let inserted = ctx
            .store
            .insert_credentials(row)
            .await
            .map_err(MarketkeyError::Persistence)?;

        credentials.id = inserted.id;
        credentials.created_at = inserted.created_at;
        credentials.updated_at = inserted.updated_at;

        // Entries can outlive a store that was reset.
        ctx.forget_tokens(credentials.id).await?;

        info!(
            credentials = %credentials.id,
            seller = %credentials.seller_id,
            grant_type = %credentials.grant_type,
            country = %credentials.country,
            "created credentials"
        );
        Ok(credentials)
    }

    /// Load a record by id.
    pub async fn find(ctx: &CredentialContext, id: CredentialId) -> Result<Self, MarketkeyError> {
        let row = ctx
            .store
            .find_credentials(id)
            .await?
            .ok_or_else(|| StoreError::credentials_not_found(id))?;

        Ok(Self::from_row(row, ctx.codec())?)
    }

    /// Decode a stored row, decrypting its secrets.
    pub fn from_row(
        row: CredentialRow,
        codec: &dyn SecretCodec,
    ) -> Result<Self, codec::CodecError> {
        let client_secret = codec::decrypt_optional(codec, Some(&row.client_secret))?
            .unwrap_or_else(|| Secret::new(String::new()));

        Ok(Self {
            id: row.id,
            seller_id: row.seller_id,
            client_id: row.client_id,
            client_secret,
            consumer_id: non_empty(row.consumer_id),
            private_key: codec::decrypt_optional(codec, row.private_key.as_deref())?,
            channel_type: non_empty(row.channel_type),
            partner_id: non_empty(row.partner_id),
            refresh_token: codec::decrypt_optional(codec, row.refresh_token.as_deref())?,
            grant_type: row.grant_type,
            country: row.country,
            created_at: row.created_at,
            updated_at: row.updated_at,
            access_code: None,
            token: TokenState::default(),
        })
    }

    /// Encode this record for storage, encrypting its secrets.
    pub fn to_row(&self, codec: &dyn SecretCodec) -> Result<CredentialRow, codec::CodecError> {
        Ok(CredentialRow {
            id: self.id,
            seller_id: self.seller_id,
            client_id: self.client_id.clone(),
            client_secret: codec::encrypt_optional(codec, Some(&self.client_secret))?
                .unwrap_or_default(),
            consumer_id: self.consumer_id.clone(),
            private_key: codec::encrypt_optional(codec, self.private_key.as_ref())?,
            channel_type: self.channel_type.clone(),
            partner_id: self.partner_id.clone(),
            refresh_token: codec::encrypt_optional(codec, self.refresh_token.as_ref())?,
            grant_type: self.grant_type,
            country: self.country,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn id(&self) -> CredentialId {
        self.id
    }

    pub fn seller_id(&self) -> SellerId {
        self.seller_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &Secret {
        &self.client_secret
    }

    pub fn consumer_id(&self) -> Option<&str> {
        self.consumer_id.as_deref()
    }

    pub fn private_key(&self) -> Option<&Secret> {
        self.private_key.as_ref()
    }

    pub fn channel_type(&self) -> Option<&str> {
        self.channel_type.as_deref()
    }

    pub fn partner_id(&self) -> Option<&str> {
        self.partner_id.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&Secret> {
        self.refresh_token.as_ref()
    }

    pub fn grant_type(&self) -> GrantType {
        self.grant_type
    }

    pub fn country(&self) -> Country {
        self.country
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Token type of the last exchange (usually `Bearer`), if known in memory.
    pub fn token_type(&self) -> Option<&str> {
        self.token.token_type.as_deref()
    }

    /// `true` if a live access token is held in memory.
    pub fn has_access_token(&self) -> bool {
        self.token.live_token(Utc::now()).is_some()
    }

    pub fn access_token_cache_key(&self, ctx: &CredentialContext) -> String {
        ctx.access_token_cache_key(self.id)
    }

    pub fn expires_at_cache_key(&self, ctx: &CredentialContext) -> String {
        ctx.expires_at_cache_key(self.id)
    }

    /// Set the one-time authorization code for an `authorization_code` exchange.
    ///
    /// The code lives in memory only and is consumed by the next successful
    /// exchange.
    pub fn set_access_code(&mut self, code: impl Into<Secret>) -> &mut Self {
        self.access_code = non_empty_secret(Some(code.into()));
        self
    }

    /// Load the seller that owns this record.
    pub async fn seller(&self, ctx: &CredentialContext) -> Result<Seller, MarketkeyError> {
        Ok(ctx
            .store
            .find_seller(self.seller_id)
            .await?
            .ok_or_else(|| StoreError::seller_not_found(self.seller_id))?)
    }

    /// Clear the in-memory token without touching the cache.
    pub fn clear_access_token(&mut self) -> &mut Self {
        self.token = TokenState::default();
        self
    }

    /// Forget the cached token and clear the in-memory one.
    ///
    /// Persisted fields are left untouched; the next
    /// [`access_token`](Self::access_token) call performs a fresh exchange.
    pub async fn invalidate(&mut self, ctx: &CredentialContext) -> Result<&mut Self, MarketkeyError> {
        ctx.forget_tokens(self.id).await?;
        self.clear_access_token();
        debug!(credentials = %self.id, "invalidated access token");
        Ok(self)
    }

    /// Persist the current field values.
    ///
    /// Token state is invalidated before the write, never after, so a token
    /// acquired concurrently with the write cannot be discarded by it. A copy
    /// older than the stored row is rejected with [`StoreError::Conflict`].
    pub async fn save(&mut self, ctx: &CredentialContext) -> Result<&mut Self, MarketkeyError> {
        self.invalidate(ctx).await?;

        let row = self.to_row(ctx.codec())?;
        let saved = ctx
            .store
            .save_credentials(row)
            .await
            .map_err(MarketkeyError::Persistence)?;

        self.updated_at = saved.updated_at;
        Ok(self)
    }

    /// Apply a patch of persisted fields and save.
    ///
    /// If the write fails the in-memory fields are restored to their previous
    /// values.
    pub async fn update(
        &mut self,
        ctx: &CredentialContext,
        update: CredentialsUpdate,
    ) -> Result<&mut Self, MarketkeyError> {
        // Writers of one record are serialized with its token exchange, and the
        // patch is applied on top of the latest stored row.
        let guard = ctx.exchange_guard(self.id);
        let _writer = guard.lock().await;
        self.reload_persisted(ctx).await?;

        let before = self.clone();

        if let Some(client_id) = update.client_id {
            self.client_id = client_id;
        }
        if let Some(client_secret) = update.client_secret {
            self.client_secret = client_secret;
        }
        if let Some(consumer_id) = update.consumer_id {
            self.consumer_id = non_empty(Some(consumer_id));
        }
        if let Some(private_key) = update.private_key {
            self.private_key = non_empty_secret(Some(private_key));
        }
        if let Some(channel_type) = update.channel_type {
            self.channel_type = non_empty(Some(channel_type));
        }
        if let Some(partner_id) = update.partner_id {
            self.partner_id = non_empty(Some(partner_id));
        }
        if let Some(refresh_token) = update.refresh_token {
            self.refresh_token = non_empty_secret(Some(refresh_token));
        }
        if let Some(grant_type) = update.grant_type {
            self.grant_type = grant_type;
        }
        if let Some(country) = update.country {
            self.country = country;
        }

        if let Err(e) = self.save(ctx).await.map(|_| ()) {
            self.assign_persisted(&before);
            return Err(e);
        }

        info!(credentials = %self.id, "updated credentials");
        Ok(self)
    }

    /// Delete this record and forget its cached token.
    pub async fn delete(mut self, ctx: &CredentialContext) -> Result<(), MarketkeyError> {
        self.invalidate(ctx).await?;
        ctx.store
            .delete_credentials(self.id)
            .await
            .map_err(MarketkeyError::Persistence)?;
        ctx.exchange_guards.lock().remove(&self.id);

        info!(credentials = %self.id, "deleted credentials");
        Ok(())
    }

    /// Copy the persisted fields of `other`, keeping token state and access code.
    fn assign_persisted(&mut self, other: &Credentials) {
        self.client_id = other.client_id.clone();
        self.client_secret = other.client_secret.clone();
        self.consumer_id = other.consumer_id.clone();
        self.private_key = other.private_key.clone();
        self.channel_type = other.channel_type.clone();
        self.partner_id = other.partner_id.clone();
        self.refresh_token = other.refresh_token.clone();
        self.grant_type = other.grant_type;
        self.country = other.country;
        self.updated_at = other.updated_at;
    }

    /// Replace the persisted fields with the stored row.
    ///
    /// Another copy of this record may have rotated the refresh token since
    /// this one was loaded.
    async fn reload_persisted(&mut self, ctx: &CredentialContext) -> Result<(), MarketkeyError> {
        let row = ctx
            .store
            .find_credentials(self.id)
            .await?
            .ok_or_else(|| StoreError::credentials_not_found(self.id))?;
        let latest = Self::from_row(row, ctx.codec())?;

        if latest.updated_at != self.updated_at {
            debug!(credentials = %self.id, "reloaded changed credentials");
        }
        self.assign_persisted(&latest);
        Ok(())
    }

    /// Resolve a valid access token: memory, then cache, then a live exchange.
    pub async fn access_token(&mut self, ctx: &CredentialContext) -> Result<Secret, MarketkeyError> {
        if let Some(token) = self.token.live_token(Utc::now()) {
            return Ok(token.clone());
        }

        if let Some(token) = self.adopt_cached_token(ctx).await? {
            debug!(credentials = %self.id, "using cached access token");
            return Ok(token);
        }

        let guard = ctx.exchange_guard(self.id);
        let _singleflight = guard.lock().await;
        self.reload_persisted(ctx).await?;

        // Another caller may have completed an exchange while we waited.
        if let Some(token) = self.adopt_cached_token(ctx).await? {
            debug!(credentials = %self.id, "using access token from concurrent exchange");
            return Ok(token);
        }

        self.exchange_token(ctx).await
    }

    /// Resolve the expiry of the access token: memory, then cache, then a
    /// live exchange.
    pub async fn expires_at(
        &mut self,
        ctx: &CredentialContext,
    ) -> Result<DateTime<Utc>, MarketkeyError> {
        if let Some(expires_at) = self.token.expires_at {
            return Ok(expires_at);
        }

        if let Some(raw) = ctx.cache.get(&ctx.expires_at_cache_key(self.id)).await? {
            if let Some(expires_at) = parse_expiry(&raw) {
                self.token.expires_at = Some(expires_at);
                return Ok(expires_at);
            }
        }

        self.access_token(ctx).await?;
        self.token.expires_at.ok_or_else(|| MarketkeyError::Internal {
            message: format!("no expiry recorded for credentials {}", self.id),
        })
    }

    /// Build the signed-request configuration for this record.
    ///
    /// With `dummy`, token resolution is skipped and the configuration refuses
    /// to sign.
    pub async fn to_api_configuration(
        &mut self,
        ctx: &CredentialContext,
        dummy: bool,
    ) -> Result<ApiConfiguration, MarketkeyError> {
        let access_token = if dummy {
            None
        } else {
            let token = self.access_token(ctx).await?;
            let expires_at = self.expires_at(ctx).await?;
            Some(AccessToken::new(token, expires_at))
        };

        let config = ApiConfiguration::new(
            dummy,
            ConfigurationOptions {
                client_id: self.client_id.clone(),
                client_secret: Some(self.client_secret.clone()),
                consumer_id: self.consumer_id.clone(),
                private_key: self.private_key.clone(),
                channel_type: self.channel_type.clone(),
                partner_id: self.partner_id.clone(),
                access_token,
                country: self.country,
            },
        );

        Ok(config.with_debug(ctx.debug))
    }

    /// Adopt the cached token into memory if both cache entries are live.
    async fn adopt_cached_token(
        &mut self,
        ctx: &CredentialContext,
    ) -> Result<Option<Secret>, MarketkeyError> {
        let Some(ciphertext) = ctx.cache.get(&ctx.access_token_cache_key(self.id)).await? else {
            return Ok(None);
        };
        let Some(raw_expiry) = ctx.cache.get(&ctx.expires_at_cache_key(self.id)).await? else {
            debug!(credentials = %self.id, "cached access token has no expiry, ignoring");
            return Ok(None);
        };

        let Some(expires_at) = parse_expiry(&raw_expiry).filter(|e| *e > Utc::now()) else {
            return Ok(None);
        };

        let token = match ctx.codec.decrypt(&ciphertext) {
            Ok(token) if !token.is_empty() => Secret::new(token),
            Ok(_) => return Ok(None),
            Err(e) => {
                warn!(credentials = %self.id, error = %e, "discarding undecodable cached token");
                return Ok(None);
            }
        };

        self.token.access_token = Some(token.clone());
        self.token.expires_at = Some(expires_at);
        Ok(Some(token))
    }

    /// Perform a live exchange and record its result.
    ///
    /// Nothing is written unless the exchange succeeds. If persisting the new
    /// refresh token fails, the previous field values are restored and nothing
    /// is cached. The exchange and the persist share one deadline.
    async fn exchange_token(&mut self, ctx: &CredentialContext) -> Result<Secret, MarketkeyError> {
        let deadline = tokio::time::Instant::now() + ctx.exchange_timeout;
        let config = ApiConfiguration::for_token_exchange(
            self.client_id.clone(),
            self.client_secret.clone(),
            self.country,
        );
        let request = TokenRequest {
            grant_type: self.grant_type,
            access_code: self.access_code.clone(),
            redirect_url: ctx.redirect_url.clone(),
            refresh_token: self.refresh_token.clone(),
        };

        info!(
            credentials = %self.id,
            grant_type = %self.grant_type,
            country = %self.country,
            "requesting access token"
        );

        let response =
            match tokio::time::timeout_at(deadline, ctx.exchange.exchange(&config, &request)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(credentials = %self.id, error = %e, "token exchange failed");
                    return Err(e.into());
                }
                Err(_) => {
                    warn!(credentials = %self.id, "token exchange timed out");
                    return Err(ExchangeError::Timeout {
                        after: ctx.exchange_timeout,
                    }
                    .into());
                }
            };

        let before = self.clone();
        if let Some(refresh_token) = non_empty_secret(response.refresh_token) {
            self.refresh_token = Some(refresh_token);
        }

        // Persisting invalidates the token state, so it has to happen before
        // the new token is recorded.
        let persisted = tokio::time::timeout_at(deadline, self.save(ctx))
            .await
            .map(|saved| saved.map(|_| ()));
        match persisted {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.assign_persisted(&before);
                return Err(e);
            }
            Err(_) => {
                warn!(credentials = %self.id, "persisting refresh token timed out");
                self.assign_persisted(&before);
                return Err(MarketkeyError::Persistence(StoreError::Timeout {
                    after: ctx.exchange_timeout,
                }));
            }
        }
        self.access_code = None;

        let expires_at = Utc::now() + chrono::Duration::seconds(response.expires_in.max(0));
        let token = response.access_token;
        self.token = TokenState {
            access_token: Some(token.clone()),
            token_type: Some(response.token_type),
            expires_at: Some(expires_at),
        };

        let ciphertext = ctx.codec.encrypt(token.expose())?;
        ctx.cache
            .put(&ctx.access_token_cache_key(self.id), &ciphertext, expires_at)
            .await?;
        ctx.cache
            .put(
                &ctx.expires_at_cache_key(self.id),
                &expires_at.to_rfc3339(),
                expires_at,
            )
            .await?;

        info!(credentials = %self.id, %expires_at, "acquired access token");
        Ok(token)
    }
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}
