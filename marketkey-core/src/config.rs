//! Per-request API configuration and request signing.
//!
//! An [`ApiConfiguration`] is what a capability client needs to make one
//! authenticated call: the identity fields of a credential record, the current
//! access token and a [`sign`](ApiConfiguration::sign) capability. It is
//! rebuilt from a [`Credentials`](crate::credentials::Credentials) value on
//! every use and never persisted.
//!
//! A configuration built in *dummy* mode refuses to sign. Placeholder clients
//! registered before real credentials are attached therefore fail loudly
//! instead of making an unauthenticated or misattributed call.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::model::Country;
use crate::store::Secret;

/// Base URL of the marketplace APIs: the signed URL prefix and the default
/// token endpoint host.
pub const API_BASE_URL: &str = "https://marketplace.walmartapis.com";

/// Value used for every field of a placeholder configuration.
pub const PLACEHOLDER: &str = "DUMMY";

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A dummy configuration was asked to sign a request.
    #[error("cannot sign a request with invalid credentials")]
    DummySign,

    /// Neither a private key nor a client secret is configured.
    #[error("no private key or client secret to sign with")]
    MissingSigningKey,

    /// The signing key is not an RSA private key in PKCS#8 form.
    #[error("invalid signing key: {message}")]
    InvalidSigningKey { message: String },

    #[error("signing failed: {message}")]
    Signing { message: String },
}

/// Access token attached to a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: Secret,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<Secret>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Field values for building an [`ApiConfiguration`].
///
/// Empty strings are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationOptions {
    pub client_id: String,
    pub client_secret: Option<Secret>,
    pub consumer_id: Option<String>,
    pub private_key: Option<Secret>,
    pub channel_type: Option<String>,
    pub partner_id: Option<String>,
    pub access_token: Option<AccessToken>,
    pub country: Country,
}

/// Signed-request configuration for a capability client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfiguration {
    client_id: String,
    client_secret: Option<Secret>,
    consumer_id: Option<String>,
    private_key: Option<Secret>,
    channel_type: Option<String>,
    partner_id: Option<String>,
    access_token: Option<AccessToken>,
    country: Country,
    dummy: bool,
    debug: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn non_empty_secret(value: Option<Secret>) -> Option<Secret> {
    value.filter(|v| !v.is_empty())
}

impl ApiConfiguration {
    pub fn new(dummy: bool, options: ConfigurationOptions) -> Self {
        Self {
            client_id: options.client_id,
            client_secret: non_empty_secret(options.client_secret),
            consumer_id: non_empty(options.consumer_id),
            private_key: non_empty_secret(options.private_key),
            channel_type: non_empty(options.channel_type),
            partner_id: non_empty(options.partner_id),
            access_token: options.access_token,
            country: options.country,
            dummy,
            debug: false,
        }
    }

    /// Minimal unsigned configuration used to call the token endpoint.
    pub fn for_token_exchange(
        client_id: impl Into<String>,
        client_secret: Secret,
        country: Country,
    ) -> Self {
        Self::new(
            false,
            ConfigurationOptions {
                client_id: client_id.into(),
                client_secret: Some(client_secret),
                country,
                ..Default::default()
            },
        )
    }

    /// Placeholder configuration for pre-registered clients.
    ///
    /// Every identity field is [`PLACEHOLDER`], the token is already expired
    /// and signing always fails with [`ConfigError::DummySign`].
    pub fn placeholder(country: Country) -> Self {
        Self::new(
            true,
            ConfigurationOptions {
                client_id: PLACEHOLDER.to_string(),
                client_secret: Some(Secret::new(PLACEHOLDER)),
                consumer_id: Some(PLACEHOLDER.to_string()),
                private_key: Some(Secret::new(PLACEHOLDER)),
                channel_type: Some(PLACEHOLDER.to_string()),
                partner_id: Some(PLACEHOLDER.to_string()),
                access_token: Some(AccessToken::new(PLACEHOLDER, Utc::now())),
                country,
            },
        )
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> Option<&Secret> {
        self.client_secret.as_ref()
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

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    pub fn country(&self) -> Country {
        self.country
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// `true` if there is no token or it has passed its expiry.
    pub fn access_token_is_expired(&self) -> bool {
        self.access_token
            .as_ref()
            .map(AccessToken::is_expired)
            .unwrap_or(true)
    }

    /// Sign a request.
    ///
    /// The signature is a base64 RSA PKCS#1 v1.5 SHA-256 signature over
    /// `consumer_id\nurl\nMETHOD\ntimestamp\n`, where `url` is the full
    /// endpoint URL including the query string, if any. The key is the private
    /// key (or the client secret when no private key is set) as base64 PKCS#8
    /// DER, the format the vendor portal hands out; PEM is accepted too.
    pub fn sign(
        &self,
        path: &str,
        method: &str,
        timestamp_millis: i64,
        query: &str,
    ) -> Result<String, ConfigError> {
        if self.dummy {
            tracing::warn!(path, "refusing to sign request with placeholder configuration");
            return Err(ConfigError::DummySign);
        }

        let key = self
            .private_key
            .as_ref()
            .or(self.client_secret.as_ref())
            .ok_or(ConfigError::MissingSigningKey)?;

        let consumer_id = self.consumer_id.as_deref().unwrap_or(&self.client_id);
        let mut url = format!("{}{}", API_BASE_URL, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query.trim_start_matches('?'));
        }

        let payload = format!(
            "{}\n{}\n{}\n{}\n",
            consumer_id,
            url,
            method.to_ascii_uppercase(),
            timestamp_millis
        );

        let signature = signing_key(key)?
            .try_sign(payload.as_bytes())
            .map_err(|e| ConfigError::Signing {
                message: e.to_string(),
            })?;
        let signature = BASE64.encode(signature.to_bytes());

        if self.debug {
            tracing::debug!(%url, method, timestamp_millis, "signed request");
        }

        Ok(signature)
    }

    /// Vendor authentication headers for one request.
    ///
    /// The access token header is present when a token is attached; the
    /// signature headers only when a consumer id is configured.
    pub fn auth_headers(
        &self,
        path: &str,
        method: &str,
        query: &str,
    ) -> Result<Vec<(&'static str, String)>, ConfigError> {
        if self.dummy {
            return Err(ConfigError::DummySign);
        }

        let mut headers = vec![
            ("WM_SVC.NAME", "Walmart Marketplace".to_string()),
            ("WM_QOS.CORRELATION_ID", uuid::Uuid::new_v4().to_string()),
        ];

        if let Some(token) = &self.access_token {
            headers.push(("WM_SEC.ACCESS_TOKEN", token.token.expose().to_string()));
        }

        if let Some(consumer_id) = &self.consumer_id {
            let timestamp = Utc::now().timestamp_millis();
            let signature = self.sign(path, method, timestamp, query)?;
            headers.push(("WM_CONSUMER.ID", consumer_id.clone()));
            headers.push(("WM_SEC.TIMESTAMP", timestamp.to_string()));
            headers.push(("WM_SEC.AUTH_SIGNATURE", signature));
        }

        if let Some(channel_type) = &self.channel_type {
            headers.push(("WM_CONSUMER.CHANNEL.TYPE", channel_type.clone()));
        }

        if let Some(partner_id) = &self.partner_id {
            headers.push(("WM_PARTNER.ID", partner_id.clone()));
        }

        Ok(headers)
    }

    /// Copy every field of `self` onto `target`.
    ///
    /// Used to re-point an already constructed client at fresh credentials.
    pub fn apply_to(&self, target: &mut ApiConfiguration) {
        target.client_id = self.client_id.clone();
        target.client_secret = self.client_secret.clone();
        target.consumer_id = self.consumer_id.clone();
        target.private_key = self.private_key.clone();
        target.channel_type = self.channel_type.clone();
        target.partner_id = self.partner_id.clone();
        target.access_token = self.access_token.clone();
        target.country = self.country;
        target.dummy = self.dummy;
        target.debug = self.debug;
    }
}

fn signing_key(key: &Secret) -> Result<SigningKey<Sha256>, ConfigError> {
    let raw = key.expose().trim();
    let invalid = |message: String| ConfigError::InvalidSigningKey { message };

    let private_key = if raw.starts_with("-----BEGIN") {
        RsaPrivateKey::from_pkcs8_pem(raw).map_err(|e| invalid(e.to_string()))?
    } else {
        let compact: Zeroizing<String> = Zeroizing::new(raw.split_whitespace().collect());
        let der = Zeroizing::new(
            BASE64
                .decode(compact.as_bytes())
                .map_err(|e| invalid(format!("not base64: {}", e)))?,
        );
        RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| invalid(e.to_string()))?
    };

    Ok(SigningKey::<Sha256>::new(private_key))
}
