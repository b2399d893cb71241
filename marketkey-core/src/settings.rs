//! Process settings.
//!
//! Settings are read from `config.toml` in the platform configuration
//! directory (see [`Settings::default_path`]) and then overridden from the
//! environment:
//!
//! | variable                    | setting                                          |
//! |-----------------------------|--------------------------------------------------|
//! | `WALMART_API_SELLER_NAME`   | `seller.name`                                    |
//! | `WALMART_API_CLIENT_ID`     | `credentials.client_id`, `credentials.consumer_id` |
//! | `WALMART_API_CLIENT_SECRET` | `credentials.client_secret`, `credentials.private_key` |
//! | `WALMART_API_CHANNEL_TYPE`  | `credentials.channel_type`                       |
//! | `WALMART_API_PARTNER_ID`    | `credentials.partner_id`                         |
//! | `WALMART_API_AUTH_MODE`     | `credentials.grant_type`                         |
//! | `WALMART_API_COUNTRY`       | `credentials.country`                            |
//! | `WALMART_API_REDIRECT_URL`  | `redirect_url`                                   |
//! | `WALMART_API_DEBUG`         | `debug`                                          |
//! | `MARKETKEY_ENCRYPTION_KEY`  | `encryption_key`                                 |

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::codec::{AesGcmCodec, CodecError};
use crate::config::API_BASE_URL;
use crate::credentials::{DEFAULT_CACHE_NAMESPACE, DEFAULT_EXCHANGE_TIMEOUT, NewCredentials};
use crate::model::{Country, GrantType, SellerId};
use crate::store::Secret;

pub const ENV_SELLER_NAME: &str = "WALMART_API_SELLER_NAME";
pub const ENV_CLIENT_ID: &str = "WALMART_API_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "WALMART_API_CLIENT_SECRET";
pub const ENV_CHANNEL_TYPE: &str = "WALMART_API_CHANNEL_TYPE";
pub const ENV_PARTNER_ID: &str = "WALMART_API_PARTNER_ID";
pub const ENV_AUTH_MODE: &str = "WALMART_API_AUTH_MODE";
pub const ENV_COUNTRY: &str = "WALMART_API_COUNTRY";
pub const ENV_REDIRECT_URL: &str = "WALMART_API_REDIRECT_URL";
pub const ENV_DEBUG: &str = "WALMART_API_DEBUG";
pub const ENV_ENCRYPTION_KEY: &str = "MARKETKEY_ENCRYPTION_KEY";

/// Error type for settings operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {message}")]
    Parse { message: String },

    /// An environment variable or setting holds an unusable value.
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("no encryption key configured (set {ENV_ENCRYPTION_KEY} or encryption_key)")]
    MissingEncryptionKey,

    #[error("invalid encryption key: {0}")]
    InvalidEncryptionKey(#[source] CodecError),

    #[error("could not determine platform directories")]
    DirectoriesUnavailable,
}

/// Default seller created by `init`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SellerDefaults {
    pub name: Option<String>,
}

/// Default credential record created by `init`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialDefaults {
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
    pub consumer_id: Option<String>,
    pub private_key: Option<Secret>,
    pub channel_type: Option<String>,
    pub partner_id: Option<String>,
    pub grant_type: GrantType,
    pub country: Country,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Prefix of the token cache keys.
    pub cache_namespace: String,

    /// Redirect URL sent with `authorization_code` exchanges.
    pub redirect_url: Option<String>,

    pub debug: bool,

    /// Base URL of the vendor token endpoint.
    pub token_base_url: String,

    pub exchange_timeout_secs: u64,

    /// Base64 encoded 32-byte key for the secret codec.
    pub encryption_key: Option<Secret>,

    /// Directory holding the record store; the platform data directory when unset.
    pub data_dir: Option<PathBuf>,

    pub seller: SellerDefaults,

    pub credentials: CredentialDefaults,

    /// File the settings were loaded from, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            redirect_url: None,
            debug: false,
            token_base_url: API_BASE_URL.to_string(),
            exchange_timeout_secs: DEFAULT_EXCHANGE_TIMEOUT.as_secs(),
            encryption_key: None,
            data_dir: None,
            seller: SellerDefaults::default(),
            credentials: CredentialDefaults::default(),
            config_path: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "marketkey", "marketkey")
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl Settings {
    /// `config.toml` in the platform configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|d| d.config_dir().join("config.toml"))
    }

    /// Load from the default location (if present) and apply the process
    /// environment.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_path(path)?,
            _ => Self::default(),
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Load from a TOML file without applying the environment.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings = Self::from_toml_str(&contents)?;
        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, SettingsError> {
        toml::from_str(contents).map_err(|e| SettingsError::Parse {
            message: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(|e| SettingsError::Parse {
            message: e.to_string(),
        })
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Unset variables leave the setting unchanged.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_SELLER_NAME) {
            self.seller.name = Some(name);
        }
        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.credentials.consumer_id = Some(client_id.clone());
            self.credentials.client_id = Some(client_id);
        }
        if let Some(client_secret) = lookup(ENV_CLIENT_SECRET) {
            self.credentials.private_key = Some(Secret::new(client_secret.clone()));
            self.credentials.client_secret = Some(Secret::new(client_secret));
        }
        if let Some(channel_type) = lookup(ENV_CHANNEL_TYPE) {
            self.credentials.channel_type = Some(channel_type);
        }
        if let Some(partner_id) = lookup(ENV_PARTNER_ID) {
            self.credentials.partner_id = Some(partner_id);
        }
        if let Some(mode) = lookup(ENV_AUTH_MODE) {
            self.credentials.grant_type =
                mode.parse().map_err(|_| SettingsError::InvalidValue {
                    key: ENV_AUTH_MODE.to_string(),
                    value: mode.clone(),
                })?;
        }
        if let Some(country) = lookup(ENV_COUNTRY) {
            self.credentials.country =
                country.parse().map_err(|_| SettingsError::InvalidValue {
                    key: ENV_COUNTRY.to_string(),
                    value: country.clone(),
                })?;
        }
        if let Some(redirect_url) = lookup(ENV_REDIRECT_URL) {
            self.redirect_url = Some(redirect_url).filter(|url| !url.is_empty());
        }
        if let Some(debug) = lookup(ENV_DEBUG) {
            self.debug = parse_bool(ENV_DEBUG, &debug)?;
        }
        if let Some(key) = lookup(ENV_ENCRYPTION_KEY) {
            self.encryption_key = Some(Secret::new(key));
        }

        Ok(())
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    /// Build the secret codec from the configured key.
    pub fn codec(&self) -> Result<AesGcmCodec, SettingsError> {
        let key = self
            .encryption_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .ok_or(SettingsError::MissingEncryptionKey)?;

        AesGcmCodec::from_base64(key.expose()).map_err(SettingsError::InvalidEncryptionKey)
    }

    /// Path of the record store file.
    pub fn records_path(&self) -> Result<PathBuf, SettingsError> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => project_dirs()
                .map(|d| d.data_dir().to_path_buf())
                .ok_or(SettingsError::DirectoriesUnavailable)?,
        };
        Ok(dir.join("records.json"))
    }

    /// The default credential record for `seller_id`, if a client id and
    /// secret are configured.
    pub fn default_credentials(&self, seller_id: SellerId) -> Option<NewCredentials> {
        let defaults = &self.credentials;
        let client_id = defaults.client_id.clone().filter(|id| !id.is_empty())?;
        let client_secret = defaults.client_secret.clone().filter(|s| !s.is_empty())?;

        Some(NewCredentials {
            seller_id,
            client_id,
            client_secret,
            consumer_id: defaults.consumer_id.clone(),
            private_key: defaults.private_key.clone(),
            channel_type: defaults.channel_type.clone(),
            partner_id: defaults.partner_id.clone(),
            refresh_token: None,
            grant_type: defaults.grant_type,
            country: defaults.country,
        })
    }
}
