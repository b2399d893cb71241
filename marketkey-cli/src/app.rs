//! Wiring of the core services for one CLI invocation.

use anyhow::{Context, Result};
use marketkey_core::{
    CredentialContext, CredentialRegistry, FileRecordStore, HttpTokenExchange, MemoryCache,
    Settings,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Services shared by every command.
pub struct App {
    pub settings: Settings,
    pub registry: CredentialRegistry,
}

impl App {
    /// Build the services described by `settings`.
    ///
    /// Tokens are cached in memory only, so every invocation that needs a
    /// token performs its own exchange.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let records_path = settings.records_path()?;
        let store = FileRecordStore::load_from_path(&records_path)
            .with_context(|| format!("Failed to open record store at {:?}", records_path))?;
        let codec = settings.codec().context("Failed to set up secret encryption")?;
        let exchange = HttpTokenExchange::with_base_url(&settings.token_base_url)
            .context("Invalid token endpoint")?;

        debug!(
            records = %records_path.display(),
            token_url = %exchange.token_url(),
            "initialised services"
        );

        let ctx = CredentialContext::new(
            Arc::new(store),
            Arc::new(MemoryCache::new()),
            Arc::new(codec),
            Arc::new(exchange),
        )
        .with_settings(&settings);

        Ok(Self {
            settings,
            registry: CredentialRegistry::new(Arc::new(ctx))?,
        })
    }

    pub fn ctx(&self) -> &CredentialContext {
        self.registry.context()
    }
}

/// Load settings from `config` (or the default location) and the environment.
pub fn load_settings(config: Option<&Path>, data_dir: Option<&Path>) -> Result<Settings> {
    let mut settings = match config {
        Some(path) => {
            let mut settings = Settings::load_from_path(path)
                .with_context(|| format!("Failed to load settings from {:?}", path))?;
            settings.apply_env(|key| std::env::var(key).ok())?;
            settings
        }
        None => Settings::load().context("Failed to load settings")?,
    };

    if let Some(dir) = data_dir {
        settings.data_dir = Some(dir.to_path_buf());
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketkey_core::AesGcmCodec;
    use marketkey_core::Secret;
    use tempfile::TempDir;

    #[test]
    fn test_requires_encryption_key() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.data_dir = Some(temp_dir.path().to_path_buf());

        assert!(App::from_settings(settings).is_err());
    }

    #[test]
    fn test_builds_from_settings() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.data_dir = Some(temp_dir.path().to_path_buf());
        settings.encryption_key = Some(Secret::new(AesGcmCodec::generate_key()));
        settings.cache_namespace = "cli-test".to_string();

        let app = App::from_settings(settings).unwrap();
        assert_eq!(app.ctx().namespace(), "cli-test");
    }

    #[test]
    fn test_load_settings_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "cache_namespace = \"from-file\"\n").unwrap();

        let settings = load_settings(Some(&path), Some(temp_dir.path())).unwrap();
        assert_eq!(settings.cache_namespace, "from-file");
        assert_eq!(settings.data_dir.as_deref(), Some(temp_dir.path()));
    }
}
