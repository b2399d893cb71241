//! Command implementations.
//!
//! Every command writes its result to `out` so it can be captured in tests.

use anyhow::{Context, Result, bail};
use clap::Args;
use marketkey_core::registry::API_CLASSES;
use marketkey_core::{
    AesGcmCodec, Country, CredentialId, Credentials, CredentialsUpdate, GrantType, NewCredentials,
    ProviderKind, RecordStore, Secret, SellerId,
};
use serde_json::json;
use std::io::Write;
use tracing::info;

use crate::app::App;

/// Output format for commands that print records or tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Optional credential fields shared by `credentials add` and `credentials update`.
#[derive(Debug, Clone, Default, Args)]
pub struct CredentialFields {
    /// Consumer ID used in request signatures
    #[arg(long)]
    pub consumer_id: Option<String>,

    /// Private key used to sign requests
    #[arg(long)]
    pub private_key: Option<String>,

    /// Channel type (required for Canada)
    #[arg(long)]
    pub channel_type: Option<String>,

    /// Partner ID (required for the supplier APIs)
    #[arg(long)]
    pub partner_id: Option<String>,

    /// Refresh token for the refresh_token grant
    #[arg(long)]
    pub refresh_token: Option<String>,

    /// Grant type: authorization_code, refresh_token or client_credentials
    #[arg(long)]
    pub grant_type: Option<GrantType>,

    /// Country: us, ca or mx
    #[arg(long)]
    pub country: Option<Country>,
}

fn redacted(secret: Option<&Secret>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "[REDACTED]",
        _ => "-",
    }
}

/// Create the default seller and credentials from the settings.
pub async fn init(app: &App, out: &mut impl Write) -> Result<()> {
    let seller = app
        .ctx()
        .create_seller(app.settings.seller.name.clone())
        .await?;

    let Some(new) = app.settings.default_credentials(seller.id) else {
        app.ctx().delete_seller(seller.id).await?;
        bail!("No default credentials configured; set WALMART_API_CLIENT_ID and WALMART_API_CLIENT_SECRET");
    };

    let credentials = Credentials::create(app.ctx(), new).await?;
    info!(seller = %seller.id, credentials = %credentials.id(), "initialised");

    writeln!(out, "Created seller {}", seller.id)?;
    writeln!(out, "Created credentials {}", credentials.id())?;
    Ok(())
}

pub fn keygen(out: &mut impl Write) -> Result<()> {
    writeln!(out, "{}", AesGcmCodec::generate_key())?;
    Ok(())
}

pub async fn add_seller(app: &App, name: Option<String>, out: &mut impl Write) -> Result<()> {
    let seller = app.ctx().create_seller(name).await?;
    writeln!(out, "Created seller {}", seller.id)?;
    Ok(())
}

pub async fn list_sellers(app: &App, format: OutputFormat, out: &mut impl Write) -> Result<()> {
    let sellers = app.ctx().store().list_sellers().await?;

    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(&sellers)?)?;
        }
        OutputFormat::Text => {
            if sellers.is_empty() {
                writeln!(out, "No sellers configured")?;
            }
            for seller in sellers {
                let count = app.ctx().store().list_credentials(seller.id).await?.len();
                writeln!(
                    out,
                    "{}\t{}\t{} credential(s)",
                    seller.id,
                    seller.name.as_deref().unwrap_or("-"),
                    count
                )?;
            }
        }
    }
    Ok(())
}

pub async fn remove_seller(app: &App, id: u64, out: &mut impl Write) -> Result<()> {
    let deleted = app
        .ctx()
        .delete_seller(SellerId::new(id))
        .await
        .with_context(|| format!("Failed to remove seller {}", id))?;

    writeln!(
        out,
        "Removed seller {} and {} credential record(s)",
        id,
        deleted.len()
    )?;
    Ok(())
}

pub async fn add_credentials(
    app: &App,
    seller: u64,
    client_id: String,
    client_secret: String,
    fields: CredentialFields,
    out: &mut impl Write,
) -> Result<()> {
    let mut new = NewCredentials::new(SellerId::new(seller), client_id, client_secret);
    new.consumer_id = fields.consumer_id;
    new.private_key = fields.private_key.map(Secret::new);
    new.channel_type = fields.channel_type;
    new.partner_id = fields.partner_id;
    new.refresh_token = fields.refresh_token.map(Secret::new);
    new.grant_type = fields.grant_type.unwrap_or_default();
    new.country = fields.country.unwrap_or_default();

    let credentials = Credentials::create(app.ctx(), new)
        .await
        .with_context(|| format!("Failed to add credentials for seller {}", seller))?;

    writeln!(out, "Created credentials {}", credentials.id())?;
    Ok(())
}

pub async fn show_credentials(
    app: &App,
    id: u64,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let credentials = app
        .registry
        .resolve_credential(CredentialId::new(id))
        .await?;

    match format {
        OutputFormat::Json => {
            let value = json!({
                "id": credentials.id(),
                "seller_id": credentials.seller_id(),
                "client_id": credentials.client_id(),
                "client_secret": redacted(Some(credentials.client_secret())),
                "consumer_id": credentials.consumer_id(),
                "private_key": redacted(credentials.private_key()),
                "channel_type": credentials.channel_type(),
                "partner_id": credentials.partner_id(),
                "refresh_token": redacted(credentials.refresh_token()),
                "grant_type": credentials.grant_type(),
                "country": credentials.country(),
                "created_at": credentials.created_at().to_rfc3339(),
                "updated_at": credentials.updated_at().to_rfc3339(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        }
        OutputFormat::Text => {
            writeln!(out, "Credentials {}", credentials.id())?;
            writeln!(out, "  Seller:        {}", credentials.seller_id())?;
            writeln!(out, "  Client ID:     {}", credentials.client_id())?;
            writeln!(out, "  Client secret: {}", redacted(Some(credentials.client_secret())))?;
            writeln!(out, "  Consumer ID:   {}", credentials.consumer_id().unwrap_or("-"))?;
            writeln!(out, "  Private key:   {}", redacted(credentials.private_key()))?;
            writeln!(out, "  Channel type:  {}", credentials.channel_type().unwrap_or("-"))?;
            writeln!(out, "  Partner ID:    {}", credentials.partner_id().unwrap_or("-"))?;
            writeln!(out, "  Refresh token: {}", redacted(credentials.refresh_token()))?;
            writeln!(out, "  Grant type:    {}", credentials.grant_type())?;
            writeln!(out, "  Country:       {}", credentials.country())?;
            writeln!(out, "  Updated:       {}", credentials.updated_at().to_rfc3339())?;
        }
    }
    Ok(())
}

pub async fn update_credentials(
    app: &App,
    id: u64,
    client_id: Option<String>,
    client_secret: Option<String>,
    fields: CredentialFields,
    out: &mut impl Write,
) -> Result<()> {
    let update = CredentialsUpdate {
        client_id,
        client_secret: client_secret.map(Secret::new),
        consumer_id: fields.consumer_id,
        private_key: fields.private_key.map(Secret::new),
        channel_type: fields.channel_type,
        partner_id: fields.partner_id,
        refresh_token: fields.refresh_token.map(Secret::new),
        grant_type: fields.grant_type,
        country: fields.country,
    };
    if update.is_empty() {
        bail!("Nothing to update");
    }

    let mut credentials = app
        .registry
        .resolve_credential(CredentialId::new(id))
        .await?;
    credentials.update(app.ctx(), update).await?;

    writeln!(out, "Updated credentials {}", id)?;
    Ok(())
}

pub async fn remove_credentials(app: &App, id: u64, out: &mut impl Write) -> Result<()> {
    let credentials = app
        .registry
        .resolve_credential(CredentialId::new(id))
        .await?;
    credentials.delete(app.ctx()).await?;

    writeln!(out, "Removed credentials {}", id)?;
    Ok(())
}

pub async fn token(
    app: &App,
    id: u64,
    access_code: Option<String>,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let mut credentials = app
        .registry
        .resolve_credential(CredentialId::new(id))
        .await?;
    if let Some(code) = access_code {
        credentials.set_access_code(code);
    }

    let token = credentials
        .access_token(app.ctx())
        .await
        .with_context(|| format!("Failed to get access token for credentials {}", id))?;
    let expires_at = credentials.expires_at(app.ctx()).await?;

    match format {
        OutputFormat::Json => {
            let value = json!({
                "access_token": token.expose(),
                "token_type": credentials.token_type().unwrap_or("Bearer"),
                "expires_at": expires_at.to_rfc3339(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        }
        OutputFormat::Text => {
            writeln!(out, "{}", token.expose())?;
        }
    }
    Ok(())
}

pub async fn sign(
    app: &App,
    id: u64,
    path: &str,
    method: &str,
    query: &str,
    out: &mut impl Write,
) -> Result<()> {
    let mut credentials = app
        .registry
        .resolve_credential(CredentialId::new(id))
        .await?;
    let config = credentials.to_api_configuration(app.ctx(), false).await?;

    for (name, value) in config.auth_headers(path, method, query)? {
        writeln!(out, "{}: {}", name, value)?;
    }
    Ok(())
}

pub async fn invalidate(app: &App, id: u64, out: &mut impl Write) -> Result<()> {
    let mut credentials = app
        .registry
        .resolve_credential(CredentialId::new(id))
        .await?;
    credentials.invalidate(app.ctx()).await?;

    writeln!(out, "Invalidated access token for credentials {}", id)?;
    Ok(())
}

pub fn classes(provider: Option<&str>, out: &mut impl Write) -> Result<()> {
    let provider = provider.map(str::parse::<ProviderKind>).transpose()?;

    for class in API_CLASSES
        .iter()
        .filter(|c| provider.is_none_or(|p| c.provider == p))
    {
        writeln!(out, "{}", class.path())?;
    }
    Ok(())
}
