//! Marketkey CLI
//!
//! Command-line interface for managing Walmart marketplace seller credentials.
//!
//! # Usage
//!
//! ```bash
//! # Generate an encryption key and export it
//! export MARKETKEY_ENCRYPTION_KEY=$(marketkey keygen)
//!
//! # Seed a seller and credentials from WALMART_API_* variables
//! marketkey init
//!
//! # Get a fresh access token
//! marketkey token 1
//!
//! # Print signed request headers
//! marketkey sign 1 --path /v3/orders --method GET
//! ```

mod app;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use app::{App, load_settings};
use commands::{CredentialFields, OutputFormat};

#[derive(Parser)]
#[command(name = "marketkey")]
#[command(about = "Credential and access-token management for Walmart marketplace sellers")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to the platform configuration directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the record store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the default seller and credentials from the settings
    Init,

    /// Print a new random encryption key
    Keygen,

    /// Manage sellers
    #[command(subcommand)]
    Seller(SellerCommand),

    /// Manage credential records
    #[command(subcommand)]
    Credentials(CredentialsCommand),

    /// Get a valid access token for a credential record
    Token {
        /// Credential record id
        id: u64,

        /// One-time authorization code for the authorization_code grant
        #[arg(long)]
        access_code: Option<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the authentication headers for one request
    Sign {
        /// Credential record id
        id: u64,

        /// Request path, e.g. /v3/orders
        #[arg(long)]
        path: String,

        #[arg(long, default_value = "GET")]
        method: String,

        /// Query string without the leading '?'
        #[arg(long, default_value = "")]
        query: String,
    },

    /// Forget the cached access token of a credential record
    Invalidate {
        /// Credential record id
        id: u64,
    },

    /// List the supported capability classes
    Classes {
        /// Filter by provider (marketplace, contentProvider, supplier)
        #[arg(short, long)]
        provider: Option<String>,
    },
}

#[derive(Subcommand)]
enum SellerCommand {
    /// Create a seller
    Add {
        /// Name identifying the seller
        name: Option<String>,
    },

    /// List sellers
    List {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove a seller and all of its credential records
    Remove {
        /// Seller id
        id: u64,
    },
}

#[derive(Subcommand)]
enum CredentialsCommand {
    /// Add a credential record to a seller
    Add {
        /// Seller id
        seller: u64,

        client_id: String,

        client_secret: String,

        #[command(flatten)]
        fields: CredentialFields,
    },

    /// Show a credential record with its secrets redacted
    Show {
        /// Credential record id
        id: u64,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change fields of a credential record
    Update {
        /// Credential record id
        id: u64,

        #[arg(long)]
        client_id: Option<String>,

        #[arg(long)]
        client_secret: Option<String>,

        #[command(flatten)]
        fields: CredentialFields,
    },

    /// Remove a credential record
    Remove {
        /// Credential record id
        id: u64,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut out = std::io::stdout().lock();

    // Commands that need no stored state.
    match &cli.command {
        Commands::Keygen => return commands::keygen(&mut out),
        Commands::Classes { provider } => return commands::classes(provider.as_deref(), &mut out),
        _ => {}
    }

    let settings = load_settings(cli.config.as_deref(), cli.data_dir.as_deref())?;
    let app = App::from_settings(settings)?;

    match cli.command {
        Commands::Init => commands::init(&app, &mut out).await,
        Commands::Keygen | Commands::Classes { .. } => Ok(()),
        Commands::Seller(SellerCommand::Add { name }) => {
            commands::add_seller(&app, name, &mut out).await
        }
        Commands::Seller(SellerCommand::List { format }) => {
            commands::list_sellers(&app, format, &mut out).await
        }
        Commands::Seller(SellerCommand::Remove { id }) => {
            commands::remove_seller(&app, id, &mut out).await
        }
        Commands::Credentials(CredentialsCommand::Add {
            seller,
            client_id,
            client_secret,
            fields,
        }) => {
            commands::add_credentials(&app, seller, client_id, client_secret, fields, &mut out)
                .await
        }
        Commands::Credentials(CredentialsCommand::Show { id, format }) => {
            commands::show_credentials(&app, id, format, &mut out).await
        }
        Commands::Credentials(CredentialsCommand::Update {
            id,
            client_id,
            client_secret,
            fields,
        }) => {
            commands::update_credentials(&app, id, client_id, client_secret, fields, &mut out)
                .await
        }
        Commands::Credentials(CredentialsCommand::Remove { id }) => {
            commands::remove_credentials(&app, id, &mut out).await
        }
        Commands::Token {
            id,
            access_code,
            format,
        } => commands::token(&app, id, access_code, format, &mut out).await,
        Commands::Sign {
            id,
            path,
            method,
            query,
        } => commands::sign(&app, id, &path, &method, &query, &mut out).await,
        Commands::Invalidate { id } => commands::invalidate(&app, id, &mut out).await,
    }
}
