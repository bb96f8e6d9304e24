//! # Command Line Interface
//!
//! Holds a renewed session (`run`) or performs one store operation with a
//! freshly authenticated backend.

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ObservabilityConfig, VaultSettings};
use crate::observability::{init_logging, log_settings_info};
use crate::secrets::AuthBackend;

#[derive(Parser)]
#[command(name = "leasewarden")]
#[command(about = "Keeps a Vault session alive and talks to its secret engines")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and keep the session renewed until interrupted
    Run,

    /// KV version 2 commands
    Kv {
        #[command(subcommand)]
        command: KvCommands,
    },

    /// Read a logical path
    Read { path: String },

    /// Write KEY=VALUE pairs to a logical path
    Write {
        path: String,
        #[arg(value_parser = parse_key_value, required = true)]
        pairs: Vec<(String, String)>,
    },

    /// Encrypt plaintext with the transit engine
    Encrypt {
        plaintext: String,
        /// Transit encrypt path, defaults to the configured one
        #[arg(long)]
        path: Option<String>,
    },

    /// Decrypt transit ciphertext
    Decrypt {
        ciphertext: String,
        /// Transit decrypt path, defaults to the configured one
        #[arg(long)]
        path: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum KvCommands {
    /// Read the latest version of an entry
    Get { mount: String, name: String },

    /// Write a new version of an entry
    Put {
        mount: String,
        name: String,
        #[arg(value_parser = parse_key_value, required = true)]
        pairs: Vec<(String, String)>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn into_map(pairs: Vec<(String, String)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn initialise_logging(verbose: bool) -> anyhow::Result<()> {
    let mut config = ObservabilityConfig::from_env()?;
    if verbose {
        config.log_level = "debug".to_string();
    }
    if !init_logging(&config)? {
        tracing::debug!("log subscriber already installed");
    }
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    initialise_logging(cli.verbose)?;

    let settings = VaultSettings::from_env()?;
    log_settings_info(&settings);

    let cancel = CancellationToken::new();
    let mut backend = AuthBackend::from_settings(&settings, &cancel).await?;
    let store = backend.store().clone();

    match cli.command {
        Commands::Run => {
            let shutdown = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received");
                    shutdown.cancel();
                }
            });
            backend.wait().await?;
            info!("session released");
        }
        Commands::Kv { command: KvCommands::Get { mount, name } } => {
            let entry = store.get_kv(&cancel, &mount, &name).await?;
            print_json(&entry.data)?;
        }
        Commands::Kv { command: KvCommands::Put { mount, name, pairs } } => {
            store.put_kv(&cancel, &mount, &name, into_map(pairs)).await?;
            println!("Stored {}/{}", mount, name);
        }
        Commands::Read { path } => {
            let secret = store.get_secret(&cancel, &path).await?;
            print_json(&secret.data)?;
        }
        Commands::Write { path, pairs } => match store.put_secret(&cancel, &path, into_map(pairs)).await? {
            Some(secret) => print_json(&secret.data)?,
            None => println!("Success! Data written to: {}", path),
        },
        Commands::Encrypt { plaintext, path } => {
            let encrypted = match path {
                Some(path) => store.transit_encrypt(&cancel, &path, &plaintext).await?,
                None => store.encrypt(&cancel, &plaintext).await?,
            };
            println!("{}", encrypted.ciphertext);
        }
        Commands::Decrypt { ciphertext, path } => {
            let plaintext = match path {
                Some(path) => store.transit_decrypt(&cancel, &path, &ciphertext).await?,
                None => store.decrypt(&cancel, &ciphertext).await?,
            };
            println!("{}", plaintext);
        }
    }

    Ok(())
}
