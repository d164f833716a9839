//! sealkv - demo binary
//!
//! Opens a store, writes and reads a key, logs every change notification,
//! then waits for Ctrl+C and shuts the store down cleanly.

use anyhow::Context;
use sealkv::{LoadMode, Store, StoreConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Demo configuration
struct Config {
    /// Snapshot file
    path: PathBuf,
    /// Encryption key (empty: unencrypted)
    key: String,
    /// Global TTL in seconds (0: none)
    ttl_secs: u64,
    /// Sweep interval in milliseconds
    sweep_ms: u64,
    /// Load the snapshot while opening
    eager: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: std::env::var_os("SEALKV_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data.db")),
            key: std::env::var("SEALKV_KEY").unwrap_or_default(),
            ttl_secs: 10,
            sweep_ms: 5000,
            eager: false,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--path" | "-f" => {
                    config.path = PathBuf::from(required(&args, i, "--path"));
                    i += 2;
                }
                "--key" | "-k" => {
                    config.key = required(&args, i, "--key").to_string();
                    i += 2;
                }
                "--ttl" => {
                    config.ttl_secs = number(required(&args, i, "--ttl"), "--ttl");
                    i += 2;
                }
                "--sweep-ms" => {
                    config.sweep_ms = number(required(&args, i, "--sweep-ms"), "--sweep-ms");
                    i += 2;
                }
                "--eager" => {
                    config.eager = true;
                    i += 1;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("sealkv version {}", sealkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn store_config(&self) -> StoreConfig {
        let load_mode = if self.eager {
            LoadMode::Eager
        } else {
            LoadMode::Lazy
        };

        StoreConfig::new(&self.path)
            .with_encryption_key(self.key.as_str())
            .with_global_ttl(Duration::from_secs(self.ttl_secs))
            .with_sweep_interval(Duration::from_millis(self.sweep_ms))
            .with_load_mode(load_mode)
    }
}

/// Returns the value following flag `args[i]`, or exits.
fn required<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn number(value: &str, flag: &str) -> u64 {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid number for {}", flag);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
sealkv - An Embeddable, Versioned, Encrypted Key-Value Store

USAGE:
    sealkv [OPTIONS]

OPTIONS:
    -f, --path <FILE>       Snapshot file (default: data.db, env SEALKV_PATH)
    -k, --key <KEY>         Encryption key, 16/24/32 bytes (env SEALKV_KEY)
        --ttl <SECONDS>     Global TTL, 0 for none (default: 10)
        --sweep-ms <MS>     Expiry sweep interval (default: 5000)
        --eager             Load the snapshot at startup
    -v, --version           Print version information
    -h, --help              Print this help message

EXAMPLES:
    sealkv                                  # Unencrypted data.db
    sealkv -k 0123456789abcdef --eager      # AES-128, fail fast on a bad key
    RUST_LOG=debug sealkv --sweep-ms 500    # Watch the sweeper work
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let store = Store::open(config.store_config())
        .await
        .with_context(|| format!("failed to open store at {}", config.path.display()))?;

    store.register_listener(|event| {
        info!(event = %event, "Change notification");
    });

    store.set("key1", "value1", None).await?;

    match store.get("key1").await {
        Ok(value) => info!(value = %value, "Retrieved value"),
        Err(err) if err.is_not_found() => warn!("key1 vanished before it was read"),
        Err(err) => return Err(err.into()),
    }

    info!(keys = store.len().await?, "Store ready, press Ctrl+C to stop");

    signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    info!("Shutdown signal received, stopping store...");

    store.stop().await;
    info!(stats = ?store.stats(), "Shutdown complete");
    Ok(())
}
