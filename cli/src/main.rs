//! User pipeline CLI
//!
//! Runs the receiver and all pipeline stages in one process.
//!
//! ```sh
//! # Run with default config (~/.config/user-pipeline/config.toml)
//! user-pipeline
//!
//! # Custom config path, SQLite store
//! user-pipeline --config /etc/user-pipeline/config.toml --store database
//!
//! # Validate config without starting
//! user-pipeline --check
//!
//! # Create and read back "Ivan", then exit
//! user-pipeline --demo
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use user_pipeline::config::{AppConfig, StoreBackend};
use user_pipeline::server::{init_tracing, run_demo, ServerHandle, ServerOptions};

#[derive(Parser, Debug)]
#[command(
    name = "user-pipeline",
    version,
    about = "Asynchronous user CRUD pipeline",
    long_about = "Receiver, validator, data and mailing stages connected by an \
                  in-process broker, with a cache-aside business core.\n\n\
                  Default config: ~/.config/user-pipeline/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "USER_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the user store backend (memory, database).
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Validate the configuration file and exit.
    #[arg(long)]
    check: bool,

    /// Run the create-then-get round trip for "Ivan" and exit.
    #[arg(long)]
    demo: bool,

    /// Skip database migrations on startup.
    #[arg(long)]
    no_migrate: bool,

    /// Skip inserting the demo users.
    #[arg(long)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli
        .config
        .unwrap_or_else(user_pipeline::default_config_path);

    let mut config = match AppConfig::load(&config_path) {
        Ok(mut cfg) => {
            if let Some(ref level) = cli.log_level {
                cfg.logging.level = level.clone();
            }
            init_tracing(&cfg);
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            let level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(level))
                .init();
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
            AppConfig::default()
        }
    };

    // ── Apply CLI overrides ────────────────────────────────────
    if let Some(backend) = cli.store {
        info!("CLI override: store.backend = {}", backend);
        config.store.backend = backend;
    }
    config.validate()?;

    if cli.check {
        println!("✅ Configuration is valid");
        println!("   Config file : {}", config_path.display());
        println!("   Store       : {} ({} workers)", config.store.backend, config.store.workers);
        if config.store.backend == StoreBackend::Database {
            println!("   Database    : {}", config.database.url);
        }
        if config.metrics.enabled {
            println!("   Metrics     : http://{}/metrics", config.metrics.listen);
        }
        println!("   Log level   : {}", config.logging.level);
        return Ok(());
    }

    // ── Start pipeline ─────────────────────────────────────────
    let demo_timeout = config.cache.subscribe_timeout();
    let handle = ServerHandle::start(ServerOptions {
        config,
        auto_migrate: !cli.no_migrate,
        seed_demo_users: !cli.no_seed,
    })
    .await?;

    if cli.demo {
        let result = run_demo(&handle.receiver, demo_timeout).await;
        handle.shutdown().await;
        let user = result?;
        println!(
            "{} <{}> \"{}\" created_at={}",
            user.name, user.email, user.full_name, user.created_at
        );
        return Ok(());
    }

    handle.install_signal_handler();
    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    handle.shutdown_signal().wait().await;
    handle.wait().await;

    Ok(())
}
