//! cascaded - HTTP service for the detection cascade
//!
//! This daemon:
//! 1. Loads `.env` and the service configuration
//! 2. Loads every configured detector (absent on failure)
//! 3. Serves `GET /`, `GET /health` and `POST /predict` until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use cascade_detect::{
    api::{ApiConfig, ApiServer},
    loader, CascadeService, ServiceConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Cascade object detection service")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "CASCADE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides the configuration).
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServiceConfig::load_from(args.config.as_deref())?;
    let registry = Arc::new(loader::load_registry(&config)?);
    if !registry.is_available(&config.cascade.primary) {
        log::error!(
            "primary detector '{}' unavailable; /predict will fail until it loads",
            config.cascade.primary
        );
    }
    let service = Arc::new(CascadeService::from_config(&config, registry));

    let api_config = ApiConfig {
        addr: args.addr.unwrap_or_else(|| config.api_addr.clone()),
        max_body_bytes: config.max_body_bytes,
        max_in_flight: config.max_in_flight,
    };
    let api_handle = ApiServer::new(api_config, service).spawn()?;
    log::info!(
        "cascaded listening on {} (primary {}, secondaries [{}])",
        api_handle.addr,
        config.cascade.primary,
        config.cascade.secondaries.join(", ")
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
