//! cascade_predict - run the detection cascade once over a local image
//!
//! Prints the same JSON document `POST /predict` returns.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use cascade_detect::{loader, CascadeService, ServiceConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the detection cascade over one image")]
struct Args {
    /// Image to analyse (JPEG or PNG).
    #[arg(long)]
    image: PathBuf,

    /// TOML configuration file.
    #[arg(long, env = "CASCADE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the primary detector.
    #[arg(long)]
    primary: Option<String>,

    /// Override the secondary detectors (comma separated, in order).
    #[arg(long, value_delimiter = ',')]
    secondaries: Option<Vec<String>>,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let mut config = ServiceConfig::load_from(args.config.as_deref())?;
    if let Some(primary) = args.primary {
        config.cascade.primary = primary;
    }
    if let Some(secondaries) = args.secondaries {
        config.cascade.secondaries = secondaries;
    }

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let filename = args
        .image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.image.display().to_string());

    let registry = Arc::new(loader::load_registry(&config)?);
    let service = CascadeService::from_config(&config, registry);
    let response = service.predict(&filename, &bytes)?;

    let out = if args.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", out);
    Ok(())
}
