use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use remod::Config;
use remod::Engine;
use tracing::error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Bridge cloud-connected smart remotes into a local home hub
#[derive(Parser)]
#[command(name = "remod", version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "remod.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.to_filter())
        .init();

    info!("remod starting");
    info!("Loaded config from: {}", args.config.display());

    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config)?;
    let engine = Arc::new(engine);

    tokio::select! {
        result = engine.run() => {
            if let Err(e) = result {
                error!("engine stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    Ok(())
}
