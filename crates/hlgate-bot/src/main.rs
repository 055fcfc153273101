//! hlgate entry point.
//!
//! Reads order intents as JSON Lines and runs each through admission and
//! execution. Live sends stay off unless `trading.enabled` is set.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Order admission and resilience gateway
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via HLGATE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// JSON Lines file of order intents (stdin when omitted)
    #[arg(short, long)]
    intents: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    hlgate_telemetry::init_logging()?;

    info!("Starting hlgate v{}", env!("CARGO_PKG_VERSION"));

    let config = hlgate_bot::AppConfig::load(args.config.as_deref())?;
    info!(
        trading_enabled = config.trading.enabled,
        audit_dir = %config.audit.dir.display(),
        "Configuration loaded"
    );

    let app = hlgate_bot::Application::new(config)?;
    let stats = app.run(args.intents.as_deref()).await?;
    info!(?stats, "Shutdown complete");

    Ok(())
}
