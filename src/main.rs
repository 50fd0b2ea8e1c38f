//! Tessera - verified content-addressed block store
//!
//! Stores blocks locally and races HTTP gateways for anything missing.

use std::error::Error;
use tessera_core::{run, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse CLI arguments and build config
    let (config, command) = Config::from_cli()?;

    // Initialize logging
    init_logging(&config.log_level);

    tracing::debug!(?command, "Starting Tessera...");

    if let Err(e) = run(config, command).await {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Logs go to stderr so command output on stdout stays clean
fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
