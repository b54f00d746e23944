//! Ploinky Gateway server binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use ploinky_gateway::{
    config::ConfigLoader,
    gateway,
    setup_tracing,
    sso::AuthService,
};

/// Ploinky agent gateway — SSO authentication front.
#[derive(Debug, Parser)]
#[command(name = "ploinky-gateway", version, about)]
struct Cli {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8080", env = "PLOINKY_LISTEN")]
    listen: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PLOINKY_LOG_LEVEL")]
    log_level: String,

    /// Log format: text (default) or json.
    #[arg(long, env = "PLOINKY_LOG_FORMAT")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load a .env if present before anything reads the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    setup_tracing(&cli.log_level, cli.log_format.as_deref());

    let service = Arc::new(AuthService::new(ConfigLoader::standard()));
    if service.is_configured() {
        info!("SSO is configured; authentication gate is active");
    } else {
        info!("SSO is not configured; gateway admits all traffic");
    }

    let router = gateway::router(service);

    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!(addr = %cli.listen, "Gateway listening");

    axum::serve(listener, router)
        .await
        .context("server error")?;

    Ok(())
}
