//! Quotagate server

use anyhow::Context;
use clap::Parser;
use quotagate_api::config::ServerConfig;
use quotagate_api::{build_router, ApiState};
use quotagate_core::Gateway;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quotagate")]
#[command(author, version, about = "Rate limits, quotas, licenses and sanctions for a metered chat service")]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, env = "QUOTAGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    config.validate()?;

    let gateway = Gateway::in_memory(config.gateway.clone());
    if config.housekeeping_interval_secs > 0 {
        spawn_housekeeping(gateway.clone(), Duration::from_secs(config.housekeeping_interval_secs));
    }

    let app = build_router(ApiState::new(gateway.clone()));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!("Quotagate API listening on {}", config.listen_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.audit.flush().await;
    Ok(())
}

fn spawn_housekeeping(gateway: Gateway, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = gateway.housekeeping().await {
                tracing::warn!(error = %e, "housekeeping pass failed");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
