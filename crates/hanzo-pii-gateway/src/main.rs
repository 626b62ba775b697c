//! PII screening gateway
//!
//! Screens each prompt for names, places and organizations before it reaches
//! the model, screens the model's answer on the way back, and records every
//! anomaly in the audit store.

mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use hanzo_pii_guard::{GuardConfig, GuardPipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Gateway server arguments
#[derive(Parser, Debug)]
#[command(name = "hanzo-pii-gateway")]
#[command(about = "Screens LLM prompts and completions for personal data")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// TOML configuration file; environment variables override it
    #[arg(short, long, env = "GUARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let config = GuardConfig::load(args.config.as_deref()).context("invalid configuration")?;
    let pipeline = Arc::new(
        GuardPipeline::start(config)
            .await
            .context("failed to start guard pipeline")?,
    );

    let app = routes::router(pipeline.clone());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, store = pipeline.store_kind(), "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = pipeline.shutdown().await {
        warn!(error = %e, "Store did not close cleanly");
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
