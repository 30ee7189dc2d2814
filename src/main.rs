mod commands;
mod config;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use podgate_core::{CommandGateway, SharedKey};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Authenticated local control gateway for a pod controller")]
struct Args {
    /// INI configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Directory holding the key, token ledger and device state
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Args {
    fn apply(self, cfg: &mut AppConfig) {
        if let Some(host) = self.host {
            cfg.server.host = host;
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(dir) = self.data_dir {
            cfg.files.data_dir = dir;
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_LEVEL));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();
    let config_path = config::paths::config_path(args.config.take());
    let mut cfg = config::load_app_config(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    args.apply(&mut cfg);
    init_tracing(&cfg.logging.level);

    info!(config = %config_path.display(), "podgate is starting");
    let gateway_config = cfg.files.gateway_config();
    let key = SharedKey::load(&gateway_config.key_file).context("failed to load shared key")?;
    let gateway = Arc::new(CommandGateway::new(&gateway_config, key));
    gateway.clear_stale_files();

    let addr = cfg.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "listening");

    axum::serve(listener, commands::router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated")?;
    Ok(())
}
