// tier2 proxy server binary

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use tier2_proxy::coins;
use tier2_proxy::config::{Config, DEFAULT_CONFIG_PATH};
use tier2_proxy::server::{self, Server};
use tier2_proxy::telemetry;

#[derive(Parser, Debug)]
#[command(name = "tier2-proxy", version, about = "Transparent Stratum proxy with weighted job injection")]
struct Cli {
    /// Config file (JSON)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log every relayed line
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.debug);

    tracing::info!("🚀 tier2-proxy v{}", env!("CARGO_PKG_VERSION"));

    let cfg = Config::load(&cli.config)?;
    tracing::info!(
        "⚙️  Coin {} | origin {} | inject {}",
        if cfg.pool.token.is_empty() { coins::DEFAULT_TOKEN } else { cfg.pool.token.as_str() },
        cfg.pool.default,
        cfg.pool
            .inject
            .as_ref()
            .map(|i| format!("{} ({:.2}%)", i.pool, i.weight * 100.0))
            .unwrap_or_else(|| "off".to_string())
    );

    let store = server::build_store(&cfg).await.context("Failed to open correlation store")?;
    let server = Server::bind(&cfg, store)
        .await
        .with_context(|| format!("Failed to listen on {}", cfg.server.address))?;

    tokio::select! {
        res = server.serve() => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("👋 Shutting down");
        }
    }

    Ok(())
}
