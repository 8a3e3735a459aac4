//! claude-usage-exporter - claude.ai quota utilization exporter
//!
//! Polls the usage endpoint for every configured account and serves the
//! results on `/metrics` until interrupted.

use anyhow::Result;
use claude_usage_exporter::{app::App, cli::Cli, config::Config};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        init_tracing("info");
        error!("Failed to load configuration: {}", err);
        std::process::exit(1);
    });

    init_tracing(&config.log_level);

    info!("claude-usage-exporter starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!("Listen Address: {}", config.metrics.listen_address);
    info!("Upstream: {}", config.upstream.base_url);
    info!("Active Interval: {}s", config.polling.active_interval_seconds);
    info!("Idle Interval: {}s", config.polling.idle_interval_seconds);
    info!("Idle Threshold: {} polls", config.polling.idle_threshold);
    info!(
        "Reset Burst Window: {}s",
        config.polling.reset_burst_window_seconds
    );
    info!("Request Timeout: {}s", config.polling.request_timeout_seconds);
    let names: Vec<&str> = config.accounts.iter().map(|a| a.name.as_str()).collect();
    info!("Accounts: {}", names.join(", "));
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = match App::builder(config).build(shutdown_rx).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start: {:#}", e);
            std::process::exit(1);
        }
    };
    if app.otlp_enabled() {
        info!("Metrics are also pushed over OTLP");
    }
    let app_handle = tokio::spawn(app.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Shutting down gracefully...");
    let _ = shutdown_tx.send(true);

    app_handle.await??;
    info!("Exiting.");
    Ok(())
}
