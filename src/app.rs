//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::{MetricSink, UsageFetcher},
    fetcher::ClaudeUsageFetcher,
    internal_metrics::{install_prometheus_recorder, FanoutSink, Metrics, MetricsServer, OtlpMetrics},
    scheduler::AccountPoller,
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: SocketAddr,
    otlp: Option<Arc<OtlpMetrics>>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the metrics server is listening on.
    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    /// Whether observations are also pushed over OTLP.
    pub fn otlp_enabled(&self) -> bool {
        self.otlp.is_some()
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        shutdown_rx.changed().await.ok();
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown().await;

        if let Some(otlp) = self.otlp {
            if let Err(e) = tokio::task::spawn_blocking(move || otlp.shutdown()).await {
                error!("OTLP exporter shutdown panicked: {}", e);
            }
        }

        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Tests swap in a scripted fetcher or a recording sink through the override
/// methods; production code uses the HTTP fetcher and the Prometheus sink.
pub struct AppBuilder {
    config: Config,
    fetcher_override: Option<Arc<dyn UsageFetcher>>,
    sink_override: Option<Arc<dyn MetricSink>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            fetcher_override: None,
            sink_override: None,
        }
    }

    /// Overrides the usage fetcher for testing.
    pub fn fetcher_override(mut self, fetcher: Arc<dyn UsageFetcher>) -> Self {
        self.fetcher_override = Some(fetcher);
        self
    }

    /// Overrides the metric sink for testing.
    ///
    /// No global recorder is installed and no OTLP exporter is started in
    /// this mode, so `/metrics` renders an empty page.
    pub fn sink_override(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sink_override = Some(sink);
        self
    }

    /// Builds and starts all application components, returning a runnable `App`.
    ///
    /// Every poller is spawned before this returns; each takes its first poll
    /// immediately.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        config.validate()?;
        let task_manager = TaskManager::new(shutdown_rx);
        let poller_config = config.polling.poller_config();

        // =========================================================================
        // 1. Initialize Metrics
        // =========================================================================
        let (sink, prom_handle, otlp) = match self.sink_override {
            Some(sink) => (sink, PrometheusBuilder::new().build_recorder().handle(), None),
            None => {
                let handle = install_prometheus_recorder()?;
                let metrics: Arc<dyn MetricSink> =
                    Arc::new(Metrics::new(config.accounts.iter().map(|a| a.name.as_str())));
                match OtlpMetrics::from_env()? {
                    Some(otlp) => {
                        let otlp = Arc::new(otlp);
                        let fanout = FanoutSink::new(vec![metrics, otlp.clone() as Arc<dyn MetricSink>]);
                        (Arc::new(fanout) as Arc<dyn MetricSink>, handle, Some(otlp))
                    }
                    None => (metrics, handle, None),
                }
            }
        };

        // =========================================================================
        // 2. Usage Fetcher
        // =========================================================================
        let fetcher = match self.fetcher_override {
            Some(fetcher) => fetcher,
            None => {
                let timeout = config.polling.request_timeout();
                debug!(base_url = %config.upstream.base_url, ?timeout, "Initializing usage fetcher");
                let client = ClaudeUsageFetcher::build_client(timeout)
                    .context("Failed to build HTTP client")?;
                Arc::new(ClaudeUsageFetcher::new(
                    client,
                    config.upstream.base_url.clone(),
                )) as Arc<dyn UsageFetcher>
            }
        };

        // =========================================================================
        // 3. Account Pollers
        // =========================================================================
        let pollers: Arc<Vec<Arc<AccountPoller>>> = Arc::new(
            config
                .accounts
                .iter()
                .map(|account| {
                    Arc::new(AccountPoller::new(
                        account.clone(),
                        poller_config,
                        fetcher.clone(),
                        sink.clone(),
                    ))
                })
                .collect(),
        );

        // =========================================================================
        // 4. Metrics Server
        // =========================================================================
        let server = MetricsServer::bind(
            config.metrics.listen_address,
            prom_handle,
            pollers.clone(),
            task_manager.get_shutdown_rx(),
        )
        .await?;
        let metrics_addr = server.local_addr()?;
        task_manager.spawn("MetricsServer", server.run());

        for poller in pollers.iter() {
            let shutdown_rx = task_manager.get_shutdown_rx();
            task_manager.spawn(
                format!("Poller[{}]", poller.name()),
                poller.clone().run(shutdown_rx),
            );
        }

        info!(
            "Listening on {} with {} account(s)",
            metrics_addr,
            pollers.len()
        );

        Ok(App {
            task_manager,
            metrics_addr,
            otlp,
        })
    }
}
