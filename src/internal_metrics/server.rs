//! # Metrics Server
//!
//! This module defines the `MetricsServer`, an `axum`-based web server that
//! exposes:
//!
//! - `/metrics`: every registered metric in the Prometheus exposition format.
//! - `/healthz`: a liveness check that always answers `ok`.
//! - `/pollers`: a JSON snapshot of each account's scheduler state.
//!
//! The server stops when the application's shutdown signal fires.

use crate::scheduler::{AccountPoller, PollerStatus};
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

#[derive(Clone)]
struct ServerState {
    prom_handle: PrometheusHandle,
    pollers: Arc<Vec<Arc<AccountPoller>>>,
}

/// Serves metrics, health and poller introspection over HTTP.
pub struct MetricsServer {
    listener: TcpListener,
    state: ServerState,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// Binds the listener but does not start serving.
    ///
    /// Binding happens eagerly so that an unusable address fails start-up.
    pub async fn bind(
        addr: SocketAddr,
        prom_handle: PrometheusHandle,
        pollers: Arc<Vec<Arc<AccountPoller>>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics server to {}", addr))?;
        Ok(Self {
            listener,
            state: ServerState {
                prom_handle,
                pollers,
            },
            shutdown_rx,
        })
    }

    /// The address actually bound, which differs from the configured one
    /// when port 0 was requested.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(self) -> impl Future<Output = ()> {
        let Self {
            listener,
            state,
            mut shutdown_rx,
        } = self;
        let app = Router::new()
            .route("/metrics", get(render_metrics))
            .route("/healthz", get(healthz))
            .route("/pollers", get(poller_statuses))
            .with_state(state);

        async move {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    trace!("Metrics server received shutdown signal via select.");
                }
                result = axum::serve(listener, app.into_make_service()) => {
                    if let Err(e) = result {
                        error!("Metrics server error: {}", e);
                    }
                }
            }
            trace!("Metrics server task finished.");
        }
    }
}

async fn render_metrics(State(state): State<ServerState>) -> String {
    state.prom_handle.render()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn poller_statuses(State(state): State<ServerState>) -> Json<Vec<PollerStatus>> {
    let mut statuses = Vec::with_capacity(state.pollers.len());
    for poller in state.pollers.iter() {
        statuses.push(poller.status().await);
    }
    Json(statuses)
}
