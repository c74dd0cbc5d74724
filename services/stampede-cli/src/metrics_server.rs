//! Prometheus scrape endpoint for the engine self-metrics
//!
//! Serves `/metrics` while a run is in flight (`--metrics-addr`).

use anyhow::Context;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use stampede_core::metrics::gather_text;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handler for `/metrics`: every registered metric in the text format.
pub async fn metrics_handler() -> Response {
    match gather_text() {
        Ok(text) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], text).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Background scrape server, stopped when the run ends.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MetricsServer {
    pub async fn start(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics endpoint on {}", addr))?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router()).await {
                warn!(error = %e, "Metrics endpoint stopped");
            }
        });

        info!(addr = %addr, "Serving engine metrics on /metrics");
        Ok(Self { addr, handle })
    }

    /// Bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}
