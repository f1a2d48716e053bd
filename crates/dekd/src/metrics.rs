//! Prometheus /metrics + liveness endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  liveness probe (200 while the process runs)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::encoding::{text::encode, EncodeLabelSet};
use prometheus_client::metrics::{counter::Counter, family::Family, gauge::Gauge};
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub op: String,
    pub outcome: String,
}

/// Request counters and persona gauge
#[derive(Clone, Default)]
pub struct DekMetrics {
    requests: Family<RequestLabels, Counter>,
    personas: Gauge,
}

impl DekMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "dek_requests",
            "Control requests by operation and outcome",
            metrics.requests.clone(),
        );
        registry.register(
            "dek_personas",
            "Personas currently held in the key table",
            metrics.personas.clone(),
        );
        metrics
    }

    pub fn observe(&self, op: &str, outcome: &str) {
        self.requests
            .get_or_create(&RequestLabels {
                op: op.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn set_personas(&self, count: usize) {
        self.personas.set(count as i64);
    }

    #[cfg(test)]
    pub fn count(&self, op: &str, outcome: &str) -> u64 {
        self.requests
            .get_or_create(&RequestLabels {
                op: op.to_string(),
                outcome: outcome.to_string(),
            })
            .get()
    }
}

/// Serve Prometheus metrics and liveness on `addr` (e.g. "127.0.0.1:9110")
pub async fn serve(addr: String, registry: Arc<Registry>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_encode() {
        let mut registry = Registry::default();
        let metrics = DekMetrics::register(&mut registry);

        metrics.observe("generate_dek", "ok");
        metrics.observe("generate_dek", "ok");
        metrics.observe("decrypt_dek", "key_not_loaded");
        metrics.set_personas(3);

        assert_eq!(metrics.count("generate_dek", "ok"), 2);

        let mut body = String::new();
        encode(&mut body, &registry).unwrap();
        assert!(body.contains("dek_requests_total"));
        assert!(body.contains("outcome=\"key_not_loaded\""));
        assert!(body.contains("dek_personas 3"));
    }
}
