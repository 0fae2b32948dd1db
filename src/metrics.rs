use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use tracing::{error, info};

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,
    pub dataset: String,

    // Window processing metrics
    pub windows_processed: Counter<u64>,
    pub logs_upserted: Counter<u64>,
    pub latest_persisted_block: Gauge<u64>,
    pub target_height: Gauge<u64>,
    pub window_processing_time: Gauge<f64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new(dataset: String) -> Result<Self, MetricError> {
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("backfill_metrics");

        let windows_processed = meter
            .u64_counter("backfill_windows_processed")
            .with_description("Total number of block windows persisted")
            .build();

        let logs_upserted = meter
            .u64_counter("backfill_logs_upserted")
            .with_description("Total number of log records upserted")
            .build();

        let latest_persisted_block = meter
            .u64_gauge("backfill_latest_persisted_block_number")
            .with_description("Last block of the latest persisted window")
            .build();

        let target_height = meter
            .u64_gauge("backfill_target_height")
            .with_description("Block height the run is backfilling to")
            .build();

        let window_processing_time = meter
            .f64_gauge("backfill_latest_window_processing")
            .with_description("Time spent scanning, encoding and writing the latest window")
            .with_unit("s")
            .build();

        let rpc_requests = meter
            .u64_counter("backfill_rpc_requests")
            .with_description("Number of RPC requests made")
            .build();

        let rpc_errors = meter
            .u64_counter("backfill_rpc_errors")
            .with_description("Number of RPC errors encountered, timeouts included")
            .build();

        let rpc_latency = meter
            .f64_histogram("backfill_rpc_latency")
            .with_description("RPC request latency")
            .with_boundaries(vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ])
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            dataset,
            windows_processed,
            logs_upserted,
            latest_persisted_block,
            target_height,
            window_processing_time,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .context("invalid metrics address")?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Only used for logging
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind metrics server")?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }

    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }
}

fn render_registry(registry: &prometheus::Registry) -> Result<String> {
    let mut buffer = vec![];
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> (StatusCode, String) {
    match render_registry(&registry) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::KeyValue;

    #[test]
    fn test_render_exposes_instruments() {
        let metrics = Metrics::new("eth".to_string()).unwrap();
        let labels = [KeyValue::new("dataset", "eth")];
        metrics.windows_processed.add(3, &labels);
        metrics.latest_persisted_block.record(249, &labels);

        let body = metrics.render().unwrap();
        assert!(body.contains("backfill_windows_processed"));
        assert!(body.contains("backfill_latest_persisted_block_number"));
    }
}
