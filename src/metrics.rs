//! Prometheus metrics for the deposit ingestion engine.
//!
//! Exposes metrics on `/metrics` and a liveness probe on `/health`, served
//! by the same bounded-connection hand-rolled listener the teacher uses for
//! its metrics server — no HTTP framework needed for two routes.

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

lazy_static! {
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "depositd_blocks_processed_total",
        "Total number of blocks processed by the follower",
        &["chain"]
    ).unwrap();

    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "depositd_latest_block",
        "Latest block number processed",
        &["chain"]
    ).unwrap();

    pub static ref CANDIDATES_DETECTED: CounterVec = register_counter_vec!(
        "depositd_candidates_detected_total",
        "Total number of deposit candidates detected into tracked addresses",
        &["chain"]
    ).unwrap();

    pub static ref AML_VERDICTS: CounterVec = register_counter_vec!(
        "depositd_aml_verdicts_total",
        "AML verdicts by risk level",
        &["risk_level"]
    ).unwrap();

    pub static ref CONFIRMATIONS_COMPLETED: CounterVec = register_counter_vec!(
        "depositd_confirmations_completed_total",
        "Total transfers that reached the required confirmation depth",
        &["chain"]
    ).unwrap();

    pub static ref ORDERS_SETTLED: CounterVec = register_counter_vec!(
        "depositd_orders_settled_total",
        "Total orders transitioned to completed",
        &["chain"]
    ).unwrap();

    pub static ref ORDERS_FLAGGED: CounterVec = register_counter_vec!(
        "depositd_orders_flagged_total",
        "Total orders flagged by the AML evaluator",
        &["chain"]
    ).unwrap();

    pub static ref ORDERS_REAPED: CounterVec = register_counter_vec!(
        "depositd_orders_reaped_total",
        "Total expired pending orders reaped by the janitor",
        &["chain"]
    ).unwrap();

    pub static ref PENDING_ORDERS: GaugeVec = register_gauge_vec!(
        "depositd_pending_orders",
        "Number of orders currently pending settlement",
        &["chain"]
    ).unwrap();

    pub static ref UNCONFIRMED_TRANSFERS: GaugeVec = register_gauge_vec!(
        "depositd_unconfirmed_transfers",
        "Number of detected transfers awaiting confirmation depth",
        &["chain"]
    ).unwrap();

    pub static ref RECONCILE_LATENCY: HistogramVec = register_histogram_vec!(
        "depositd_reconcile_latency_seconds",
        "Time to run one settlement reconciliation pass",
        &["chain"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "depositd_errors_total",
        "Total number of errors by component",
        &["component"]
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "depositd_up",
        "Whether the ingestion engine is up and running"
    ).unwrap();
}

/// Maximum concurrent connections to the metrics server.
const METRICS_MAX_CONNECTIONS: usize = 128;

/// Read timeout for incoming connections.
const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Start the metrics/status HTTP server.
pub async fn start_metrics_server(addr: SocketAddr) -> eyre::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Metrics server started");

    UP.set(1.0);

    let semaphore = Arc::new(Semaphore::new(METRICS_MAX_CONNECTIONS));

    loop {
        let (mut socket, _) = listener.accept().await?;
        let sem = semaphore.clone();

        tokio::spawn(async move {
            let _permit = match sem.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            let mut buf = [0u8; 4096];
            let n = match tokio::time::timeout(METRICS_READ_TIMEOUT, socket.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => n,
                _ => return,
            };

            let (method, path) = match parse_metrics_request(&buf[..n]) {
                Some(mp) => mp,
                None => {
                    let _ = socket
                        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    return;
                }
            };

            match (method.as_str(), path.as_str()) {
                ("GET", "/metrics") | ("GET", "/") => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    let _ = encoder.encode(&metric_families, &mut buffer);

                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                        buffer.len()
                    );

                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.write_all(&buffer).await;
                }
                ("GET", "/health") | ("GET", "/status") => {
                    let response =
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK";
                    let _ = socket.write_all(response.as_bytes()).await;
                }
                _ => {
                    let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                    let _ = socket.write_all(response.as_bytes()).await;
                }
            }
        });
    }
}

/// Parse HTTP method and path from raw request bytes (metrics server).
fn parse_metrics_request(buf: &[u8]) -> Option<(String, String)> {
    let request = std::str::from_utf8(buf).ok()?;
    let first_line = request.lines().next()?;
    let mut parts = first_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    Some((method, path))
}

pub fn record_block_processed(chain: &str, block_number: u64) {
    BLOCKS_PROCESSED.with_label_values(&[chain]).inc();
    LATEST_BLOCK.with_label_values(&[chain]).set(block_number as f64);
}

pub fn record_candidate_detected(chain: &str) {
    CANDIDATES_DETECTED.with_label_values(&[chain]).inc();
}

pub fn record_aml_verdict(risk_level: &str) {
    AML_VERDICTS.with_label_values(&[risk_level]).inc();
}

pub fn record_confirmation_completed(chain: &str) {
    CONFIRMATIONS_COMPLETED.with_label_values(&[chain]).inc();
}

pub fn record_order_settled(chain: &str) {
    ORDERS_SETTLED.with_label_values(&[chain]).inc();
}

pub fn record_order_flagged(chain: &str) {
    ORDERS_FLAGGED.with_label_values(&[chain]).inc();
}

pub fn record_orders_reaped(chain: &str, count: usize) {
    ORDERS_REAPED.with_label_values(&[chain]).inc_by(count as f64);
}

pub fn set_pending_orders(chain: &str, count: i64) {
    PENDING_ORDERS.with_label_values(&[chain]).set(count as f64);
}

pub fn set_unconfirmed_transfers(chain: &str, count: i64) {
    UNCONFIRMED_TRANSFERS.with_label_values(&[chain]).set(count as f64);
}

pub fn record_reconcile_latency(chain: &str, seconds: f64) {
    RECONCILE_LATENCY.with_label_values(&[chain]).observe(seconds);
}

pub fn record_error(component: &str) {
    ERRORS.with_label_values(&[component]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_block_processed_updates_gauge() {
        record_block_processed("evm-1", 100);
        assert!(LATEST_BLOCK.with_label_values(&["evm-1"]).get() >= 100.0);
    }

    #[test]
    fn test_parse_metrics_request_extracts_method_and_path() {
        let (method, path) = parse_metrics_request(b"GET /metrics HTTP/1.1\r\n").unwrap();
        assert_eq!(method, "GET");
        assert_eq!(path, "/metrics");
    }

    #[test]
    fn test_parse_metrics_request_rejects_empty_input() {
        assert!(parse_metrics_request(b"").is_none());
    }
}
