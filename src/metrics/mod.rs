//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Events received per kind
//! - Operations dispatched and their terminal outcomes
//! - Subscription errors
//! - Ledger transactions and fees
//! - Chain RPC health

use crate::error::{BridgeError, BridgeResult};
use crate::events::EventKind;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "bifrost_events_received_total",
        "Total transfer events received by kind",
        &["kind"]
    ).expect("metric registration");

    pub static ref OPERATIONS_DISPATCHED: CounterVec = register_counter_vec!(
        "bifrost_operations_dispatched_total",
        "Total operations launched",
        &["operation"]
    ).expect("metric registration");

    pub static ref OPERATIONS_IN_FLIGHT: Gauge = register_gauge!(
        "bifrost_operations_in_flight",
        "Operations launched that have not reached a terminal outcome"
    ).expect("metric registration");

    pub static ref OPERATION_OUTCOMES: CounterVec = register_counter_vec!(
        "bifrost_operation_outcomes_total",
        "Terminal operation outcomes",
        &["operation", "outcome"]
    ).expect("metric registration");

    pub static ref OPERATION_LATENCY: HistogramVec = register_histogram_vec!(
        "bifrost_operation_duration_seconds",
        "Time from launch to terminal outcome",
        &["operation"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).expect("metric registration");

    pub static ref SUBSCRIPTION_ERRORS: CounterVec = register_counter_vec!(
        "bifrost_subscription_errors_total",
        "Subscription errors per ledger",
        &["ledger"]
    ).expect("metric registration");

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "bifrost_transactions_submitted_total",
        "Ledger transactions submitted",
        &["chain", "method"]
    ).expect("metric registration");

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "bifrost_transactions_failed_total",
        "Ledger transactions that failed or reverted",
        &["chain", "method"]
    ).expect("metric registration");

    pub static ref FEES_PAID: CounterVec = register_counter_vec!(
        "bifrost_fees_paid_wei_total",
        "Fees paid by the relayer wallet",
        &["chain"]
    ).expect("metric registration");

    pub static ref BLOCKS_SCANNED: CounterVec = register_counter_vec!(
        "bifrost_blocks_scanned_total",
        "Blocks scanned for vault events",
        &["chain"]
    ).expect("metric registration");

    pub static ref CHAIN_HEALTHY: GaugeVec = register_gauge_vec!(
        "bifrost_chain_healthy",
        "Whether the chain RPC answered the last health check",
        &["chain"]
    ).expect("metric registration");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| BridgeError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Holds a gauge up for as long as it lives, including across panics and aborts
pub struct InFlightGuard {
    gauge: Gauge,
}

impl InFlightGuard {
    pub fn new(gauge: &Gauge) -> Self {
        gauge.inc();
        Self {
            gauge: gauge.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

// Helper functions to record metrics

pub fn record_event(kind: EventKind) {
    EVENTS_RECEIVED.with_label_values(&[kind.name()]).inc();
}

pub fn record_operation_dispatched(operation: &str) {
    OPERATIONS_DISPATCHED.with_label_values(&[operation]).inc();
}

pub fn record_operation_outcome(operation: &str, outcome: &str, latency_secs: f64) {
    OPERATION_OUTCOMES
        .with_label_values(&[operation, outcome])
        .inc();
    OPERATION_LATENCY
        .with_label_values(&[operation])
        .observe(latency_secs);
}

pub fn record_subscription_error(ledger: &str) {
    SUBSCRIPTION_ERRORS.with_label_values(&[ledger]).inc();
}

pub fn record_tx_submitted(chain: &str, method: &str) {
    TX_SUBMITTED.with_label_values(&[chain, method]).inc();
}

pub fn record_tx_failed(chain: &str, method: &str) {
    TX_FAILED.with_label_values(&[chain, method]).inc();
}

pub fn record_fee_paid(chain: &str, fee_wei: f64) {
    FEES_PAID.with_label_values(&[chain]).inc_by(fee_wei);
}

pub fn record_blocks_scanned(chain: &str, blocks: u64) {
    BLOCKS_SCANNED
        .with_label_values(&[chain])
        .inc_by(blocks as f64);
}

pub fn record_chain_health(chain: &str, healthy: bool) {
    CHAIN_HEALTHY
        .with_label_values(&[chain])
        .set(if healthy { 1.0 } else { 0.0 });
}
