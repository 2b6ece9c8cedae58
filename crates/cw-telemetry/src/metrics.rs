//! Prometheus metrics for the channel orchestrator.
//!
//! All metrics follow the naming convention: `cw_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};
use std::sync::Once;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Reconnect attempts scheduled after an unexpected close
    pub static ref RECONNECT_ATTEMPTS: Counter = Counter::new(
        "cw_connection_reconnect_attempts_total",
        "Reconnect attempts scheduled after the node connection dropped"
    ).expect("metric creation failed");

    /// Keep-alive requests sent while authenticated
    pub static ref KEEPALIVES_SENT: Counter = Counter::new(
        "cw_connection_keepalives_total",
        "Keep-alive requests sent to the clearing node"
    ).expect("metric creation failed");

    // =========================================================================
    // RPC
    // =========================================================================

    /// RPC requests by method and outcome (ok, remote_error, timeout, cancelled)
    pub static ref RPC_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("cw_rpc_requests_total", "RPC requests sent to the clearing node"),
        &["method", "outcome"]
    ).expect("metric creation failed");

    /// RPC round-trip latency
    pub static ref RPC_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "cw_rpc_round_trip_seconds",
            "Time between sending a request and receiving its response"
        ).buckets(exponential_buckets(0.005, 2.0, 14).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // CHANNEL LIFECYCLE
    // =========================================================================

    /// Funds-moving flows by kind (deposit, withdraw, cleanup) and outcome
    pub static ref FLOWS: CounterVec = CounterVec::new(
        Opts::new("cw_channel_flows_total", "Deposit/withdraw/cleanup flows"),
        &["flow", "outcome"]
    ).expect("metric creation failed");

    /// On-chain transactions submitted by call kind
    pub static ref TRANSACTIONS_SUBMITTED: CounterVec = CounterVec::new(
        Opts::new("cw_channel_transactions_submitted_total", "On-chain transactions submitted"),
        &["call"]
    ).expect("metric creation failed");

    /// Bounded waits that expired without acknowledgement
    pub static ref UNCONFIRMED_WAITS: CounterVec = CounterVec::new(
        Opts::new("cw_channel_unconfirmed_waits_total", "Acknowledgement waits that timed out"),
        &["wait"]
    ).expect("metric creation failed");

    // =========================================================================
    // SESSION
    // =========================================================================

    /// Tips sent
    pub static ref TIPS_SENT: Counter = Counter::new(
        "cw_session_tips_sent_total",
        "Tips accepted by the clearing node"
    ).expect("metric creation failed");

    /// Tips rejected locally before reaching the node
    pub static ref TIPS_REJECTED: Counter = Counter::new(
        "cw_session_tips_rejected_total",
        "Tips rejected by the local session ledger"
    ).expect("metric creation failed");

    /// Last observed unified ledger balance (base units, lossy)
    pub static ref UNIFIED_BALANCE: Gauge = Gauge::new(
        "cw_session_unified_balance",
        "Last unified ledger balance pushed by the node"
    ).expect("metric creation failed");
}

static REGISTER: Once = Once::new();

/// Register every metric with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let mut result = Ok(());
    REGISTER.call_once(|| {
        let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(RECONNECT_ATTEMPTS.clone()),
            Box::new(KEEPALIVES_SENT.clone()),
            Box::new(RPC_REQUESTS.clone()),
            Box::new(RPC_LATENCY.clone()),
            Box::new(FLOWS.clone()),
            Box::new(TRANSACTIONS_SUBMITTED.clone()),
            Box::new(UNCONFIRMED_WAITS.clone()),
            Box::new(TIPS_SENT.clone()),
            Box::new(TIPS_REJECTED.clone()),
            Box::new(UNIFIED_BALANCE.clone()),
        ];

        for metric in metrics {
            if let Err(e) = REGISTRY.register(metric) {
                result = Err(TelemetryError::MetricsInit(e.to_string()));
                return;
            }
        }
    });
    result
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
