//! # Clearway Telemetry
//!
//! Logging and metrics bootstrap for the channel orchestrator.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cw_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     init_telemetry(&TelemetryConfig::from_env()).expect("telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CW_SERVICE_NAME` | `clearway` | Service name in log lines |
//! | `CW_LOG_LEVEL` | `info` | Log level filter |
//! | `CW_JSON_LOGS` | `false` | JSON output |
//! | `CW_LOG_SOURCE` | `false` | Include file/line |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging};
pub use metrics::{encode_metrics, register_metrics};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Installing the global subscriber failed
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Metric registration or encoding failed
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// Invalid filter directive or other configuration problem
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize metrics then logging.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_inc_macro() {
        metric_inc!(metrics::KEEPALIVES_SENT);
        metric_inc!(metrics::FLOWS, &["deposit", "ok"]);
        assert!(metrics::KEEPALIVES_SENT.get() >= 1.0);
    }
}
