//! Observability for Nimbus.
//!
//! - **Logging**: structured JSON or pretty output through `tracing-subscriber`
//! - **Metrics**: Prometheus-format dispatch metrics via the `metrics` crate
//!
//! The dispatch runtime emits logs and metrics unconditionally; they go nowhere
//! until the corresponding subsystem is initialized here.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `nimbus_dispatch_total` | Counter | `handler`, `method`, `outcome` | Completed dispatches |
//! | `nimbus_dispatch_duration_seconds` | Histogram | `handler`, `method` | Dispatch latency |
//! | `nimbus_dispatch_in_flight` | Gauge | - | Dispatches currently running |
//! | `nimbus_handlers_discovered` | Gauge | - | Handler types registered at startup |
//!
//! # Example
//!
//! ```rust,ignore
//! use nimbus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::builder()
//!         .service_name("orders")
//!         .metrics_addr("0.0.0.0:9464")
//!         .build();
//!
//!     init_telemetry(&config).expect("Failed to init telemetry");
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, DispatchOutcome, MetricsConfig, MetricsRegistry};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_telemetry_disabled() {
        let mut config = TelemetryConfig::default();
        config.logging.enabled = false;
        config.metrics.enabled = false;
        assert!(init_telemetry(&config).is_ok());
    }
}
