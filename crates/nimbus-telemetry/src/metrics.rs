//! Prometheus metrics for Nimbus.
//!
//! Metrics are recorded through the `metrics` facade. Until a recorder is
//! installed with [`init_metrics`], recording is a no-op.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `nimbus_dispatch_total` | Counter | `handler`, `method`, `outcome` | Completed dispatches |
//! | `nimbus_dispatch_duration_seconds` | Histogram | `handler`, `method` | Dispatch latency |
//! | `nimbus_dispatch_in_flight` | Gauge | - | Dispatches currently running |
//! | `nimbus_dispatch_unrouted_total` | Counter | `input` | Inputs without a handler |
//! | `nimbus_handlers_discovered` | Gauge | - | Handler types registered at startup |
//!
//! # Example
//!
//! ```rust,ignore
//! use nimbus_telemetry::metrics::{record_dispatch, DispatchOutcome};
//!
//! record_dispatch("Orders", "create", DispatchOutcome::Success, Duration::from_millis(3));
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use nimbus_core::DispatchError;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Completed dispatches.
pub const DISPATCH_TOTAL: &str = "nimbus_dispatch_total";
/// Dispatch latency in seconds.
pub const DISPATCH_DURATION_SECONDS: &str = "nimbus_dispatch_duration_seconds";
/// Dispatches currently running.
pub const DISPATCH_IN_FLIGHT: &str = "nimbus_dispatch_in_flight";
/// Inputs dispatched without a matching handler.
pub const DISPATCH_UNROUTED_TOTAL: &str = "nimbus_dispatch_unrouted_total";
/// Handler types registered at startup.
pub const HANDLERS_DISCOVERED: &str = "nimbus_handlers_discovered";

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to serve `/metrics` on (e.g., "0.0.0.0:9090").
    ///
    /// Without one, the recorder is installed and metrics can be rendered with
    /// [`render_metrics`].
    pub listen_addr: Option<String>,

    /// Service name, attached to every metric as the `service` label.
    pub service_name: String,

    /// Histogram buckets for dispatch duration.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: None,
            service_name: "nimbus".to_string(),
            // 100µs .. 10s; in-process dispatch is usually far below a millisecond
            duration_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
            ],
        }
    }
}

/// Renders metrics from an installed recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Creates a registry over the given handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Returns the registry of the globally installed recorder, if any.
    #[must_use]
    pub fn global() -> Option<Self> {
        METRICS_HANDLE.get().cloned().map(Self::new)
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initializes the metrics subsystem.
///
/// Serving metrics over HTTP requires a running Tokio runtime; the exporter is
/// spawned onto it.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full(DISPATCH_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = match &config.listen_addr {
        Some(addr) => install_with_listener(builder, addr)?,
        None => builder
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

fn install_with_listener(
    builder: PrometheusBuilder,
    addr: &str,
) -> TelemetryResult<PrometheusHandle> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;

    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        TelemetryError::MetricsInit("serving metrics requires a Tokio runtime".to_string())
    })?;
    let _entered = runtime.enter();

    let (recorder, exporter) = builder
        .with_http_listener(addr)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    runtime.spawn(async move {
        if let Err(error) = exporter.await {
            tracing::error!(?error, "metrics exporter stopped");
        }
    });

    let upkeep = handle.clone();
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
        loop {
            ticker.tick().await;
            upkeep.run_upkeep();
        }
    });

    tracing::info!(%addr, "serving metrics");
    Ok(handle)
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(DISPATCH_TOTAL, "Total number of completed dispatches by outcome");
    describe_histogram!(DISPATCH_DURATION_SECONDS, "Dispatch duration in seconds");
    describe_gauge!(DISPATCH_IN_FLIGHT, "Number of dispatches currently running");
    describe_counter!(
        DISPATCH_UNROUTED_TOTAL,
        "Total number of inputs dispatched without a matching handler"
    );
    describe_gauge!(HANDLERS_DISCOVERED, "Number of handler types registered at startup");
}

/// How a dispatch ended, as recorded in the `outcome` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchOutcome {
    /// The method produced a result (possibly substituted by an error block).
    Success,
    /// No handler accepts the input.
    NoHandler,
    /// The handler or a block could not be resolved, or the result type did not match.
    ResolutionFailed,
    /// The method aborted on a lifetime conflict.
    LifetimeConflict,
    /// The handler or a block failed.
    Fault,
}

impl DispatchOutcome {
    /// Classifies a dispatch result.
    #[must_use]
    pub fn of<T>(result: &Result<T, DispatchError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(DispatchError::NoHandlerFound { .. }) => Self::NoHandler,
            Err(DispatchError::LifetimeConflict { .. }) => Self::LifetimeConflict,
            Err(DispatchError::Fault { .. }) => Self::Fault,
            Err(_) => Self::ResolutionFailed,
        }
    }

    /// Returns the label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoHandler => "no_handler",
            Self::ResolutionFailed => "resolution_failed",
            Self::LifetimeConflict => "lifetime_conflict",
            Self::Fault => "fault",
        }
    }
}

/// Records a completed dispatch.
///
/// Updates `nimbus_dispatch_total` and `nimbus_dispatch_duration_seconds`.
pub fn record_dispatch(handler: &str, method: &str, outcome: DispatchOutcome, duration: Duration) {
    counter!(
        DISPATCH_TOTAL,
        "handler" => handler.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(
        DISPATCH_DURATION_SECONDS,
        "handler" => handler.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records an input dispatched without a matching handler.
pub fn record_unrouted(input: &str) {
    counter!(DISPATCH_UNROUTED_TOTAL, "input" => input.to_string()).increment(1);
}

/// Records the number of handler types registered at startup.
pub fn set_handlers_discovered(count: usize) {
    gauge!(HANDLERS_DISCOVERED).set(count as f64);
}

/// Guard that tracks a running dispatch in `nimbus_dispatch_in_flight`.
///
/// The gauge is decremented on drop, including when the dispatch future is
/// cancelled.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(DISPATCH_IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(DISPATCH_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::TypeKey;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.listen_addr.is_none());
        assert!(config.duration_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_disabled_metrics() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_listen_addr() {
        let builder = PrometheusBuilder::new();
        let err = install_with_listener(builder, "not an address").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidAddress(_)));
    }

    #[test]
    fn test_outcome_classification() {
        let ok: Result<(), DispatchError> = Ok(());
        assert_eq!(DispatchOutcome::of(&ok), DispatchOutcome::Success);

        let missing: Result<(), DispatchError> = Err(DispatchError::NoHandlerFound {
            input: TypeKey::of::<u8>(),
        });
        assert_eq!(DispatchOutcome::of(&missing), DispatchOutcome::NoHandler);

        let fault: Result<(), DispatchError> =
            Err(DispatchError::fault("Orders::create", std::fmt::Error));
        assert_eq!(DispatchOutcome::of(&fault).as_str(), "fault");

        let mismatch: Result<(), DispatchError> = Err(DispatchError::ResultTypeMismatch {
            method: "Orders::create".to_string(),
            expected: TypeKey::of::<u8>(),
            actual: TypeKey::of::<u16>(),
        });
        assert_eq!(DispatchOutcome::of(&mismatch), DispatchOutcome::ResolutionFailed);
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_dispatch("Orders", "create", DispatchOutcome::Success, Duration::from_millis(1));
        record_unrouted("Unknown");
        set_handlers_discovered(3);
        let guard = InFlightGuard::new();
        drop(guard);
    }
}
