//! Startup error type.

use nimbus_core::ResolveError;
use nimbus_telemetry::TelemetryError;
use thiserror::Error;

/// Errors that can occur while building a [`Nimbus`](crate::Nimbus) runtime.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The runtime configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] nimbus_config::ConfigError),

    /// Telemetry could not be initialized.
    #[error("telemetry initialization failed: {0}")]
    Telemetry(#[from] TelemetryError),

    /// Handler discovery rejected the catalog.
    #[error("handler discovery failed: {0}")]
    Discovery(#[from] nimbus_core::ConfigError),

    /// A runtime service could not be resolved from the built container.
    #[error("runtime service resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

impl BuildError {
    /// Returns `true` if handler discovery rejected the catalog.
    #[must_use]
    pub const fn is_discovery(&self) -> bool {
        matches!(self, Self::Discovery(_))
    }
}
