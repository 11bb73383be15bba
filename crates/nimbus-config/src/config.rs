//! Main configuration types.
//!
//! This module provides the top-level [`NimbusConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{DispatchConfig, LogFormat, TelemetryConfigSection};

/// Complete Nimbus runtime configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use nimbus_config::NimbusConfig;
///
/// let config = NimbusConfig::default();
/// assert_eq!(config.telemetry.service_name, "nimbus");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct NimbusConfig {
    /// Handler discovery defaults.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Telemetry configuration (logging, metrics).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl NimbusConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use nimbus_config::{DispatchConfig, NimbusConfig};
    /// use nimbus_core::Lifetime;
    ///
    /// let config = NimbusConfig::builder()
    ///     .dispatch(DispatchConfig {
    ///         default_lifetime: Lifetime::Transient,
    ///         ..Default::default()
    ///     })
    ///     .build();
    ///
    /// assert_eq!(config.dispatch.default_lifetime, Lifetime::Transient);
    /// ```
    #[must_use]
    pub fn builder() -> NimbusConfigBuilder {
        NimbusConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The log level is empty
    /// - The service name is empty
    /// - The metrics listen address is not a socket address
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        if self.telemetry.logging.level.trim().is_empty() {
            return Err(crate::ConfigError::invalid_value(
                "telemetry.logging.level",
                "must not be empty",
            ));
        }

        if self.telemetry.service_name.trim().is_empty() {
            return Err(crate::ConfigError::invalid_value(
                "telemetry.service_name",
                "must not be empty",
            ));
        }

        if let Some(addr) = &self.telemetry.metrics.listen_addr {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(crate::ConfigError::invalid_value(
                    "telemetry.metrics.listen_addr",
                    format!("invalid socket address: {addr}"),
                ));
            }
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty, colored debug logs with source locations.
    ///
    /// # Example
    ///
    /// ```
    /// use nimbus_config::NimbusConfig;
    ///
    /// let config = NimbusConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;

        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON info logs without ANSI codes.
    ///
    /// # Example
    ///
    /// ```
    /// use nimbus_config::NimbusConfig;
    ///
    /// let config = NimbusConfig::production();
    /// assert_eq!(config.telemetry.logging.format, nimbus_config::LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;

        config
    }
}

/// Builder for [`NimbusConfig`].
#[derive(Debug, Default)]
pub struct NimbusConfigBuilder {
    dispatch: Option<DispatchConfig>,
    telemetry: Option<TelemetryConfigSection>,
}

impl NimbusConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dispatch configuration.
    #[must_use]
    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> NimbusConfig {
        NimbusConfig {
            dispatch: self.dispatch.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<NimbusConfig, crate::ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
