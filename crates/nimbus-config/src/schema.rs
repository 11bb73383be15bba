//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use nimbus_core::{CompatibilityMode, Lifetime, LifetimeDeclaration, LifetimeInheritance};
use nimbus_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

/// Dispatch configuration section.
///
/// Controls the defaults handler discovery applies to handlers and methods
/// that declare no lifetime of their own.
///
/// # Example
///
/// ```
/// use nimbus_config::DispatchConfig;
/// use nimbus_core::Lifetime;
///
/// let config: DispatchConfig = toml::from_str(r#"default_lifetime = "transient""#).unwrap();
/// assert_eq!(config.default_lifetime, Lifetime::Transient);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Lifetime of handlers and methods without a declaration.
    #[serde(default)]
    pub default_lifetime: Lifetime,

    /// Compatibility mode paired with the default lifetime.
    #[serde(default)]
    pub default_compatibility: CompatibilityMode,

    /// How method lifetimes inherit from the type and from preceding methods.
    #[serde(default)]
    pub lifetime_inheritance: LifetimeInheritance,
}

impl DispatchConfig {
    /// Returns the default lifetime as a declaration.
    #[must_use]
    pub const fn default_declaration(&self) -> LifetimeDeclaration {
        LifetimeDeclaration::new(self.default_lifetime, self.default_compatibility)
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (e.g. "info" or "nimbus_dispatch=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Converts this section into the telemetry crate's logging configuration.
    #[must_use]
    pub fn to_log_config(&self, service_name: &str) -> LogConfig {
        let base = match self.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            json_format: self.format == LogFormat::Json,
            ansi: self.ansi_enabled,
            file_line_info: self.include_location,
            service_name: service_name.to_string(),
            ..base
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to serve `/metrics` on. Without one, metrics are only rendered
    /// on demand.
    #[serde(default)]
    pub listen_addr: Option<String>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: None,
        }
    }
}

impl MetricsSection {
    /// Converts this section into the telemetry crate's metrics configuration.
    #[must_use]
    pub fn to_metrics_config(&self, service_name: &str) -> MetricsConfig {
        MetricsConfig {
            enabled: self.enabled,
            listen_addr: self.listen_addr.clone(),
            service_name: service_name.to_string(),
            ..MetricsConfig::default()
        }
    }
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name for telemetry identification.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            metrics: MetricsSection::default(),
        }
    }
}

impl TelemetryConfigSection {
    /// Converts this section into a [`TelemetryConfig`] ready for
    /// [`init_telemetry`](nimbus_telemetry::init_telemetry).
    #[must_use]
    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig::builder()
            .service_name(&self.service_name)
            .logging(self.logging.to_log_config(&self.service_name))
            .metrics(self.metrics.to_metrics_config(&self.service_name))
            .build()
    }
}

fn default_service_name() -> String {
    "nimbus".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_config_default() {
        let config = DispatchConfig::default();
        assert_eq!(config.default_lifetime, Lifetime::Scoped);
        assert_eq!(config.default_compatibility, CompatibilityMode::Enforce);
        assert_eq!(config.lifetime_inheritance, LifetimeInheritance::TypeLevel);
        assert_eq!(config.default_declaration(), LifetimeDeclaration::scoped());
    }

    #[test]
    fn test_dispatch_config_deserialize() {
        let toml = r#"
            default_lifetime = "singleton"
            default_compatibility = "abort"
            lifetime_inheritance = "sequential"
        "#;
        let config: DispatchConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config.default_declaration(),
            LifetimeDeclaration::singleton().with_compatibility(CompatibilityMode::Abort)
        );
        assert_eq!(config.lifetime_inheritance, LifetimeInheritance::Sequential);
    }

    #[test]
    fn test_dispatch_config_rejects_unknown_fields() {
        let result: Result<DispatchConfig, _> = toml::from_str("default_lifespan = \"scoped\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(config.enabled);
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, LogFormat::Pretty);
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), "\"json\"");
    }

    #[test]
    fn test_to_log_config() {
        let section = LoggingConfig {
            level: "nimbus_dispatch=trace".to_string(),
            format: LogFormat::Pretty,
            ansi_enabled: true,
            include_location: true,
            ..LoggingConfig::default()
        };
        let config = section.to_log_config("orders");
        assert_eq!(config.level, "nimbus_dispatch=trace");
        assert!(!config.json_format);
        assert!(config.ansi);
        assert!(config.file_line_info);
        assert_eq!(config.service_name, "orders");
    }

    #[test]
    fn test_to_metrics_config() {
        let section = MetricsSection {
            enabled: true,
            listen_addr: Some("127.0.0.1:9464".to_string()),
        };
        let config = section.to_metrics_config("orders");
        assert_eq!(config.listen_addr.as_deref(), Some("127.0.0.1:9464"));
        assert_eq!(config.service_name, "orders");
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_to_telemetry_config_propagates_service_name() {
        let section = TelemetryConfigSection {
            service_name: "billing".to_string(),
            ..TelemetryConfigSection::default()
        };
        let config = section.to_telemetry_config();
        assert_eq!(config.service_name, "billing");
        assert_eq!(config.logging.service_name, "billing");
        assert_eq!(config.metrics.service_name, "billing");
    }
}
