//! Typed, layered configuration for Nimbus.
//!
//! Configuration is assembled from layers, each overriding the previous one:
//!
//! 1. built-in defaults (or the `development` / `production` presets)
//! 2. a TOML or JSON file
//! 3. environment variables of the form `PREFIX__SECTION__KEY`
//!
//! Every section rejects unknown fields, so a misspelled key fails loading
//! instead of silently falling back to a default.
//!
//! # Example
//!
//! ```toml
//! [dispatch]
//! default_lifetime = "scoped"
//! default_compatibility = "enforce"
//! lifetime_inheritance = "type_level"
//!
//! [telemetry]
//! service_name = "orders"
//!
//! [telemetry.logging]
//! level = "info,nimbus_dispatch=debug"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = true
//! listen_addr = "0.0.0.0:9464"
//! ```
//!
//! ```no_run
//! use nimbus_config::ConfigLoader;
//!
//! # fn main() -> Result<(), nimbus_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("nimbus.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix("NIMBUS")
//!     .load()?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{NimbusConfig, NimbusConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{DispatchConfig, LogFormat, LoggingConfig, MetricsSection, TelemetryConfigSection};

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::{CompatibilityMode, Lifetime, LifetimeInheritance};

    #[test]
    fn test_complete_toml_config() {
        let toml = r#"
            [dispatch]
            default_lifetime = "transient"
            default_compatibility = "abort"
            lifetime_inheritance = "sequential"

            [telemetry]
            service_name = "orders"

            [telemetry.logging]
            enabled = true
            level = "info,nimbus_dispatch=debug"
            format = "pretty"
            ansi_enabled = true
            include_location = true

            [telemetry.metrics]
            enabled = false
            listen_addr = "0.0.0.0:9464"
        "#;

        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.dispatch.default_lifetime, Lifetime::Transient);
        assert_eq!(config.dispatch.default_compatibility, CompatibilityMode::Abort);
        assert_eq!(
            config.dispatch.lifetime_inheritance,
            LifetimeInheritance::Sequential
        );
        assert_eq!(config.telemetry.service_name, "orders");
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
        assert!(config.telemetry.logging.include_location);
        assert!(!config.telemetry.metrics.enabled);

        let telemetry = config.telemetry.to_telemetry_config();
        assert!(!telemetry.metrics.enabled);
        assert_eq!(telemetry.logging.level, "info,nimbus_dispatch=debug");
    }
}
