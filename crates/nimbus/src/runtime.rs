//! The assembled runtime and its builder.

use crate::error::BuildError;
use nimbus_aspects::AspectDeclaration;
use nimbus_config::{DispatchConfig, NimbusConfig};
use nimbus_core::{Container, InstanceProviderExt, ResolveError, Scope, ServiceCollection};
use nimbus_dispatch::{
    scan_and_register, Bus, Catalog, DiscoveryOptions, Handler, HandlerDescriptor, Registry,
};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// A built dispatch runtime: the container plus the shared registry.
///
/// Create one per process with [`Nimbus::builder`], then open a [`Scope`] per
/// logical request and dispatch through that scope's [`Bus`].
///
/// # Example
///
/// ```rust,ignore
/// let nimbus = Nimbus::builder()
///     .config(ConfigLoader::new().with_env_prefix("NIMBUS").load()?)
///     .handler::<Orders>()
///     .services(|services| {
///         services.add_instance(Arc::new(Database::connect()?));
///     })
///     .build()?;
///
/// let scope = nimbus.scope();
/// let bus = nimbus.bus(&scope)?;
/// let id = bus.dispatch(PlaceOrder { sku: "A-1".into() }).await?;
/// ```
pub struct Nimbus {
    config: NimbusConfig,
    container: Container,
    registry: Arc<Registry>,
}

impl Nimbus {
    /// Creates a new runtime builder.
    #[must_use]
    pub fn builder() -> NimbusBuilder {
        NimbusBuilder::new()
    }

    /// Opens a new scope, one per logical request.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.container.create_scope()
    }

    /// Returns the bus bound to `scope`.
    ///
    /// The same scope always yields the same bus.
    pub fn bus(&self, scope: &Scope) -> Result<Arc<Bus>, ResolveError> {
        scope.get_required::<Bus>()
    }

    /// Returns the discovered handlers in discovery order.
    #[must_use]
    pub fn handlers(&self) -> &[Arc<HandlerDescriptor>] {
        self.registry.handlers()
    }

    /// Returns the shared registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns the underlying container.
    #[must_use]
    pub const fn container(&self) -> &Container {
        &self.container
    }

    /// Returns the configuration the runtime was built with.
    #[must_use]
    pub const fn config(&self) -> &NimbusConfig {
        &self.config
    }
}

impl fmt::Debug for Nimbus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nimbus")
            .field("service_name", &self.config.telemetry.service_name)
            .field("handlers", &self.registry.handlers().len())
            .field("methods", &self.registry.index().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Nimbus`].
pub struct NimbusBuilder {
    config: NimbusConfig,
    catalog: Catalog,
    services: ServiceCollection,
    init_telemetry: bool,
}

impl Default for NimbusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NimbusBuilder {
    /// Creates a builder with the default configuration and an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: NimbusConfig::default(),
            catalog: Catalog::new(),
            services: ServiceCollection::new(),
            init_telemetry: false,
        }
    }

    /// Sets the runtime configuration.
    #[must_use]
    pub fn config(mut self, config: NimbusConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a handler type to the catalog.
    #[must_use]
    pub fn handler<H: Handler>(mut self) -> Self {
        self.catalog = self.catalog.handler::<H>();
        self
    }

    /// Adds every handler submitted with [`submit_handler!`](crate::submit_handler).
    #[must_use]
    pub fn collected_handlers(mut self) -> Self {
        self.catalog = self.catalog.with_collected();
        self
    }

    /// Adds a global aspect declaration.
    #[must_use]
    pub fn aspect(mut self, declaration: AspectDeclaration) -> Self {
        self.catalog = self.catalog.aspect(declaration);
        self
    }

    /// Registers host services the handlers and blocks depend on.
    ///
    /// Blocks registered here keep their lifetime; discovery only registers the
    /// blocks it finds missing.
    #[must_use]
    pub fn services<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut ServiceCollection),
    {
        configure(&mut self.services);
        self
    }

    /// Initializes logging and metrics from the configuration on build.
    ///
    /// Off by default; leave it off when the host installs its own subscriber.
    #[must_use]
    pub const fn init_telemetry(mut self, enabled: bool) -> Self {
        self.init_telemetry = enabled;
        self
    }

    /// Validates the configuration, discovers the handlers and builds the container.
    pub fn build(self) -> Result<Nimbus, BuildError> {
        let Self {
            config,
            catalog,
            mut services,
            init_telemetry,
        } = self;

        config.validate()?;
        if init_telemetry {
            nimbus_telemetry::init_telemetry(&config.telemetry.to_telemetry_config())?;
        }

        let handlers = scan_and_register(&catalog, &mut services, &discovery_options(&config.dispatch))?;
        let container = services.build();
        let registry = container.root_scope().get_required::<Registry>()?;

        info!(
            service = %config.telemetry.service_name,
            handlers = handlers.len(),
            methods = registry.index().len(),
            "nimbus runtime built"
        );

        Ok(Nimbus {
            config,
            container,
            registry,
        })
    }
}

impl fmt::Debug for NimbusBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NimbusBuilder")
            .field("config", &self.config)
            .field("handlers", &self.catalog.len())
            .field("services", &self.services.len())
            .field("init_telemetry", &self.init_telemetry)
            .finish()
    }
}

/// Maps the dispatch section onto discovery options.
#[must_use]
pub fn discovery_options(config: &DispatchConfig) -> DiscoveryOptions {
    DiscoveryOptions::default()
        .with_default_lifetime(config.default_declaration())
        .with_inheritance(config.lifetime_inheritance)
}
