//! Registration of discovered handlers with the service collection.

use crate::bus::Bus;
use crate::catalog::Catalog;
use crate::descriptor::HandlerDescriptor;
use crate::discovery::{discover, Discovery, DiscoveryOptions};
use nimbus_core::di::ServiceDescriptor;
use nimbus_core::{ConfigError, Lifetime, ServiceCollection};
use nimbus_telemetry::metrics::set_handlers_discovered;
use std::sync::Arc;
use tracing::debug;

/// Discovers the catalog's handlers and registers everything dispatch needs.
///
/// On success the collection gains, in order:
///
/// - each handler type, with its resolved lifetime
/// - each referenced aspect block not yet registered, with its lifetime hint or
///   `Transient`
/// - the shared [`Registry`](crate::Registry), as a singleton
/// - the [`Bus`], as a scoped service bound to the scope resolving it
///
/// On failure the collection is left untouched.
///
/// # Errors
///
/// - [`ConfigError::AlreadyScanned`] if a bus is already registered
/// - [`ConfigError::PreRegisteredHandler`] if a catalog handler is already registered
/// - any discovery error
pub fn scan_and_register(
    catalog: &Catalog,
    services: &mut ServiceCollection,
    options: &DiscoveryOptions,
) -> Result<Vec<Arc<HandlerDescriptor>>, ConfigError> {
    if services.contains_type::<Bus>() {
        return Err(ConfigError::AlreadyScanned);
    }
    if let Some(handler) = catalog.handlers().iter().find(|h| services.contains(h.key())) {
        return Err(ConfigError::PreRegisteredHandler {
            handler: handler.key(),
        });
    }

    let Discovery { registry, blocks } = discover(catalog, services, options)?;

    for handler in registry.handlers() {
        handler.register(services);
    }
    for block in &blocks {
        debug!(
            block = %block.declaration.block(),
            lifetime = %block.lifetime,
            "registering aspect block"
        );
        block.register(services);
    }

    let registry = Arc::new(registry);
    services.add_instance(Arc::clone(&registry));

    let shared = Arc::clone(&registry);
    services.add(ServiceDescriptor::new(Lifetime::Scoped, move |scope| {
        Ok(Bus::new(Arc::clone(&shared), Arc::new(scope.downgrade())))
    }));

    set_handlers_discovered(registry.handlers().len());
    Ok(registry.handlers().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, HandlerSpec};
    use crate::Registry;
    use nimbus_aspects::{AspectDeclaration, NeutralBlock, Position};
    use nimbus_core::{
        BoxFuture, DispatchContext, Fault, Input, InstanceProviderExt, LifetimeDeclaration,
        ResolveError, TypeKey,
    };

    struct Ping;
    impl Input for Ping {
        type Output = &'static str;
    }

    struct Nothing;
    impl Input for Nothing {
        type Output = ();
    }

    #[derive(Default)]
    struct Pinger;
    nimbus_core::inject_default!(Pinger);
    impl Handler for Pinger {
        fn describe(spec: &mut HandlerSpec<Self>) {
            spec.lifetime(LifetimeDeclaration::transient());
            spec.handle_sync("ping", |_, _: Ping| Ok("pong")).aspect(
                AspectDeclaration::neutral::<Trace>(Position::Pre).with_lifetime(Lifetime::Singleton),
            );
        }
    }

    #[derive(Default)]
    struct Broken;
    nimbus_core::inject_default!(Broken);
    impl Handler for Broken {
        fn describe(spec: &mut HandlerSpec<Self>) {
            spec.handle_sync("first", |_, _: Nothing| Ok(()))
                .lifetime(LifetimeDeclaration::singleton());
            spec.handle_sync("second", |_, _: Ping| Ok("x"))
                .lifetime(LifetimeDeclaration::transient());
        }
    }

    #[derive(Default)]
    struct Trace;
    nimbus_core::inject_default!(Trace);
    impl NeutralBlock for Trace {
        fn execute<'a>(&'a self, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), Fault>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn options() -> DiscoveryOptions {
        DiscoveryOptions::default()
    }

    #[test]
    fn test_registers_handlers_blocks_and_bus() {
        let mut services = ServiceCollection::new();
        let handlers =
            scan_and_register(&Catalog::new().handler::<Pinger>(), &mut services, &options())
                .unwrap();

        assert_eq!(handlers.len(), 1);
        assert_eq!(
            services.lifetime_of(TypeKey::of::<Pinger>()),
            Some(Lifetime::Transient)
        );
        assert_eq!(
            services.lifetime_of(TypeKey::of::<Trace>()),
            Some(Lifetime::Singleton)
        );
        assert_eq!(
            services.lifetime_of(TypeKey::of::<Registry>()),
            Some(Lifetime::Singleton)
        );
        assert_eq!(services.lifetime_of(TypeKey::of::<Bus>()), Some(Lifetime::Scoped));
    }

    #[tokio::test]
    async fn test_bus_resolves_from_scope() {
        let mut services = ServiceCollection::new();
        scan_and_register(&Catalog::new().handler::<Pinger>(), &mut services, &options()).unwrap();
        let container = services.build();

        let scope = container.create_scope();
        let bus = scope.get_required::<Bus>().unwrap();
        assert_eq!(bus.dispatch(Ping).await.unwrap(), "pong");

        let again = scope.get_required::<Bus>().unwrap();
        assert!(Arc::ptr_eq(&bus, &again));
    }

    #[test]
    fn test_root_scope_has_no_bus() {
        let mut services = ServiceCollection::new();
        scan_and_register(&Catalog::new().handler::<Pinger>(), &mut services, &options()).unwrap();
        let container = services.build();

        let err = container.root_scope().get_required::<Bus>().unwrap_err();
        assert!(matches!(err, ResolveError::ScopeRequired { .. }));
    }

    #[test]
    fn test_second_scan_fails() {
        let mut services = ServiceCollection::new();
        let catalog = Catalog::new().handler::<Pinger>();
        scan_and_register(&catalog, &mut services, &options()).unwrap();
        let registered = services.len();

        let err = scan_and_register(&catalog, &mut services, &options()).unwrap_err();
        assert_eq!(err, ConfigError::AlreadyScanned);
        assert_eq!(services.len(), registered);
    }

    #[test]
    fn test_pre_registered_handler_fails() {
        let mut services = ServiceCollection::new();
        services.add_injectable::<Pinger>(Lifetime::Singleton);

        let err = scan_and_register(&Catalog::new().handler::<Pinger>(), &mut services, &options())
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::PreRegisteredHandler {
                handler: TypeKey::of::<Pinger>()
            }
        );
        assert_eq!(services.len(), 1);
    }

    #[test]
    fn test_failed_discovery_registers_nothing() {
        let mut services = ServiceCollection::new();
        let catalog = Catalog::new().handler::<Pinger>().handler::<Broken>();

        let err = scan_and_register(&catalog, &mut services, &options()).unwrap_err();
        assert!(matches!(err, ConfigError::InconsistentLifetimes { .. }));
        assert!(services.is_empty());
    }
}
