//! Handler discovery.
//!
//! Turns a [`Catalog`] into a [`Registry`] of immutable descriptors with
//! compiled launchers. Discovery is all-or-nothing: it either returns every
//! handler or the first configuration error, and never touches the service
//! collection it inspects.

use crate::catalog::{Catalog, HandlerType};
use crate::descriptor::{HandlerDescriptor, PendingMethod};
use crate::launcher::{Launcher, LifetimeAbort};
use crate::registry::Registry;
use indexmap::map::Entry;
use indexmap::IndexMap;
use nimbus_aspects::matrix::{self, AspectMatrix, BaseMatrix, MethodSignature};
use nimbus_aspects::{AspectDeclaration, AspectScope};
use nimbus_core::lifetime::{check_compatibility, resolve_method_lifetimes, Compatibility};
use nimbus_core::{
    CompatibilityMode, ConfigError, Lifetime, LifetimeDeclaration, LifetimeInheritance,
    ServiceCollection, TypeKey,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How lifetimes are resolved during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveryOptions {
    /// Applied to handlers and methods without a declaration of their own.
    pub default_lifetime: LifetimeDeclaration,
    /// How method lifetimes inherit from the type and from preceding methods.
    pub inheritance: LifetimeInheritance,
}

impl DiscoveryOptions {
    /// Sets the default lifetime declaration.
    #[must_use]
    pub const fn with_default_lifetime(mut self, declaration: LifetimeDeclaration) -> Self {
        self.default_lifetime = declaration;
        self
    }

    /// Sets the lifetime inheritance policy.
    #[must_use]
    pub const fn with_inheritance(mut self, inheritance: LifetimeInheritance) -> Self {
        self.inheritance = inheritance;
        self
    }
}

/// An aspect block that discovery found unregistered.
#[derive(Debug, Clone)]
pub struct BlockRegistration {
    /// The first declaration referencing the block.
    pub declaration: AspectDeclaration,
    /// The lifetime to register it with.
    pub lifetime: Lifetime,
}

impl BlockRegistration {
    /// Registers the block with the service collection.
    pub fn register(&self, services: &mut ServiceCollection) {
        self.declaration.register(services, self.lifetime);
    }
}

/// The output of a successful discovery.
#[derive(Debug)]
pub struct Discovery {
    /// The discovered handlers and their input index.
    pub registry: Registry,
    /// Blocks referenced by some matrix but absent from the service collection.
    pub blocks: Vec<BlockRegistration>,
}

/// Discovers every handler in the catalog.
///
/// `services` is only read, to find the registered lifetimes of aspect blocks.
pub fn discover(
    catalog: &Catalog,
    services: &ServiceCollection,
    options: &DiscoveryOptions,
) -> Result<Discovery, ConfigError> {
    warn_unattached(catalog.aspects(), AspectScope::Global, None);

    let mut blocks = BlockLifetimes::new(services);
    let handlers = catalog
        .handlers()
        .iter()
        .map(|handler| discover_handler(*handler, catalog.aspects(), options, &mut blocks))
        .collect::<Result<Vec<_>, _>>()?;

    let registry = Registry::new(handlers)?;
    let blocks = blocks.into_registrations();

    info!(
        handlers = registry.handlers().len(),
        methods = registry.index().len(),
        blocks = blocks.len(),
        "handler discovery complete"
    );

    Ok(Discovery { registry, blocks })
}

fn discover_handler(
    handler_type: HandlerType,
    global: &[AspectDeclaration],
    options: &DiscoveryOptions,
    blocks: &mut BlockLifetimes<'_>,
) -> Result<Arc<HandlerDescriptor>, ConfigError> {
    let blueprint = handler_type.blueprint();
    let handler = blueprint.handler;
    let type_level = blueprint.lifetime.unwrap_or(options.default_lifetime);

    if blueprint.methods.is_empty() {
        warn!(handler = %handler, "handler declares no dispatchable methods");
    }
    warn_unattached(&blueprint.aspects, AspectScope::Handler, Some(handler));
    for filter in AspectMatrix::from_declarations(&blueprint.aspects).input_filter {
        warn!(
            handler = %handler,
            block = %filter.block(),
            "handler-scope input filters are not applied"
        );
    }

    let declared: Vec<_> = blueprint
        .methods
        .iter()
        .map(|m| m.declared_lifetime())
        .collect();
    let resolved = resolve_method_lifetimes(
        blueprint.lifetime,
        &declared,
        options.default_lifetime,
        options.inheritance,
    );

    let lifetime = resolved.first().map_or(type_level.lifetime, |d| d.lifetime);
    if resolved.iter().any(|d| d.lifetime != lifetime) {
        return Err(ConfigError::InconsistentLifetimes {
            handler,
            methods: blueprint
                .methods
                .iter()
                .zip(&resolved)
                .map(|(m, d)| (m.name(), d.lifetime))
                .collect(),
        });
    }

    let base = BaseMatrix::new(global, &blueprint.aspects);
    let mut methods = Vec::with_capacity(blueprint.methods.len());

    for (spec, declaration) in blueprint.methods.iter().zip(resolved) {
        let method = format!("{}::{}", handler.short_name(), spec.name());

        if spec.declared_output() != spec.output() && !spec.declared_output().is_unit() {
            return Err(ConfigError::OutputMismatch {
                method,
                input: spec.input(),
                expected: spec.declared_output(),
                actual: spec.output(),
            });
        }

        warn_unattached(spec.aspects(), AspectScope::Method, Some(handler));

        let signature = MethodSignature::new(spec.input(), spec.output());
        let own = AspectMatrix::from_declarations(spec.aspects());
        if let Some((block, expected)) = own.incompatible_transform(signature) {
            return Err(ConfigError::IncompatibleTransform {
                method,
                block: block.block(),
                subject: block.subject().unwrap_or(expected),
                expected,
            });
        }

        let matrix = matrix::resolve(spec.aspects(), &base, signature);
        let abort = check_block_lifetimes(&method, lifetime, declaration.compatibility, &matrix, blocks)?;
        let launcher = Launcher::compile(
            method.clone(),
            handler,
            spec.output(),
            &matrix,
            spec.invoker(),
            abort,
        );

        debug!(
            method = %method,
            input = %spec.input(),
            lifetime = %lifetime,
            blocks = matrix.len(),
            aborting = abort.is_some(),
            "discovered handler method"
        );

        methods.push(PendingMethod {
            handler,
            name: spec.name(),
            qualified_name: method,
            input: spec.input(),
            output: spec.output(),
            lifetime,
            compatibility: declaration.compatibility,
            matrix,
            launcher,
        });
    }

    Ok(HandlerDescriptor::new(
        handler_type,
        lifetime,
        type_level.compatibility,
        base,
        methods,
    ))
}

fn check_block_lifetimes(
    method: &str,
    handler_lifetime: Lifetime,
    mode: CompatibilityMode,
    matrix: &AspectMatrix,
    blocks: &mut BlockLifetimes<'_>,
) -> Result<Option<LifetimeAbort>, ConfigError> {
    let mut abort = None;

    for (phase, declaration) in matrix.iter() {
        let block = declaration.block();
        let block_lifetime = blocks.effective(declaration);

        match check_compatibility(handler_lifetime, block_lifetime, mode) {
            Compatibility::Compatible => {}
            Compatibility::Tolerated => {
                debug!(
                    method,
                    block = %block,
                    phase = phase.as_str(),
                    %handler_lifetime,
                    %block_lifetime,
                    "tolerating lifetime mismatch"
                );
            }
            Compatibility::Deferred => {
                warn!(
                    method,
                    block = %block,
                    %handler_lifetime,
                    %block_lifetime,
                    "lifetime mismatch, every call will fail"
                );
                abort.get_or_insert(LifetimeAbort {
                    handler_lifetime,
                    block,
                    block_lifetime,
                });
            }
            Compatibility::Rejected => {
                return Err(ConfigError::LifetimeConflict {
                    method: method.to_string(),
                    handler_lifetime,
                    block,
                    block_lifetime,
                });
            }
        }
    }

    Ok(abort)
}

fn warn_unattached(declarations: &[AspectDeclaration], scope: AspectScope, handler: Option<TypeKey>) {
    for declaration in AspectMatrix::unattached(declarations) {
        warn!(
            scope = scope.as_str(),
            handler = handler.map(|h| h.short_name()),
            block = %declaration.block(),
            "aspect declaration without a position is ignored"
        );
    }
}

/// Effective lifetimes of aspect blocks, staging the unregistered ones.
struct BlockLifetimes<'a> {
    services: &'a ServiceCollection,
    staged: IndexMap<TypeKey, BlockRegistration>,
}

impl<'a> BlockLifetimes<'a> {
    fn new(services: &'a ServiceCollection) -> Self {
        Self {
            services,
            staged: IndexMap::new(),
        }
    }

    /// Registered lifetime, else the first hint seen, else `Transient`.
    fn effective(&mut self, declaration: &AspectDeclaration) -> Lifetime {
        let block = declaration.block();
        if let Some(lifetime) = self.services.lifetime_of(block) {
            return lifetime;
        }
        let hint = declaration.lifetime();
        match self.staged.entry(block) {
            Entry::Occupied(staged) => {
                let lifetime = staged.get().lifetime;
                if let Some(ignored) = hint.filter(|hint| *hint != lifetime) {
                    warn!(
                        block = %block,
                        %lifetime,
                        %ignored,
                        "conflicting lifetime hint for block, keeping the first"
                    );
                }
                lifetime
            }
            Entry::Vacant(slot) => {
                slot.insert(BlockRegistration {
                    declaration: declaration.clone(),
                    lifetime: hint.unwrap_or(Lifetime::Transient),
                })
                .lifetime
            }
        }
    }

    fn into_registrations(self) -> Vec<BlockRegistration> {
        self.staged.into_values().collect()
    }
}
