//! The set of handler types and global aspects to discover.
//!
//! Handlers are either listed explicitly with [`Catalog::handler`], or submitted
//! at link time with [`submit_handler!`](crate::submit_handler) and gathered by
//! [`Catalog::collected`].
//!
//! # Example
//!
//! ```rust,ignore
//! use nimbus_dispatch::{submit_handler, Catalog};
//!
//! submit_handler!(Orders, Invoices);
//!
//! let catalog = Catalog::collected().aspect(AspectDeclaration::neutral::<Audit>(Position::Pre));
//! ```

use crate::handler::{Handler, HandlerBlueprint};
use nimbus_aspects::AspectDeclaration;
use nimbus_core::{Lifetime, ServiceCollection, TypeKey};
use std::fmt;

/// Type-erased entry points of one handler type.
#[derive(Clone, Copy)]
pub struct HandlerType {
    key: TypeKey,
    blueprint: fn() -> HandlerBlueprint,
    register: fn(&mut ServiceCollection, Lifetime),
}

impl HandlerType {
    /// Returns the entry points of `H`.
    #[must_use]
    pub fn of<H: Handler>() -> Self {
        Self {
            key: TypeKey::of::<H>(),
            blueprint: HandlerBlueprint::of::<H>,
            register: register_handler::<H>,
        }
    }

    /// Returns the handler type.
    #[must_use]
    pub const fn key(&self) -> TypeKey {
        self.key
    }

    /// Materialises the handler's declarations.
    #[must_use]
    pub fn blueprint(&self) -> HandlerBlueprint {
        (self.blueprint)()
    }

    /// Registers the handler type with the given lifetime.
    pub fn register(&self, services: &mut ServiceCollection, lifetime: Lifetime) {
        (self.register)(services, lifetime);
    }
}

impl PartialEq for HandlerType {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for HandlerType {}

impl fmt::Debug for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerType").field(&self.key).finish()
    }
}

fn register_handler<H: Handler>(services: &mut ServiceCollection, lifetime: Lifetime) {
    services.add_injectable::<H>(lifetime);
}

/// A handler submitted at link time.
///
/// Created by [`submit_handler!`](crate::submit_handler); not meant to be built
/// by hand.
#[derive(Debug)]
pub struct HandlerRegistration {
    handler: fn() -> HandlerType,
}

impl HandlerRegistration {
    /// Creates the registration of `H`.
    #[must_use]
    pub const fn new<H: Handler>() -> Self {
        Self {
            handler: HandlerType::of::<H>,
        }
    }

    /// Returns the registered handler type.
    #[must_use]
    pub fn handler(&self) -> HandlerType {
        (self.handler)()
    }
}

inventory::collect!(HandlerRegistration);

/// Submits handler types for discovery through [`Catalog::collected`].
///
/// # Example
///
/// ```rust,ignore
/// nimbus_dispatch::submit_handler!(Orders);
/// nimbus_dispatch::submit_handler!(Invoices, Refunds);
/// ```
#[macro_export]
macro_rules! submit_handler {
    ($($handler:ty),+ $(,)?) => {
        $(
            $crate::inventory::submit! {
                $crate::HandlerRegistration::new::<$handler>()
            }
        )+
    };
}

/// Handler types and global aspect declarations, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    handlers: Vec<HandlerType>,
    aspects: Vec<AspectDeclaration>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog of every handler submitted with
    /// [`submit_handler!`](crate::submit_handler).
    ///
    /// Link order is unspecified, so collected handlers are sorted by type name.
    #[must_use]
    pub fn collected() -> Self {
        Self::new().with_collected()
    }

    /// Adds every submitted handler not already in the catalog.
    #[must_use]
    pub fn with_collected(mut self) -> Self {
        let mut collected: Vec<HandlerType> = inventory::iter::<HandlerRegistration>
            .into_iter()
            .map(HandlerRegistration::handler)
            .collect();
        collected.sort_by_key(|h| h.key().name());
        for handler in collected {
            self = self.add(handler);
        }
        self
    }

    /// Adds handler type `H`.
    #[must_use]
    pub fn handler<H: Handler>(self) -> Self {
        self.add(HandlerType::of::<H>())
    }

    /// Adds a handler type. Adding the same type twice has no effect.
    #[must_use]
    pub fn add(mut self, handler: HandlerType) -> Self {
        if !self.contains(handler.key()) {
            self.handlers.push(handler);
        }
        self
    }

    /// Adds a global aspect, applied to every handler method.
    #[must_use]
    pub fn aspect(mut self, declaration: AspectDeclaration) -> Self {
        self.aspects.push(declaration);
        self
    }

    /// Returns whether the catalog lists the handler type.
    #[must_use]
    pub fn contains(&self, handler: TypeKey) -> bool {
        self.handlers.iter().any(|h| h.key() == handler)
    }

    /// Returns the handler types in discovery order.
    #[must_use]
    pub fn handlers(&self) -> &[HandlerType] {
        &self.handlers
    }

    /// Returns the global aspect declarations.
    #[must_use]
    pub fn aspects(&self) -> &[AspectDeclaration] {
        &self.aspects
    }

    /// Returns the number of handler types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns whether the catalog lists no handler types.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerSpec;
    use nimbus_core::Input;

    struct Ping;
    impl Input for Ping {
        type Output = ();
    }

    struct Pong;
    impl Input for Pong {
        type Output = ();
    }

    #[derive(Default)]
    struct Submitted;
    nimbus_core::inject_default!(Submitted);

    impl Handler for Submitted {
        fn describe(spec: &mut HandlerSpec<Self>) {
            spec.handle_sync("ping", |_, _: Ping| Ok(()));
        }
    }

    #[derive(Default)]
    struct Listed;
    nimbus_core::inject_default!(Listed);

    impl Handler for Listed {
        fn describe(spec: &mut HandlerSpec<Self>) {
            spec.handle_sync("pong", |_, _: Pong| Ok(()));
        }
    }

    crate::submit_handler!(Submitted);

    #[test]
    fn test_handler_is_deduplicated() {
        let catalog = Catalog::new()
            .handler::<Listed>()
            .handler::<Submitted>()
            .handler::<Listed>();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.handlers()[0].key(), TypeKey::of::<Listed>());
    }

    #[test]
    fn test_collected_includes_submitted() {
        let catalog = Catalog::collected();
        assert!(catalog.contains(TypeKey::of::<Submitted>()));
        assert!(!catalog.contains(TypeKey::of::<Listed>()));
    }

    #[test]
    fn test_with_collected_keeps_explicit_order() {
        let catalog = Catalog::new()
            .handler::<Listed>()
            .handler::<Submitted>()
            .with_collected();
        assert_eq!(catalog.handlers()[0].key(), TypeKey::of::<Listed>());
        assert_eq!(
            catalog
                .handlers()
                .iter()
                .filter(|h| h.key() == TypeKey::of::<Submitted>())
                .count(),
            1
        );
    }

    #[test]
    fn test_handler_type_registers_service() {
        let mut services = ServiceCollection::new();
        HandlerType::of::<Listed>().register(&mut services, Lifetime::Scoped);
        assert_eq!(
            services.lifetime_of(TypeKey::of::<Listed>()),
            Some(Lifetime::Scoped)
        );
    }

    #[test]
    fn test_blueprint_through_handler_type() {
        let blueprint = HandlerType::of::<Listed>().blueprint();
        assert_eq!(blueprint.methods.len(), 1);
        assert_eq!(blueprint.methods[0].name(), "pong");
    }
}
