//! Immutable descriptions of discovered handlers and their methods.

use crate::catalog::HandlerType;
use crate::launcher::Launcher;
use nimbus_aspects::{AspectMatrix, BaseMatrix};
use nimbus_core::{CompatibilityMode, Lifetime, ServiceCollection, TypeKey};
use std::fmt;
use std::sync::{Arc, Weak};

/// A discovered handler type.
pub struct HandlerDescriptor {
    handler: HandlerType,
    lifetime: Lifetime,
    compatibility: CompatibilityMode,
    base: BaseMatrix,
    methods: Vec<Arc<HandlerMethodDescriptor>>,
}

impl HandlerDescriptor {
    /// Builds a descriptor whose methods refer back to it.
    pub(crate) fn new(
        handler: HandlerType,
        lifetime: Lifetime,
        compatibility: CompatibilityMode,
        base: BaseMatrix,
        methods: Vec<PendingMethod>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|owner| Self {
            handler,
            lifetime,
            compatibility,
            base,
            methods: methods
                .into_iter()
                .map(|m| Arc::new(m.attach(owner.clone())))
                .collect(),
        })
    }

    /// Returns the handler type.
    #[must_use]
    pub const fn handler(&self) -> TypeKey {
        self.handler.key()
    }

    /// Returns the handler's lifetime, shared by all of its methods.
    #[must_use]
    pub const fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Returns the type-level compatibility mode.
    #[must_use]
    pub const fn compatibility(&self) -> CompatibilityMode {
        self.compatibility
    }

    /// Returns the global and handler-scope aspects.
    #[must_use]
    pub const fn base_matrix(&self) -> &BaseMatrix {
        &self.base
    }

    /// Returns the methods in declaration order.
    #[must_use]
    pub fn methods(&self) -> &[Arc<HandlerMethodDescriptor>] {
        &self.methods
    }

    /// Returns the method named `name`.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Arc<HandlerMethodDescriptor>> {
        self.methods.iter().find(|m| m.name() == name)
    }

    /// Registers the handler type with its lifetime.
    pub fn register(&self, services: &mut ServiceCollection) {
        self.handler.register(services, self.lifetime);
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("handler", &self.handler())
            .field("lifetime", &self.lifetime)
            .field("compatibility", &self.compatibility)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// A method awaiting its owning descriptor.
pub(crate) struct PendingMethod {
    pub handler: TypeKey,
    pub name: &'static str,
    pub qualified_name: String,
    pub input: TypeKey,
    pub output: TypeKey,
    pub lifetime: Lifetime,
    pub compatibility: CompatibilityMode,
    pub matrix: AspectMatrix,
    pub launcher: Launcher,
}

impl PendingMethod {
    fn attach(self, owner: Weak<HandlerDescriptor>) -> HandlerMethodDescriptor {
        HandlerMethodDescriptor {
            owner,
            handler: self.handler,
            name: self.name,
            qualified_name: self.qualified_name,
            input: self.input,
            output: self.output,
            lifetime: self.lifetime,
            compatibility: self.compatibility,
            matrix: self.matrix,
            launcher: self.launcher,
        }
    }
}

/// A discovered handler method.
pub struct HandlerMethodDescriptor {
    owner: Weak<HandlerDescriptor>,
    handler: TypeKey,
    name: &'static str,
    qualified_name: String,
    input: TypeKey,
    output: TypeKey,
    lifetime: Lifetime,
    compatibility: CompatibilityMode,
    matrix: AspectMatrix,
    launcher: Launcher,
}

impl HandlerMethodDescriptor {
    /// Returns the owning handler descriptor, unless it has been dropped.
    #[must_use]
    pub fn handler_descriptor(&self) -> Option<Arc<HandlerDescriptor>> {
        self.owner.upgrade()
    }

    /// Returns the handler type.
    #[must_use]
    pub const fn handler(&self) -> TypeKey {
        self.handler
    }

    /// Returns the method name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `Handler::method`.
    #[must_use]
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Returns the accepted input type.
    #[must_use]
    pub const fn input(&self) -> TypeKey {
        self.input
    }

    /// Returns the method's return type.
    #[must_use]
    pub const fn output(&self) -> TypeKey {
        self.output
    }

    /// Returns whether callers receive no result.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.output.is_unit()
    }

    /// Returns the resolved method lifetime.
    #[must_use]
    pub const fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Returns the method's compatibility mode.
    #[must_use]
    pub const fn compatibility(&self) -> CompatibilityMode {
        self.compatibility
    }

    /// Returns the method's merged aspect matrix.
    #[must_use]
    pub const fn matrix(&self) -> &AspectMatrix {
        &self.matrix
    }

    /// Returns the compiled pipeline.
    #[must_use]
    pub const fn launcher(&self) -> &Launcher {
        &self.launcher
    }
}

impl fmt::Debug for HandlerMethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethodDescriptor")
            .field("method", &self.qualified_name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("lifetime", &self.lifetime)
            .field("compatibility", &self.compatibility)
            .field("launcher", &self.launcher)
            .finish_non_exhaustive()
    }
}
