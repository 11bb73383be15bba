//! Instance lifetimes and lifetime conflict rules.
//!
//! Every handler type and every aspect block is resolved from the
//! instance-lifetime collaborator under one of three [`Lifetime`]s. A handler
//! declares its lifetime at type level, per method, or not at all (in which case
//! the configured default applies); all methods of one handler must end up with
//! the same lifetime.
//!
//! When a handler consumes a block whose lifetime it cannot honour, the
//! handler's [`CompatibilityMode`] decides whether startup fails, the mismatch is
//! tolerated, or the individual call is aborted.
//!
//! # Example
//!
//! ```
//! use nimbus_core::lifetime::{check_compatibility, Compatibility, CompatibilityMode, Lifetime};
//!
//! assert!(!Lifetime::Singleton.can_consume(Lifetime::Scoped));
//! assert_eq!(
//!     check_compatibility(Lifetime::Singleton, Lifetime::Scoped, CompatibilityMode::Abort),
//!     Compatibility::Deferred,
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// How long a resolved instance may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// One instance for the whole process.
    Singleton,
    /// One instance per scope (one logical request).
    #[default]
    Scoped,
    /// A fresh instance on every resolution.
    Transient,
}

impl Lifetime {
    /// Returns the lowercase name of this lifetime.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Singleton => "singleton",
            Self::Scoped => "scoped",
            Self::Transient => "transient",
        }
    }

    /// Returns `true` if an instance with this lifetime may depend on an instance
    /// with the `dependency` lifetime.
    ///
    /// A singleton is resolved from the root of the container, where no scope
    /// exists, so it cannot reach scoped instances. Every other pairing is allowed.
    #[must_use]
    pub const fn can_consume(&self, dependency: Lifetime) -> bool {
        !matches!((self, dependency), (Self::Singleton, Self::Scoped))
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How strictly lifetime mismatches between a handler and its blocks are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityMode {
    /// A mismatch is a startup-time configuration error.
    #[default]
    Enforce,
    /// Mismatches are tolerated.
    Ignore,
    /// A mismatch fails every call of the affected method; startup continues.
    Abort,
}

impl CompatibilityMode {
    /// Returns the lowercase name of this mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enforce => "enforce",
            Self::Ignore => "ignore",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifetime declared on a handler type or one of its methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LifetimeDeclaration {
    /// The declared lifetime.
    pub lifetime: Lifetime,
    /// How mismatches with aspect blocks are treated.
    #[serde(default)]
    pub compatibility: CompatibilityMode,
}

impl LifetimeDeclaration {
    /// Creates a declaration with the given lifetime and mode.
    #[must_use]
    pub const fn new(lifetime: Lifetime, compatibility: CompatibilityMode) -> Self {
        Self {
            lifetime,
            compatibility,
        }
    }

    /// A singleton declaration in `Enforce` mode.
    #[must_use]
    pub const fn singleton() -> Self {
        Self::new(Lifetime::Singleton, CompatibilityMode::Enforce)
    }

    /// A scoped declaration in `Enforce` mode.
    #[must_use]
    pub const fn scoped() -> Self {
        Self::new(Lifetime::Scoped, CompatibilityMode::Enforce)
    }

    /// A transient declaration in `Enforce` mode.
    #[must_use]
    pub const fn transient() -> Self {
        Self::new(Lifetime::Transient, CompatibilityMode::Enforce)
    }

    /// Replaces the compatibility mode.
    #[must_use]
    pub const fn with_compatibility(mut self, compatibility: CompatibilityMode) -> Self {
        self.compatibility = compatibility;
        self
    }
}

/// How methods without their own lifetime declaration pick one up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifetimeInheritance {
    /// Method declaration, else type declaration, else the default.
    #[default]
    TypeLevel,
    /// Like `TypeLevel`, but every resolved method lifetime becomes the default
    /// for the methods declared after it.
    Sequential,
}

/// Resolves the effective declaration of each method, in declaration order.
///
/// The compatibility mode never carries over between methods; only the lifetime
/// does, and only under [`LifetimeInheritance::Sequential`].
#[must_use]
pub fn resolve_method_lifetimes(
    type_level: Option<LifetimeDeclaration>,
    method_level: &[Option<LifetimeDeclaration>],
    default: LifetimeDeclaration,
    inheritance: LifetimeInheritance,
) -> Vec<LifetimeDeclaration> {
    let base = type_level.unwrap_or(default);
    let mut running = base.lifetime;

    method_level
        .iter()
        .map(|declared| {
            let lifetime = match (declared, inheritance) {
                (Some(own), _) => own.lifetime,
                (None, LifetimeInheritance::TypeLevel) => base.lifetime,
                (None, LifetimeInheritance::Sequential) => running,
            };
            if inheritance == LifetimeInheritance::Sequential {
                running = lifetime;
            }
            let compatibility = declared.map_or(base.compatibility, |own| own.compatibility);
            LifetimeDeclaration::new(lifetime, compatibility)
        })
        .collect()
}

/// Outcome of checking a consumer against one of its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compatibility {
    /// The consumer may use the dependency.
    Compatible,
    /// Mismatch, tolerated under [`CompatibilityMode::Ignore`].
    Tolerated,
    /// Mismatch, calls must fail under [`CompatibilityMode::Abort`].
    Deferred,
    /// Mismatch, startup must fail under [`CompatibilityMode::Enforce`].
    Rejected,
}

/// Checks whether `consumer` may use a dependency living for `dependency`.
#[must_use]
pub const fn check_compatibility(
    consumer: Lifetime,
    dependency: Lifetime,
    mode: CompatibilityMode,
) -> Compatibility {
    if consumer.can_consume(dependency) {
        return Compatibility::Compatible;
    }
    match mode {
        CompatibilityMode::Enforce => Compatibility::Rejected,
        CompatibilityMode::Ignore => Compatibility::Tolerated,
        CompatibilityMode::Abort => Compatibility::Deferred,
    }
}
