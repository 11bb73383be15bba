//! Aspect declarations.
//!
//! An [`AspectDeclaration`] names a block type, what kind of block it is, where
//! it runs relative to the handler, and optionally the lifetime the block should
//! be registered with. It also carries a [`BlockBinding`]: function pointers,
//! monomorphised for the block type, that run a resolved block instance without
//! knowing its concrete type.

use crate::block::{ErrorBlock, NeutralBlock, Recovery, TransparentBlock};
use nimbus_core::di::{downcast_instance, Injectable, ServiceCollection};
use nimbus_core::{
    BoxFuture, DispatchContext, Fault, Instance, Lifetime, ResolveError, TypeKey, Value,
};
use std::fmt;

/// Where a block runs relative to the handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Position {
    /// No position. Only error blocks are attached without one.
    #[default]
    Unspecified,
    /// Before the handler.
    Pre,
    /// After the handler.
    Post,
    /// Both before and after the handler.
    Wrap,
}

impl Position {
    /// Returns `true` if the block runs before the handler.
    #[must_use]
    pub const fn is_before(&self) -> bool {
        matches!(self, Self::Pre | Self::Wrap)
    }

    /// Returns `true` if the block runs after the handler.
    #[must_use]
    pub const fn is_after(&self) -> bool {
        matches!(self, Self::Post | Self::Wrap)
    }
}

/// What a block does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRole {
    /// A side effect ([`NeutralBlock`]).
    Neutral,
    /// A result substitute for faults ([`ErrorBlock`]).
    ErrorSubstitute,
    /// A transform of values of `subject` ([`TransparentBlock`]).
    Transparent {
        /// The transformed type.
        subject: TypeKey,
    },
}

/// The scope a declaration is attached at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectScope {
    /// Every handler in the catalog.
    Global,
    /// Every method of one handler.
    Handler,
    /// A single method.
    Method,
}

impl AspectScope {
    /// Returns the lowercase name of this scope.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Handler => "handler",
            Self::Method => "method",
        }
    }
}

/// Runs a neutral block instance.
pub type NeutralRunner = for<'a> fn(
    Instance,
    &'a DispatchContext,
) -> Result<BoxFuture<'a, Result<(), Fault>>, ResolveError>;

/// Runs an error block instance.
pub type ErrorRunner = for<'a> fn(
    Instance,
    &'a DispatchContext,
    &'a Fault,
) -> Result<BoxFuture<'a, Result<Recovery, Fault>>, ResolveError>;

/// Runs a transparent block instance on an erased value.
pub type TransformRunner = for<'a> fn(
    Instance,
    &'a DispatchContext,
    Value,
) -> Result<BoxFuture<'a, Result<Value, Fault>>, ResolveError>;

/// Type-erased entry points of one block type.
///
/// The runners fail with a [`ResolveError`] when handed an instance of another
/// type; the futures they return carry the block's own faults.
#[derive(Clone, Copy)]
pub enum BlockBinding {
    /// Binding of a [`NeutralBlock`].
    Neutral(NeutralRunner),
    /// Binding of an [`ErrorBlock`].
    Error(ErrorRunner),
    /// Binding of a [`TransparentBlock`].
    Transparent(TransformRunner),
}

impl fmt::Debug for BlockBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Neutral(_) => "Neutral",
            Self::Error(_) => "Error",
            Self::Transparent(_) => "Transparent",
        })
    }
}

fn run_neutral<'a, B: NeutralBlock>(
    instance: Instance,
    ctx: &'a DispatchContext,
) -> Result<BoxFuture<'a, Result<(), Fault>>, ResolveError> {
    let block = downcast_instance::<B>(instance)?;
    Ok(Box::pin(async move { block.execute(ctx).await }))
}

fn run_error<'a, B: ErrorBlock>(
    instance: Instance,
    ctx: &'a DispatchContext,
    fault: &'a Fault,
) -> Result<BoxFuture<'a, Result<Recovery, Fault>>, ResolveError> {
    let block = downcast_instance::<B>(instance)?;
    Ok(Box::pin(async move { block.recover(ctx, fault).await }))
}

fn run_transform<'a, B, T>(
    instance: Instance,
    ctx: &'a DispatchContext,
    value: Value,
) -> Result<BoxFuture<'a, Result<Value, Fault>>, ResolveError>
where
    B: TransparentBlock<T>,
    T: Send + 'static,
{
    let block = downcast_instance::<B>(instance)?;
    Ok(Box::pin(async move {
        let actual = value.key();
        let value = value.downcast::<T>().map_err(|_| {
            anyhow::anyhow!(
                "transform {} expects {}, got {actual}",
                TypeKey::of::<B>(),
                TypeKey::of::<T>()
            )
        })?;
        block.transform(ctx, value).await.map(Value::new)
    }))
}

fn register_block<B: Injectable>(services: &mut ServiceCollection, lifetime: Lifetime) {
    services.add_injectable::<B>(lifetime);
}

/// One aspect attached to a handler method, a handler, or the whole catalog.
///
/// Two declarations are equal when they name the same block with the same role,
/// position and lifetime hint.
///
/// # Example
///
/// ```
/// use nimbus_aspects::{AspectDeclaration, NeutralBlock, Position};
/// use nimbus_core::{BoxFuture, DispatchContext, Fault, Lifetime};
///
/// #[derive(Default)]
/// struct AuditLog;
/// nimbus_core::inject_default!(AuditLog);
///
/// impl NeutralBlock for AuditLog {
///     fn execute<'a>(&'a self, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), Fault>> {
///         Box::pin(async { Ok(()) })
///     }
/// }
///
/// let audit = AspectDeclaration::neutral::<AuditLog>(Position::Pre)
///     .with_lifetime(Lifetime::Singleton);
/// assert_eq!(audit.lifetime(), Some(Lifetime::Singleton));
/// ```
#[derive(Clone)]
pub struct AspectDeclaration {
    block: TypeKey,
    role: BlockRole,
    position: Position,
    lifetime: Option<Lifetime>,
    binding: BlockBinding,
    register: fn(&mut ServiceCollection, Lifetime),
}

impl AspectDeclaration {
    /// Declares a side-effect block.
    #[must_use]
    pub fn neutral<B: NeutralBlock + Injectable>(position: Position) -> Self {
        Self {
            block: TypeKey::of::<B>(),
            role: BlockRole::Neutral,
            position,
            lifetime: None,
            binding: BlockBinding::Neutral(run_neutral::<B>),
            register: register_block::<B>,
        }
    }

    /// Declares an error block. Error blocks attach whatever their position.
    #[must_use]
    pub fn error<B: ErrorBlock + Injectable>(position: Position) -> Self {
        Self {
            block: TypeKey::of::<B>(),
            role: BlockRole::ErrorSubstitute,
            position,
            lifetime: None,
            binding: BlockBinding::Error(run_error::<B>),
            register: register_block::<B>,
        }
    }

    /// Declares a block transforming values of type `T`.
    #[must_use]
    pub fn transparent<B, T>(position: Position) -> Self
    where
        B: TransparentBlock<T> + Injectable,
        T: Send + 'static,
    {
        Self {
            block: TypeKey::of::<B>(),
            role: BlockRole::Transparent {
                subject: TypeKey::of::<T>(),
            },
            position,
            lifetime: None,
            binding: BlockBinding::Transparent(run_transform::<B, T>),
            register: register_block::<B>,
        }
    }

    /// Sets the lifetime the block is registered with when nothing else registers it.
    #[must_use]
    pub const fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Returns the block type.
    #[must_use]
    pub const fn block(&self) -> TypeKey {
        self.block
    }

    /// Returns the block role.
    #[must_use]
    pub const fn role(&self) -> BlockRole {
        self.role
    }

    /// Returns the declared position.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Returns the lifetime hint.
    #[must_use]
    pub const fn lifetime(&self) -> Option<Lifetime> {
        self.lifetime
    }

    /// Returns the transformed type of a transparent block.
    #[must_use]
    pub const fn subject(&self) -> Option<TypeKey> {
        match self.role {
            BlockRole::Transparent { subject } => Some(subject),
            _ => None,
        }
    }

    /// Returns the type-erased entry points of the block.
    #[must_use]
    pub const fn binding(&self) -> BlockBinding {
        self.binding
    }

    /// Registers the block type with `services` using its [`Injectable`] impl.
    pub fn register(&self, services: &mut ServiceCollection, lifetime: Lifetime) {
        (self.register)(services, lifetime);
    }
}

impl PartialEq for AspectDeclaration {
    fn eq(&self, other: &Self) -> bool {
        self.block == other.block
            && self.role == other.role
            && self.position == other.position
            && self.lifetime == other.lifetime
    }
}

impl Eq for AspectDeclaration {}

impl fmt::Debug for AspectDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectDeclaration")
            .field("block", &self.block)
            .field("role", &self.role)
            .field("position", &self.position)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}
