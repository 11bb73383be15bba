//! Error types for Nimbus.
//!
//! Errors fall into three [`ErrorCategory`]s:
//!
//! | Category | Type | When |
//! |---|---|---|
//! | `Configuration` | [`ConfigError`] | Discovery and registration; fatal at startup |
//! | `Resolution` | [`DispatchError`], [`ResolveError`] | A call cannot be routed or its instances cannot be obtained |
//! | `Execution` | [`DispatchError::Fault`] | A handler or block failed while running |
//!
//! Handler and block bodies report failures as [`Fault`], an opaque
//! [`anyhow::Error`]. Everything the runtime itself reports is a typed error.

use crate::input::TypeKey;
use crate::lifetime::Lifetime;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

/// An opaque failure raised by a handler or aspect block.
pub type Fault = anyhow::Error;

/// Broad classification of Nimbus errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid handler or aspect configuration, detected at startup.
    Configuration,
    /// A call could not be routed, or an instance could not be obtained.
    Resolution,
    /// A handler or block failed while executing.
    Execution,
}

impl ErrorCategory {
    /// Returns the lowercase name of this category, as used in metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Resolution => "resolution",
            Self::Execution => "execution",
        }
    }
}

/// A startup-time configuration error.
///
/// Discovery and registration are all-or-nothing: when one of these is returned,
/// nothing has been registered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two methods accept the same input type.
    #[error("input type {input} is handled by both {first} and {second}")]
    DuplicateInput {
        /// The contested input type.
        input: TypeKey,
        /// The method registered first.
        first: String,
        /// The method that tried to claim the input again.
        second: String,
    },

    /// The methods of one handler resolved to different lifetimes.
    #[error(
        "handler {handler} has methods with inconsistent lifetimes ({})",
        format_method_lifetimes(.methods)
    )]
    InconsistentLifetimes {
        /// The offending handler type.
        handler: TypeKey,
        /// Every method with its resolved lifetime, in declaration order.
        methods: Vec<(&'static str, Lifetime)>,
    },

    /// A handler type was registered with the service collection before scanning.
    #[error("handler {handler} is already registered with the service collection")]
    PreRegisteredHandler {
        /// The pre-registered handler type.
        handler: TypeKey,
    },

    /// Handlers were already scanned into this service collection.
    #[error("handlers have already been scanned into this service collection")]
    AlreadyScanned,

    /// A handler cannot consume one of its aspect blocks under `Enforce` mode.
    #[error(
        "{method} ({handler_lifetime}) cannot consume aspect block {block} ({block_lifetime})"
    )]
    LifetimeConflict {
        /// The qualified name of the method.
        method: String,
        /// The handler's lifetime.
        handler_lifetime: Lifetime,
        /// The aspect block type.
        block: TypeKey,
        /// The block's effective lifetime.
        block_lifetime: Lifetime,
    },

    /// A method-scope transform block does not operate on the method's type.
    #[error("transform {block} on {method} operates on {subject}, but the method uses {expected}")]
    IncompatibleTransform {
        /// The qualified name of the method.
        method: String,
        /// The transform block type.
        block: TypeKey,
        /// The type the block transforms.
        subject: TypeKey,
        /// The input or return type of the method.
        expected: TypeKey,
    },

    /// A method's return type does not match its input's declared output.
    #[error("{method} returns {actual}, but input {input} expects {expected}")]
    OutputMismatch {
        /// The qualified name of the method.
        method: String,
        /// The method's input type.
        input: TypeKey,
        /// The output type declared by the input.
        expected: TypeKey,
        /// The method's return type.
        actual: TypeKey,
    },
}

impl ConfigError {
    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

fn format_method_lifetimes(methods: &[(&'static str, Lifetime)]) -> String {
    let mut out = String::new();
    for (i, (name, lifetime)) in methods.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{name}: {lifetime}");
    }
    out
}

/// An error raised by an [`InstanceProvider`](crate::InstanceProvider).
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No registration exists for the service.
    #[error("service {service} is not registered")]
    NotRegistered {
        /// The requested service type.
        service: TypeKey,
    },

    /// A scoped service was requested outside of a scope.
    #[error("service {service} is scoped and cannot be resolved from the root scope")]
    ScopeRequired {
        /// The requested service type.
        service: TypeKey,
    },

    /// The scope a handle was bound to has been dropped.
    #[error("service {service} was requested from a scope that no longer exists")]
    ScopeDisposed {
        /// The requested service type.
        service: TypeKey,
    },

    /// The service factory failed.
    #[error("failed to construct service {service}: {source}")]
    Construction {
        /// The service type being constructed.
        service: TypeKey,
        /// The underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// A registration produced an instance of the wrong type.
    #[error("service {service} resolved to an instance of a different type")]
    TypeMismatch {
        /// The requested service type.
        service: TypeKey,
    },
}

impl ResolveError {
    /// Creates a not-registered error for `T`.
    #[must_use]
    pub fn not_registered<T: ?Sized + 'static>() -> Self {
        Self::NotRegistered {
            service: TypeKey::of::<T>(),
        }
    }

    /// Creates a construction error for `T`.
    pub fn construction<T: ?Sized + 'static>(source: impl Into<anyhow::Error>) -> Self {
        Self::Construction {
            service: TypeKey::of::<T>(),
            source: source.into(),
        }
    }

    /// Returns the service type the error refers to.
    #[must_use]
    pub const fn service(&self) -> TypeKey {
        match self {
            Self::NotRegistered { service }
            | Self::ScopeRequired { service }
            | Self::ScopeDisposed { service }
            | Self::Construction { service, .. }
            | Self::TypeMismatch { service } => *service,
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Resolution
    }
}

/// An error returned for a single dispatch.
///
/// A dispatch error never affects other calls; the bus stays usable.
///
/// # Example
///
/// ```
/// use nimbus_core::{DispatchError, ErrorCategory, TypeKey};
///
/// struct Unknown;
///
/// let err = DispatchError::NoHandlerFound { input: TypeKey::of::<Unknown>() };
/// assert!(err.is_no_handler());
/// assert_eq!(err.category(), ErrorCategory::Resolution);
/// assert!(err.to_string().contains("Unknown"));
/// ```
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No method accepts the input type.
    #[error("no handler found for input type {input}")]
    NoHandlerFound {
        /// The input type that was dispatched.
        input: TypeKey,
    },

    /// The requested result type differs from the method's return type.
    #[error("{method} returns {actual}, but {expected} was requested")]
    ResultTypeMismatch {
        /// The qualified name of the method.
        method: String,
        /// The type the caller asked for.
        expected: TypeKey,
        /// The type the method produces.
        actual: TypeKey,
    },

    /// The handler instance could not be obtained.
    #[error("failed to instantiate handler {handler}")]
    HandlerInstantiationFailed {
        /// The handler type.
        handler: TypeKey,
        /// The resolution failure.
        #[source]
        source: ResolveError,
    },

    /// An aspect block instance could not be obtained.
    #[error("failed to resolve aspect block {block}")]
    BlockResolutionFailed {
        /// The block type.
        block: TypeKey,
        /// The resolution failure.
        #[source]
        source: ResolveError,
    },

    /// The method is configured to abort on a lifetime mismatch with one of its blocks.
    #[error(
        "{method} ({handler_lifetime}) cannot consume aspect block {block} ({block_lifetime})"
    )]
    LifetimeConflict {
        /// The qualified name of the method.
        method: String,
        /// The handler's lifetime.
        handler_lifetime: Lifetime,
        /// The aspect block type.
        block: TypeKey,
        /// The block's effective lifetime.
        block_lifetime: Lifetime,
    },

    /// The handler or one of its blocks failed and no error block substituted a result.
    #[error("{method} failed: {source}")]
    Fault {
        /// The qualified name of the method.
        method: String,
        /// The failure.
        #[source]
        source: Fault,
    },
}

impl DispatchError {
    /// Creates a fault error.
    pub fn fault(method: impl Into<String>, source: impl Into<Fault>) -> Self {
        Self::Fault {
            method: method.into(),
            source: source.into(),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Fault { .. } => ErrorCategory::Execution,
            _ => ErrorCategory::Resolution,
        }
    }

    /// Returns `true` if no handler accepts the dispatched input.
    #[must_use]
    pub const fn is_no_handler(&self) -> bool {
        matches!(self, Self::NoHandlerFound { .. })
    }

    /// Returns the underlying fault of an execution error.
    #[must_use]
    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault { source, .. } => Some(source),
            _ => None,
        }
    }
}
