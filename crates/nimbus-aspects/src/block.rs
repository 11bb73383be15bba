//! Block traits.
//!
//! Blocks are resolved from the instance provider for every call, so they are
//! plain types with a lifetime, not closures. Each trait method returns a boxed
//! future so blocks stay object-safe and may await.
//!
//! # Example
//!
//! ```
//! use nimbus_aspects::{NeutralBlock, TransparentBlock};
//! use nimbus_core::{BoxFuture, DispatchContext, Fault};
//!
//! #[derive(Default)]
//! struct AuditLog;
//!
//! impl NeutralBlock for AuditLog {
//!     fn execute<'a>(&'a self, ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), Fault>> {
//!         Box::pin(async move {
//!             println!("dispatching {}", ctx.qualified_method());
//!             Ok(())
//!         })
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Trim;
//!
//! impl TransparentBlock<String> for Trim {
//!     fn transform<'a>(
//!         &'a self,
//!         _ctx: &'a DispatchContext,
//!         value: String,
//!     ) -> BoxFuture<'a, Result<String, Fault>> {
//!         Box::pin(async move { Ok(value.trim().to_string()) })
//!     }
//! }
//! ```

use nimbus_core::{BoxFuture, DispatchContext, Fault, TypeKey, Value};

/// A block that runs a side effect before or after the handler.
///
/// Returning an error from a `Pre` block skips the handler and routes the fault
/// to the method's error blocks. Errors from `Post` blocks fail the call.
pub trait NeutralBlock: Send + Sync + 'static {
    /// Runs the side effect.
    fn execute<'a>(&'a self, ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), Fault>>;
}

/// A block that transforms a value of type `T`.
///
/// As an input filter it rewrites the input before the handler sees it; as an
/// output filter it rewrites the handler's result. A transform may replace the
/// content of the value, never its type.
pub trait TransparentBlock<T: Send + 'static>: Send + Sync + 'static {
    /// Transforms the value.
    fn transform<'a>(&'a self, ctx: &'a DispatchContext, value: T)
        -> BoxFuture<'a, Result<T, Fault>>;
}

/// A block that may substitute a result when the handler, an input filter or a
/// pre block fails.
pub trait ErrorBlock: Send + Sync + 'static {
    /// Inspects the fault and either substitutes a result or declines.
    ///
    /// The first block returning a substitute of the method's return type wins.
    /// A block that declines, fails or returns another type is skipped.
    fn recover<'a>(
        &'a self,
        ctx: &'a DispatchContext,
        fault: &'a Fault,
    ) -> BoxFuture<'a, Result<Recovery, Fault>>;
}

/// The outcome of an [`ErrorBlock`].
#[derive(Debug)]
pub enum Recovery {
    /// Use this value as the method's result.
    Substitute(Value),
    /// Leave the fault to the next error block.
    Declined,
}

impl Recovery {
    /// Substitutes `value` as the method's result.
    #[must_use]
    pub fn substitute<T: Send + 'static>(value: T) -> Self {
        Self::Substitute(Value::new(value))
    }

    /// Returns the type of the substitute, if any.
    #[must_use]
    pub fn substitute_type(&self) -> Option<TypeKey> {
        match self {
            Self::Substitute(value) => Some(value.key()),
            Self::Declined => None,
        }
    }
}
