//! The handler declaration surface.
//!
//! A handler is a type whose methods each process exactly one [`Input`] type.
//! Handlers describe themselves once, at discovery time, through
//! [`Handler::describe`]: an optional type-level lifetime, handler-scope
//! aspects, and the dispatchable methods in declaration order.
//!
//! # Example
//!
//! ```rust
//! use nimbus_core::di::{Injectable, Scope};
//! use nimbus_core::{Input, LifetimeDeclaration, ResolveError};
//! use nimbus_dispatch::{Handler, HandlerSpec};
//!
//! struct Deposit(i64);
//! impl Input for Deposit {
//!     type Output = i64;
//! }
//!
//! struct Balance;
//! impl Input for Balance {
//!     type Output = i64;
//! }
//!
//! #[derive(Default)]
//! struct Account;
//! nimbus_core::inject_default!(Account);
//!
//! impl Handler for Account {
//!     fn describe(spec: &mut HandlerSpec<Self>) {
//!         spec.lifetime(LifetimeDeclaration::scoped());
//!         spec.handle("deposit", |_this, input: Deposit| async move { Ok(input.0) });
//!         spec.handle_sync("balance", |_this, _: Balance| Ok(0));
//!     }
//! }
//! ```

use nimbus_aspects::AspectDeclaration;
use nimbus_core::di::{downcast_instance, Injectable};
use nimbus_core::{
    BoxFuture, Fault, Input, Instance, LifetimeDeclaration, ResolveError, TypeKey, Value,
};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A type with dispatchable methods.
pub trait Handler: Injectable {
    /// Declares the handler's lifetime, aspects and methods.
    fn describe(spec: &mut HandlerSpec<Self>);
}

/// Invokes one handler method on an erased handler instance and input.
///
/// Fails with a [`ResolveError`] if the instance is not of the handler type.
pub type MethodInvoker = Arc<
    dyn Fn(Instance, Value) -> Result<BoxFuture<'static, Result<Value, Fault>>, ResolveError>
        + Send
        + Sync,
>;

/// Wraps a closure as a [`MethodInvoker`].
pub fn method_invoker<F>(f: F) -> MethodInvoker
where
    F: Fn(Instance, Value) -> Result<BoxFuture<'static, Result<Value, Fault>>, ResolveError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Collects a handler's declarations.
pub struct HandlerSpec<H> {
    lifetime: Option<LifetimeDeclaration>,
    aspects: Vec<AspectDeclaration>,
    methods: Vec<MethodSpec>,
    _handler: PhantomData<fn() -> H>,
}

impl<H: Handler> HandlerSpec<H> {
    pub(crate) fn new() -> Self {
        Self {
            lifetime: None,
            aspects: Vec::new(),
            methods: Vec::new(),
            _handler: PhantomData,
        }
    }

    /// Declares the lifetime of the handler type.
    pub fn lifetime(&mut self, declaration: LifetimeDeclaration) -> &mut Self {
        self.lifetime = Some(declaration);
        self
    }

    /// Attaches an aspect to every method of the handler.
    pub fn aspect(&mut self, declaration: AspectDeclaration) -> &mut Self {
        self.aspects.push(declaration);
        self
    }

    /// Declares an asynchronous method processing inputs of type `I`.
    pub fn handle<I, R, F, Fut>(&mut self, name: &'static str, f: F) -> &mut MethodSpec
    where
        I: Input,
        R: Send + 'static,
        F: Fn(Arc<H>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Fault>> + Send + 'static,
    {
        let f = Arc::new(f);
        let invoker = method_invoker(move |instance, input| {
            let handler = downcast_instance::<H>(instance)?;
            let f = Arc::clone(&f);
            Ok(Box::pin(async move {
                let input = take_input::<I>(input)?;
                f(handler, input).await.map(Value::new)
            }))
        });
        self.push_method::<I, R>(name, invoker)
    }

    /// Declares a synchronous method processing inputs of type `I`.
    ///
    /// The body runs inside the call's future, like an asynchronous body.
    pub fn handle_sync<I, R, F>(&mut self, name: &'static str, f: F) -> &mut MethodSpec
    where
        I: Input,
        R: Send + 'static,
        F: Fn(&H, I) -> Result<R, Fault> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let invoker = method_invoker(move |instance, input| {
            let handler = downcast_instance::<H>(instance)?;
            let f = Arc::clone(&f);
            Ok(Box::pin(async move {
                let input = take_input::<I>(input)?;
                f(&handler, input).map(Value::new)
            }))
        });
        self.push_method::<I, R>(name, invoker)
    }

    fn push_method<I: Input, R: 'static>(
        &mut self,
        name: &'static str,
        invoker: MethodInvoker,
    ) -> &mut MethodSpec {
        let index = self.methods.len();
        self.methods.push(MethodSpec {
            name,
            input: TypeKey::of::<I>(),
            declared_output: TypeKey::of::<I::Output>(),
            output: TypeKey::of::<R>(),
            lifetime: None,
            aspects: Vec::new(),
            invoker,
        });
        &mut self.methods[index]
    }

    pub(crate) fn into_blueprint(self) -> HandlerBlueprint {
        HandlerBlueprint {
            handler: TypeKey::of::<H>(),
            lifetime: self.lifetime,
            aspects: self.aspects,
            methods: self.methods,
        }
    }
}

fn take_input<I: Input>(input: Value) -> Result<I, Fault> {
    input.downcast::<I>().map_err(|value| {
        anyhow::anyhow!("expected input {}, got {}", TypeKey::of::<I>(), value.key())
    })
}

/// One declared method.
pub struct MethodSpec {
    name: &'static str,
    input: TypeKey,
    declared_output: TypeKey,
    output: TypeKey,
    lifetime: Option<LifetimeDeclaration>,
    aspects: Vec<AspectDeclaration>,
    invoker: MethodInvoker,
}

impl MethodSpec {
    /// Declares the lifetime of this method.
    ///
    /// All methods of a handler must resolve to the same lifetime.
    pub fn lifetime(&mut self, declaration: LifetimeDeclaration) -> &mut Self {
        self.lifetime = Some(declaration);
        self
    }

    /// Attaches an aspect to this method only.
    pub fn aspect(&mut self, declaration: AspectDeclaration) -> &mut Self {
        self.aspects.push(declaration);
        self
    }

    /// Returns the method name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the accepted input type.
    #[must_use]
    pub const fn input(&self) -> TypeKey {
        self.input
    }

    /// Returns the output type declared by the input.
    #[must_use]
    pub const fn declared_output(&self) -> TypeKey {
        self.declared_output
    }

    /// Returns the method's return type.
    #[must_use]
    pub const fn output(&self) -> TypeKey {
        self.output
    }

    /// Returns the method's own lifetime declaration.
    #[must_use]
    pub const fn declared_lifetime(&self) -> Option<LifetimeDeclaration> {
        self.lifetime
    }

    /// Returns the method-scope aspects.
    #[must_use]
    pub fn aspects(&self) -> &[AspectDeclaration] {
        &self.aspects
    }

    pub(crate) fn invoker(&self) -> MethodInvoker {
        Arc::clone(&self.invoker)
    }
}

impl fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("lifetime", &self.lifetime)
            .field("aspects", &self.aspects)
            .finish_non_exhaustive()
    }
}

/// Everything a handler declared about itself.
#[derive(Debug)]
pub struct HandlerBlueprint {
    /// The handler type.
    pub handler: TypeKey,
    /// The type-level lifetime declaration.
    pub lifetime: Option<LifetimeDeclaration>,
    /// Handler-scope aspects.
    pub aspects: Vec<AspectDeclaration>,
    /// Methods in declaration order.
    pub methods: Vec<MethodSpec>,
}

impl HandlerBlueprint {
    /// Materialises the blueprint of `H`.
    #[must_use]
    pub fn of<H: Handler>() -> Self {
        let mut spec = HandlerSpec::<H>::new();
        H::describe(&mut spec);
        spec.into_blueprint()
    }
}
