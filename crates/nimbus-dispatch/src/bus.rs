//! The dispatch bus.
//!
//! A [`Bus`] routes an input to the one method that accepts it and runs that
//! method's compiled launcher. It performs no discovery and no reflection:
//! everything it needs was computed at startup and lives in the shared
//! [`Registry`].
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = scope.get_required::<Bus>()?;
//! let total: u32 = bus.dispatch(Create { quantity: 3 }).await?;
//! bus.send(Remove { id: 7 }).await?;
//! ```

use crate::descriptor::HandlerMethodDescriptor;
use crate::launcher::resolve_caught;
use crate::registry::Registry;
use nimbus_core::{
    AnyInput, DispatchContext, DispatchError, Input, InstanceProvider, TypeKey, Value,
};
use nimbus_telemetry::metrics::{self, DispatchOutcome, InFlightGuard};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, debug_span, trace, Instrument};

/// Routes inputs to handler methods.
#[derive(Clone)]
pub struct Bus {
    registry: Arc<Registry>,
    provider: Arc<dyn InstanceProvider>,
}

impl Bus {
    /// Creates a bus resolving handlers and blocks through `provider`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, provider: Arc<dyn InstanceProvider>) -> Self {
        Self { registry, provider }
    }

    /// Returns the registry this bus dispatches over.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Dispatches `input` and returns its declared output.
    ///
    /// When `I::Output` is `()`, the method's own result is discarded.
    pub async fn dispatch<I: Input>(&self, input: I) -> Result<I::Output, DispatchError> {
        let expected = TypeKey::of::<I::Output>();
        let requested = (!expected.is_unit()).then_some(expected);
        let (method, output) = self.execute(Value::new(input), requested).await?;
        if expected.is_unit() {
            return take(&method, Value::new(()));
        }
        take(&method, output)
    }

    /// Dispatches `input`, discarding any result.
    pub async fn send<I: Input>(&self, input: I) -> Result<(), DispatchError> {
        self.execute(Value::new(input), None).await.map(|_| ())
    }

    /// Dispatches `input` and returns the method's result as `R`.
    ///
    /// Fails with [`DispatchError::ResultTypeMismatch`] before running anything
    /// when the method does not return `R`.
    pub async fn dispatch_as<R, I>(&self, input: I) -> Result<R, DispatchError>
    where
        R: Send + 'static,
        I: Input,
    {
        let (method, output) = self
            .execute(Value::new(input), Some(TypeKey::of::<R>()))
            .await?;
        take(&method, output)
    }

    /// Dispatches an input whose type is only known at runtime.
    pub async fn dispatch_dyn(&self, input: Box<dyn AnyInput>) -> Result<Value, DispatchError> {
        self.execute(input.into_value(), None)
            .await
            .map(|(_, output)| output)
    }

    async fn execute(
        &self,
        input: Value,
        requested: Option<TypeKey>,
    ) -> Result<(Arc<HandlerMethodDescriptor>, Value), DispatchError> {
        let input_type = input.key();
        let Some(method) = self.registry.method_for(input_type) else {
            metrics::record_unrouted(input_type.short_name());
            debug!(input = %input_type, "no handler found");
            return Err(DispatchError::NoHandlerFound { input: input_type });
        };

        if let Some(expected) = requested {
            if expected != method.output() {
                return Err(DispatchError::ResultTypeMismatch {
                    method: method.qualified_name().to_string(),
                    expected,
                    actual: method.output(),
                });
            }
        }

        let ctx = DispatchContext::new(method.handler(), method.name(), input_type);
        let span = debug_span!(
            "dispatch",
            dispatch_id = %ctx.dispatch_id(),
            handler = method.handler().short_name(),
            method = method.name(),
            input = input_type.short_name(),
        );

        async {
            let _in_flight = InFlightGuard::new();
            let result = self.run(method, &ctx, input).await;

            metrics::record_dispatch(
                method.handler().short_name(),
                method.name(),
                DispatchOutcome::of(&result),
                ctx.elapsed(),
            );
            match &result {
                Ok(_) => trace!(elapsed = ?ctx.elapsed(), "dispatch completed"),
                Err(error) => debug!(%error, category = error.category().as_str(), "dispatch failed"),
            }
            result
        }
        .instrument(span)
        .await
        .map(|output| (Arc::clone(method), output))
    }

    async fn run(
        &self,
        method: &HandlerMethodDescriptor,
        ctx: &DispatchContext,
        input: Value,
    ) -> Result<Value, DispatchError> {
        let launcher = method.launcher();
        launcher.ensure_runnable()?;

        let handler = resolve_caught(self.provider.as_ref(), method.handler())
            .map_err(|source| DispatchError::HandlerInstantiationFailed {
                handler: method.handler(),
                source,
            })?;

        launcher
            .launch(ctx, self.provider.as_ref(), handler, input)
            .await
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("methods", &self.registry.index().len())
            .finish_non_exhaustive()
    }
}

fn take<R: 'static>(method: &HandlerMethodDescriptor, output: Value) -> Result<R, DispatchError> {
    output
        .downcast::<R>()
        .map_err(|value| DispatchError::ResultTypeMismatch {
            method: method.qualified_name().to_string(),
            expected: TypeKey::of::<R>(),
            actual: value.key(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::discovery::{discover, DiscoveryOptions};
    use crate::handler::{Handler, HandlerSpec};
    use nimbus_core::{Lifetime, ServiceCollection};

    struct Square(i64);
    impl Input for Square {
        type Output = i64;
    }

    struct Log(&'static str);
    impl Input for Log {
        type Output = ();
    }

    struct Unknown;
    impl Input for Unknown {
        type Output = ();
    }

    #[derive(Default)]
    struct Math;
    nimbus_core::inject_default!(Math);
    impl Handler for Math {
        fn describe(spec: &mut HandlerSpec<Self>) {
            spec.handle("square", |_, input: Square| async move { Ok(input.0 * input.0) });
            spec.handle_sync("log", |_, input: Log| Ok(input.0.len()));
        }
    }

    struct Brittle;
    impl nimbus_core::Injectable for Brittle {
        fn inject(_: &nimbus_core::Scope) -> Result<Self, nimbus_core::ResolveError> {
            panic!("handler constructor exploded")
        }
    }
    impl Handler for Brittle {
        fn describe(spec: &mut HandlerSpec<Self>) {
            spec.handle_sync("negate", |_, input: Square| Ok(-input.0));
        }
    }

    fn bus(register_handler: bool) -> Bus {
        let mut services = ServiceCollection::new();
        let discovery = discover(
            &Catalog::new().handler::<Math>(),
            &services,
            &DiscoveryOptions::default(),
        )
        .unwrap();
        if register_handler {
            services.add_injectable::<Math>(Lifetime::Transient);
        }
        let scope = services.build().create_scope();
        Bus::new(Arc::new(discovery.registry), Arc::new(scope))
    }

    #[tokio::test]
    async fn test_dispatch_typed() {
        let bus = bus(true);
        assert_eq!(bus.dispatch(Square(7)).await.unwrap(), 49);
    }

    #[tokio::test]
    async fn test_dispatch_discards_void_result() {
        let bus = bus(true);
        bus.dispatch(Log("hello")).await.unwrap();
        bus.send(Square(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_as() {
        let bus = bus(true);
        let len: usize = bus.dispatch_as(Log("four")).await.unwrap();
        assert_eq!(len, 4);

        let err = bus.dispatch_as::<String, _>(Square(1)).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ResultTypeMismatch { expected, actual, .. }
                if expected == TypeKey::of::<String>() && actual == TypeKey::of::<i64>()
        ));
    }

    #[tokio::test]
    async fn test_dispatch_dyn() {
        let bus = bus(true);
        let inputs: Vec<Box<dyn AnyInput>> = vec![Box::new(Square(3)), Box::new(Log("ab"))];
        let mut outputs = Vec::new();
        for input in inputs {
            outputs.push(bus.dispatch_dyn(input).await.unwrap());
        }
        assert_eq!(outputs[0].downcast_ref::<i64>(), Some(&9));
        assert_eq!(outputs[1].downcast_ref::<usize>(), Some(&2));
    }

    #[tokio::test]
    async fn test_no_handler() {
        let bus = bus(true);
        let err = bus.send(Unknown).await.unwrap_err();
        assert!(err.is_no_handler());
        assert!(err.to_string().contains("Unknown"));
    }

    #[tokio::test]
    async fn test_unregistered_handler() {
        let bus = bus(false);
        let err = bus.dispatch(Square(1)).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::HandlerInstantiationFailed { handler, .. }
                if handler == TypeKey::of::<Math>()
        ));
    }

    #[tokio::test]
    async fn test_panicking_handler_constructor() {
        let mut services = ServiceCollection::new();
        let discovery = discover(
            &Catalog::new().handler::<Brittle>(),
            &services,
            &DiscoveryOptions::default(),
        )
        .unwrap();
        services.add_injectable::<Brittle>(Lifetime::Transient);
        let scope = services.build().create_scope();
        let bus = Bus::new(Arc::new(discovery.registry), Arc::new(scope));

        let err = bus.dispatch(Square(2)).await.unwrap_err();
        match err {
            DispatchError::HandlerInstantiationFailed { handler, source } => {
                assert_eq!(handler, TypeKey::of::<Brittle>());
                assert!(source.to_string().contains("handler constructor exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bus_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Bus>();
    }

    #[test]
    fn test_dispatch_blocking() {
        let bus = bus(true);
        let out = tokio_test::block_on(bus.dispatch(Square(5))).unwrap();
        assert_eq!(out, 25);
    }
}
