//! Compiled execution pipelines.
//!
//! A [`Launcher`] is built once per method at discovery time from the method's
//! aspect matrix. Each call then runs:
//!
//! 1. input filters, in order, each replacing the input
//! 2. pre blocks
//! 3. the method
//! 4. post blocks
//! 5. output filters, in order, each replacing the result
//!
//! A fault (or panic) in steps 1-3 is offered to the error blocks in order; the
//! first correctly-typed substitute becomes the result and skips the post stages.
//! A fault in steps 4-5 fails the call directly. Blocks that cannot be resolved
//! fail the call with a resolution error and never reach the error blocks; a
//! panic while constructing a block counts as a resolution failure.

use crate::handler::MethodInvoker;
use futures_util::FutureExt;
use nimbus_aspects::{
    AspectDeclaration, AspectMatrix, BlockBinding, ErrorRunner, NeutralRunner, Recovery,
    TransformRunner,
};
use nimbus_core::{
    DispatchContext, DispatchError, Fault, Instance, InstanceProvider, Lifetime, ResolveError,
    TypeKey, Value,
};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, trace, warn};

/// A lifetime mismatch that fails every call of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifetimeAbort {
    /// The handler's lifetime.
    pub handler_lifetime: Lifetime,
    /// The offending block type.
    pub block: TypeKey,
    /// The block's effective lifetime.
    pub block_lifetime: Lifetime,
}

#[derive(Clone, Copy)]
struct Stage<R> {
    block: TypeKey,
    run: R,
}

/// A stage failure before the method returned.
enum Failure {
    Resolution(DispatchError),
    Fault(Fault),
}

impl From<DispatchError> for Failure {
    fn from(error: DispatchError) -> Self {
        Self::Resolution(error)
    }
}

/// The compiled pipeline of one handler method.
#[derive(Clone)]
pub struct Launcher {
    method: String,
    handler: TypeKey,
    output: TypeKey,
    input_filter: Vec<Stage<TransformRunner>>,
    pre: Vec<Stage<NeutralRunner>>,
    on_error: Vec<Stage<ErrorRunner>>,
    post: Vec<Stage<NeutralRunner>>,
    output_filter: Vec<Stage<TransformRunner>>,
    invoker: MethodInvoker,
    abort: Option<LifetimeAbort>,
}

impl Launcher {
    /// Compiles the pipeline of a method.
    ///
    /// `method` is the qualified method name used in errors; `output` is the
    /// method's return type, which error-block substitutes must match.
    #[must_use]
    pub fn compile(
        method: String,
        handler: TypeKey,
        output: TypeKey,
        matrix: &AspectMatrix,
        invoker: MethodInvoker,
        abort: Option<LifetimeAbort>,
    ) -> Self {
        Self {
            method,
            handler,
            output,
            input_filter: transform_stages(&matrix.input_filter),
            pre: neutral_stages(&matrix.pre),
            on_error: error_stages(&matrix.on_error),
            post: neutral_stages(&matrix.post),
            output_filter: transform_stages(&matrix.output_filter),
            invoker,
            abort,
        }
    }

    /// Returns the lifetime mismatch this method aborts on, if any.
    #[must_use]
    pub const fn abort(&self) -> Option<LifetimeAbort> {
        self.abort
    }

    /// Returns the number of compiled stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.input_filter.len()
            + self.pre.len()
            + self.on_error.len()
            + self.post.len()
            + self.output_filter.len()
    }

    /// Fails if the method aborts on a lifetime mismatch.
    pub fn ensure_runnable(&self) -> Result<(), DispatchError> {
        match self.abort {
            Some(abort) => Err(DispatchError::LifetimeConflict {
                method: self.method.clone(),
                handler_lifetime: abort.handler_lifetime,
                block: abort.block,
                block_lifetime: abort.block_lifetime,
            }),
            None => Ok(()),
        }
    }

    /// Runs the pipeline on a resolved handler instance.
    pub async fn launch(
        &self,
        ctx: &DispatchContext,
        provider: &dyn InstanceProvider,
        handler: Instance,
        input: Value,
    ) -> Result<Value, DispatchError> {
        self.ensure_runnable()?;

        let attempt = AssertUnwindSafe(self.run_main(ctx, provider, handler, input))
            .catch_unwind()
            .await;
        let output = match attempt {
            Ok(Ok(output)) => output,
            Ok(Err(Failure::Resolution(error))) => return Err(error),
            Ok(Err(Failure::Fault(fault))) => return self.recover(ctx, provider, fault).await,
            Err(payload) => {
                let fault = panic_fault(&*payload);
                return self.recover(ctx, provider, fault).await;
            }
        };

        match AssertUnwindSafe(self.run_post(ctx, provider, output))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(DispatchError::fault(
                &self.method,
                panic_fault(&*payload),
            )),
        }
    }

    async fn run_main(
        &self,
        ctx: &DispatchContext,
        provider: &dyn InstanceProvider,
        handler: Instance,
        input: Value,
    ) -> Result<Value, Failure> {
        let mut input = input;
        for stage in &self.input_filter {
            trace!(block = %stage.block, phase = "input_filter", "running block");
            let block = resolve_block(provider, stage.block)?;
            let run = (stage.run)(block, ctx, input).map_err(|e| block_failed(stage.block, e))?;
            input = run.await.map_err(Failure::Fault)?;
        }

        for stage in &self.pre {
            trace!(block = %stage.block, phase = "pre", "running block");
            let block = resolve_block(provider, stage.block)?;
            let run = (stage.run)(block, ctx).map_err(|e| block_failed(stage.block, e))?;
            run.await.map_err(Failure::Fault)?;
        }

        let call = (self.invoker)(handler, input).map_err(|source| {
            DispatchError::HandlerInstantiationFailed {
                handler: self.handler,
                source,
            }
        })?;
        call.await.map_err(Failure::Fault)
    }

    async fn run_post(
        &self,
        ctx: &DispatchContext,
        provider: &dyn InstanceProvider,
        output: Value,
    ) -> Result<Value, DispatchError> {
        for stage in &self.post {
            trace!(block = %stage.block, phase = "post", "running block");
            let block = resolve_block(provider, stage.block)?;
            let run = (stage.run)(block, ctx).map_err(|e| block_failed(stage.block, e))?;
            run.await
                .map_err(|fault| DispatchError::fault(&self.method, fault))?;
        }

        let mut output = output;
        for stage in &self.output_filter {
            trace!(block = %stage.block, phase = "output_filter", "running block");
            let block = resolve_block(provider, stage.block)?;
            let run = (stage.run)(block, ctx, output).map_err(|e| block_failed(stage.block, e))?;
            output = run
                .await
                .map_err(|fault| DispatchError::fault(&self.method, fault))?;
        }
        Ok(output)
    }

    async fn recover(
        &self,
        ctx: &DispatchContext,
        provider: &dyn InstanceProvider,
        fault: Fault,
    ) -> Result<Value, DispatchError> {
        debug!(method = %self.method, error = %fault, "method faulted");

        for stage in &self.on_error {
            let block = resolve_block(provider, stage.block)?;
            let run = (stage.run)(block, ctx, &fault).map_err(|e| block_failed(stage.block, e))?;
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(Recovery::Substitute(value))) if value.key() == self.output => {
                    debug!(block = %stage.block, "error block substituted a result");
                    return Ok(value);
                }
                Ok(Ok(Recovery::Substitute(value))) => {
                    warn!(
                        block = %stage.block,
                        expected = %self.output,
                        actual = %value.key(),
                        "error block substitute has the wrong type, skipping"
                    );
                }
                Ok(Ok(Recovery::Declined)) => {
                    trace!(block = %stage.block, "error block declined");
                }
                Ok(Err(error)) => {
                    warn!(block = %stage.block, %error, "error block failed, skipping");
                }
                Err(payload) => {
                    let error = panic_fault(&*payload);
                    warn!(block = %stage.block, %error, "error block panicked, skipping");
                }
            }
        }

        Err(DispatchError::fault(&self.method, fault))
    }
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<R>(stages: &[Stage<R>]) -> Vec<&'static str> {
            stages.iter().map(|s| s.block.short_name()).collect()
        }

        f.debug_struct("Launcher")
            .field("method", &self.method)
            .field("input_filter", &names(&self.input_filter))
            .field("pre", &names(&self.pre))
            .field("on_error", &names(&self.on_error))
            .field("post", &names(&self.post))
            .field("output_filter", &names(&self.output_filter))
            .field("abort", &self.abort)
            .finish_non_exhaustive()
    }
}

fn neutral_stages(declarations: &[AspectDeclaration]) -> Vec<Stage<NeutralRunner>> {
    declarations
        .iter()
        .filter_map(|d| match d.binding() {
            BlockBinding::Neutral(run) => Some(Stage {
                block: d.block(),
                run,
            }),
            _ => None,
        })
        .collect()
}

fn error_stages(declarations: &[AspectDeclaration]) -> Vec<Stage<ErrorRunner>> {
    declarations
        .iter()
        .filter_map(|d| match d.binding() {
            BlockBinding::Error(run) => Some(Stage {
                block: d.block(),
                run,
            }),
            _ => None,
        })
        .collect()
}

fn transform_stages(declarations: &[AspectDeclaration]) -> Vec<Stage<TransformRunner>> {
    declarations
        .iter()
        .filter_map(|d| match d.binding() {
            BlockBinding::Transparent(run) => Some(Stage {
                block: d.block(),
                run,
            }),
            _ => None,
        })
        .collect()
}

fn resolve_block(provider: &dyn InstanceProvider, block: TypeKey) -> Result<Instance, DispatchError> {
    resolve_caught(provider, block).map_err(|source| block_failed(block, source))
}

/// Resolves `service`, turning a panic in its factory into a construction error.
pub(crate) fn resolve_caught(
    provider: &dyn InstanceProvider,
    service: TypeKey,
) -> Result<Instance, ResolveError> {
    panic::catch_unwind(AssertUnwindSafe(|| provider.resolve_required(service))).unwrap_or_else(
        |payload| {
            Err(ResolveError::Construction {
                service,
                source: panic_fault(&*payload),
            })
        },
    )
}

const fn block_failed(block: TypeKey, source: ResolveError) -> DispatchError {
    DispatchError::BlockResolutionFailed { block, source }
}

fn panic_fault(payload: &(dyn Any + Send)) -> Fault {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string());
    anyhow::anyhow!("panicked: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::method_invoker;
    use nimbus_aspects::{ErrorBlock, NeutralBlock, Position, TransparentBlock};
    use nimbus_core::{BoxFuture, Scope, ServiceCollection};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<&'static str>>>);

    impl Journal {
        fn push(&self, entry: &'static str) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct Quiet;
    nimbus_core::inject_default!(Quiet);
    impl NeutralBlock for Quiet {
        fn execute<'a>(&'a self, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), Fault>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct Failing;
    nimbus_core::inject_default!(Failing);
    impl NeutralBlock for Failing {
        fn execute<'a>(&'a self, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), Fault>> {
            Box::pin(async { Err(anyhow::anyhow!("blocked")) })
        }
    }

    #[derive(Default)]
    struct Fallback;
    nimbus_core::inject_default!(Fallback);
    impl ErrorBlock for Fallback {
        fn recover<'a>(
            &'a self,
            _ctx: &'a DispatchContext,
            _fault: &'a Fault,
        ) -> BoxFuture<'a, Result<Recovery, Fault>> {
            Box::pin(async { Ok(Recovery::substitute(-1_i32)) })
        }
    }

    #[derive(Default)]
    struct Decline;
    nimbus_core::inject_default!(Decline);
    impl ErrorBlock for Decline {
        fn recover<'a>(
            &'a self,
            _ctx: &'a DispatchContext,
            _fault: &'a Fault,
        ) -> BoxFuture<'a, Result<Recovery, Fault>> {
            Box::pin(async { Ok(Recovery::Declined) })
        }
    }

    #[derive(Default)]
    struct WrongType;
    nimbus_core::inject_default!(WrongType);
    impl ErrorBlock for WrongType {
        fn recover<'a>(
            &'a self,
            _ctx: &'a DispatchContext,
            _fault: &'a Fault,
        ) -> BoxFuture<'a, Result<Recovery, Fault>> {
            Box::pin(async { Ok(Recovery::substitute(String::from("minus one"))) })
        }
    }

    #[derive(Default)]
    struct Panicky;
    nimbus_core::inject_default!(Panicky);
    impl ErrorBlock for Panicky {
        fn recover<'a>(
            &'a self,
            _ctx: &'a DispatchContext,
            _fault: &'a Fault,
        ) -> BoxFuture<'a, Result<Recovery, Fault>> {
            Box::pin(async { explode_recovery() })
        }
    }

    #[derive(Default)]
    struct Erroring;
    nimbus_core::inject_default!(Erroring);
    impl ErrorBlock for Erroring {
        fn recover<'a>(
            &'a self,
            _ctx: &'a DispatchContext,
            _fault: &'a Fault,
        ) -> BoxFuture<'a, Result<Recovery, Fault>> {
            Box::pin(async { Err(anyhow::anyhow!("recovery failed")) })
        }
    }

    struct Fragile;
    impl nimbus_core::Injectable for Fragile {
        fn inject(_: &Scope) -> Result<Self, ResolveError> {
            panic!("constructor exploded")
        }
    }
    impl NeutralBlock for Fragile {
        fn execute<'a>(&'a self, _ctx: &'a DispatchContext) -> BoxFuture<'a, Result<(), Fault>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn unrecoverable() -> [AspectDeclaration; 4] {
        [
            AspectDeclaration::error::<Decline>(Position::Unspecified),
            AspectDeclaration::error::<WrongType>(Position::Unspecified),
            AspectDeclaration::error::<Panicky>(Position::Unspecified),
            AspectDeclaration::error::<Erroring>(Position::Unspecified),
        ]
    }

    #[derive(Default)]
    struct Double;
    nimbus_core::inject_default!(Double);
    impl TransparentBlock<i32> for Double {
        fn transform<'a>(
            &'a self,
            _ctx: &'a DispatchContext,
            value: i32,
        ) -> BoxFuture<'a, Result<i32, Fault>> {
            Box::pin(async move { Ok(value * 2) })
        }
    }

    fn increment(journal: &Journal, fail: bool) -> MethodInvoker {
        let journal = journal.clone();
        method_invoker(move |_instance, input| {
            let journal = journal.clone();
            Ok(Box::pin(async move {
                journal.push("method");
                if fail {
                    return Err(anyhow::anyhow!("method failed"));
                }
                let value = input
                    .downcast::<i32>()
                    .map_err(|_| anyhow::anyhow!("unexpected input"))?;
                Ok(Value::new(value + 1))
            }))
        })
    }

    fn explode() -> Result<Value, Fault> {
        panic!("boom")
    }

    fn explode_recovery() -> Result<Recovery, Fault> {
        panic!("recovery exploded")
    }

    fn launcher(declarations: &[AspectDeclaration], invoker: MethodInvoker) -> Launcher {
        Launcher::compile(
            "Test::run".to_string(),
            TypeKey::of::<()>(),
            TypeKey::of::<i32>(),
            &AspectMatrix::from_declarations(declarations),
            invoker,
            None,
        )
    }

    fn scope(declarations: &[AspectDeclaration]) -> Scope {
        let mut services = ServiceCollection::new();
        for declaration in declarations {
            declaration.register(&mut services, Lifetime::Transient);
        }
        services.build().create_scope()
    }

    async fn run(launcher: &Launcher, scope: &Scope, input: i32) -> Result<Value, DispatchError> {
        let ctx = DispatchContext::new(TypeKey::of::<()>(), "run", TypeKey::of::<i32>());
        let handler: Instance = Arc::new(());
        launcher.launch(&ctx, scope, handler, Value::new(input)).await
    }

    #[tokio::test]
    async fn test_transforms_apply_to_input_and_output() {
        let declarations = [
            AspectDeclaration::transparent::<Double, i32>(Position::Pre),
            AspectDeclaration::transparent::<Double, i32>(Position::Post),
        ];
        let journal = Journal::default();
        let launcher = launcher(&declarations, increment(&journal, false));

        let out = run(&launcher, &scope(&declarations), 3).await.unwrap();

        // (3 * 2 + 1) * 2
        assert_eq!(out.downcast::<i32>().ok(), Some(14));
        assert_eq!(launcher.stage_count(), 2);
    }

    #[tokio::test]
    async fn test_error_block_substitutes() {
        let declarations = [AspectDeclaration::error::<Fallback>(Position::Unspecified)];
        let journal = Journal::default();
        let launcher = launcher(&declarations, increment(&journal, true));

        let out = run(&launcher, &scope(&declarations), 3).await.unwrap();

        assert_eq!(out.downcast::<i32>().ok(), Some(-1));
        assert_eq!(journal.entries(), vec!["method"]);
    }

    #[tokio::test]
    async fn test_unusable_error_blocks_are_skipped() {
        let declarations: Vec<_> = unrecoverable()
            .into_iter()
            .chain([AspectDeclaration::error::<Fallback>(Position::Unspecified)])
            .collect();
        let journal = Journal::default();
        let launcher = launcher(&declarations, increment(&journal, true));

        let out = run(&launcher, &scope(&declarations), 3).await.unwrap();

        assert_eq!(out.downcast::<i32>().ok(), Some(-1));
    }

    #[tokio::test]
    async fn test_original_fault_when_nothing_substitutes() {
        let declarations = unrecoverable();
        let journal = Journal::default();
        let launcher = launcher(&declarations, increment(&journal, true));

        let err = run(&launcher, &scope(&declarations), 3).await.unwrap_err();

        assert!(matches!(err, DispatchError::Fault { .. }));
        assert!(err.to_string().contains("method failed"));
        assert!(!err.to_string().contains("recovery"));
    }

    #[tokio::test]
    async fn test_panicking_block_constructor_is_resolution_failure() {
        let declarations = [AspectDeclaration::neutral::<Fragile>(Position::Pre)];
        let journal = Journal::default();
        let launcher = launcher(&declarations, increment(&journal, false));

        let err = run(&launcher, &scope(&declarations), 3).await.unwrap_err();

        match err {
            DispatchError::BlockResolutionFailed { block, source } => {
                assert_eq!(block, TypeKey::of::<Fragile>());
                assert!(source.to_string().contains("constructor exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_pre_fault_skips_method() {
        let declarations = [AspectDeclaration::neutral::<Failing>(Position::Pre)];
        let journal = Journal::default();
        let launcher = launcher(&declarations, increment(&journal, false));

        let err = run(&launcher, &scope(&declarations), 3).await.unwrap_err();

        assert!(matches!(err, DispatchError::Fault { .. }));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_post_fault_bypasses_error_blocks() {
        let declarations = [
            AspectDeclaration::neutral::<Failing>(Position::Post),
            AspectDeclaration::error::<Fallback>(Position::Unspecified),
        ];
        let journal = Journal::default();
        let launcher = launcher(&declarations, increment(&journal, false));

        let err = run(&launcher, &scope(&declarations), 3).await.unwrap_err();

        assert!(err.to_string().contains("blocked"));
        assert_eq!(journal.entries(), vec!["method"]);
    }

    #[tokio::test]
    async fn test_unresolvable_block() {
        let declarations = [AspectDeclaration::neutral::<Quiet>(Position::Pre)];
        let journal = Journal::default();
        let launcher = launcher(&declarations, increment(&journal, false));

        let err = run(&launcher, &scope(&[]), 3).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::BlockResolutionFailed { block, .. } if block == TypeKey::of::<Quiet>()
        ));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let launcher = launcher(
            &[],
            method_invoker(|_instance, _input| Ok(Box::pin(async { explode() }))),
        );

        let err = run(&launcher, &scope(&[]), 3).await.unwrap_err();

        assert!(matches!(err, DispatchError::Fault { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_panic_is_offered_to_error_blocks() {
        let declarations = [AspectDeclaration::error::<Fallback>(Position::Unspecified)];
        let launcher = launcher(
            &declarations,
            method_invoker(|_instance, _input| Ok(Box::pin(async { explode() }))),
        );

        let out = run(&launcher, &scope(&declarations), 3).await.unwrap();

        assert_eq!(out.downcast::<i32>().ok(), Some(-1));
    }

    #[tokio::test]
    async fn test_aborting_launcher() {
        let journal = Journal::default();
        let launcher = Launcher::compile(
            "Test::run".to_string(),
            TypeKey::of::<()>(),
            TypeKey::of::<i32>(),
            &AspectMatrix::default(),
            increment(&journal, false),
            Some(LifetimeAbort {
                handler_lifetime: Lifetime::Singleton,
                block: TypeKey::of::<Quiet>(),
                block_lifetime: Lifetime::Scoped,
            }),
        );

        let err = run(&launcher, &scope(&[]), 3).await.unwrap_err();

        assert!(matches!(err, DispatchError::LifetimeConflict { .. }));
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_panic_payloads() {
        assert_eq!(panic_fault(&"static").to_string(), "panicked: static");
        assert_eq!(
            panic_fault(&String::from("owned")).to_string(),
            "panicked: owned"
        );
        assert_eq!(
            panic_fault(&42_u8).to_string(),
            "panicked: opaque panic payload"
        );
    }
}
