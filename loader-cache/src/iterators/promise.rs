// Promise Iterator
// Awaits each step in turn, feeding the resolved value into the next

use crate::error::{LoaderError, LoaderResult};
use crate::execution::args::{split_call_args, Arg};
use crate::execution::context::LoadContext;
use crate::execution::events::LoadEvent;
use crate::iterators::{prepare, Strategy};
use crate::stack::models::{
    first_value, LoaderFn, LoaderKind, Next, PromiseFuture, ResolvedStep,
};

use futures::future::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Runs a prepared stack, resolving to its final value
pub type PromiseRun =
    Arc<dyn Fn(Arc<[ResolvedStep]>, LoadContext, Vec<Value>) -> PromiseFuture + Send + Sync>;

/// Strategy for future-returning execution
#[derive(Debug, Clone, Copy, Default)]
pub struct PromiseIterator;

impl Strategy for PromiseIterator {
    type Output = PromiseLoad;

    fn kind(&self) -> LoaderKind {
        LoaderKind::Promise
    }

    fn iterate(&self, stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> PromiseLoad {
        PromiseLoad::new(stack, ctx)
    }
}

/// A stack composed into a future-returning callable
#[derive(Clone)]
pub struct PromiseLoad {
    stack: Arc<[ResolvedStep]>,
    ctx: LoadContext,
    run: PromiseRun,
}

impl PromiseLoad {
    /// Bind `stack` to the built-in sequential runner
    pub fn new(stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> Self {
        Self::with_runner(stack, ctx, Arc::new(drive))
    }

    /// Bind `stack` to a custom runner
    pub fn with_runner(stack: Arc<[ResolvedStep]>, ctx: LoadContext, run: PromiseRun) -> Self {
        Self { stack, ctx, run }
    }

    /// Run the stack, resolving to the last step's value.
    ///
    /// Nothing runs until the returned future is polled. Argument errors are
    /// reported through the future like any step failure.
    pub fn call(&self, args: Vec<Arg>) -> PromiseFuture {
        let split = split_call_args(args, LoaderKind::Promise);
        let stack = self.stack.clone();
        let ctx = self.ctx.clone();
        let run = self.run.clone();

        async move {
            let split = split?;
            let stack = prepare(&stack, &ctx, split.extra)?;
            run(stack, ctx, split.data).await
        }
        .boxed()
    }

    /// Run the stack against a single value
    pub fn load(&self, value: impl Into<Value>) -> PromiseFuture {
        self.call(vec![Arg::Data(value.into())])
    }

    pub fn stack(&self) -> &[ResolvedStep] {
        &self.stack
    }

    pub fn context(&self) -> &LoadContext {
        &self.ctx
    }
}

impl fmt::Debug for PromiseLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseLoad")
            .field("stack", &self.stack)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Built-in runner: awaits each step in order
pub fn drive(stack: Arc<[ResolvedStep]>, ctx: LoadContext, data: Vec<Value>) -> PromiseFuture {
    run(stack, ctx, data).boxed()
}

async fn run(
    stack: Arc<[ResolvedStep]>,
    ctx: LoadContext,
    data: Vec<Value>,
) -> LoaderResult<Value> {
    let started = Instant::now();
    let name = ctx.owned_name();
    let mut args = data;

    for (index, step) in stack.iter().enumerate() {
        let label = step.label();
        ctx.emit(LoadEvent::step_started(
            name.clone(),
            LoaderKind::Promise,
            index,
            label.as_str(),
        ));

        let step_started = Instant::now();
        let result = call_step(step, &ctx, args).await;
        ctx.emit(LoadEvent::step_completed(
            name.clone(),
            LoaderKind::Promise,
            index,
            label.as_str(),
            result.is_ok(),
            step_started.elapsed(),
        ));

        match result {
            Ok(value) => args = vec![value],
            Err(err) => {
                tracing::debug!(step = %label, index, error = %err, "promise loader failed");
                ctx.emit(LoadEvent::error(err.to_string(), name.clone(), Some(index)));
                ctx.emit(LoadEvent::stack_completed(
                    name,
                    LoaderKind::Promise,
                    false,
                    started.elapsed(),
                ));
                return Err(err);
            }
        }
    }

    ctx.emit(LoadEvent::stack_completed(
        name,
        LoaderKind::Promise,
        true,
        started.elapsed(),
    ));
    Ok(first_value(args))
}

async fn call_step(
    step: &ResolvedStep,
    ctx: &LoadContext,
    args: Vec<Value>,
) -> LoaderResult<Value> {
    let func = match step {
        ResolvedStep::Missing(_) => return Err(step.not_callable()),
        ResolvedStep::Loader(loader) => loader.func().clone(),
    };

    match func {
        LoaderFn::Promise(f) => f(ctx.clone(), args).await,
        LoaderFn::Sync(f) => f(ctx, args),
        LoaderFn::Async(f) => {
            let (tx, rx) = oneshot::channel();
            let next: Next = Box::new(move |result| {
                let _ = tx.send(result);
            });
            f(ctx.clone(), args, next);
            rx.await.map_err(|_| LoaderError::Canceled)?
        }
        LoaderFn::Stream(_) => Err(step.incompatible(LoaderKind::Promise)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::LoaderCache;
    use crate::stack::models::{Loader, PromiseStep};
    use crate::{args, steps};

    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const KIND: LoaderKind = LoaderKind::Promise;

    struct Suffix(&'static str);

    #[async_trait::async_trait]
    impl PromiseStep for Suffix {
        async fn load(&self, _ctx: LoadContext, args: Vec<Value>) -> LoaderResult<Value> {
            let text = args[0].as_str().unwrap_or_default();
            Ok(json!(format!("{}{}", text, self.0)))
        }
    }

    #[tokio::test]
    async fn test_empty_stack_resolves_first_argument() {
        let app = LoaderCache::new();
        let load = app.compose_promise("missing-name").unwrap();
        assert_eq!(load.load(json!([1, 2])).await.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_awaits_each_step_in_order() {
        let app = LoaderCache::new();
        app.register_kind(
            KIND,
            "delayed",
            Loader::promise(|_, v| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(json!(format!("{}1", v.as_str().unwrap_or_default())))
            }),
        )
        .unwrap();
        app.register_kind(KIND, "two", Loader::from_step(Suffix("2")))
            .unwrap();
        app.register_kind(KIND, "three", Loader::sync(|_, v| {
            Ok(json!(format!("{}3", v.as_str().unwrap_or_default())))
        }))
        .unwrap();
        app.register_kind(KIND, "all", steps!["delayed", "two", "three"])
            .unwrap();

        let load = app.compose_promise("all").unwrap();
        assert_eq!(load.load("").await.unwrap(), json!("123"));
    }

    #[tokio::test]
    async fn test_rejection_short_circuits() {
        let after = Arc::new(AtomicUsize::new(0));
        let counter = after.clone();

        let app = LoaderCache::new();
        app.register_kind(
            KIND,
            "reject",
            Loader::promise(|_, _| async { Err(LoaderError::msg("rejected")) }),
        )
        .unwrap();
        app.register_kind(
            KIND,
            "after",
            Loader::promise(move |_, v| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(v) }
            }),
        )
        .unwrap();
        app.register_kind(KIND, "chain", steps!["reject", "after"])
            .unwrap();

        let err = app.compose_promise("chain").unwrap().load("x").await.unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bridges_callback_loaders() {
        let app = LoaderCache::new();
        app.register_kind(
            KIND,
            "cb",
            Loader::callback(|_, v, next| next(Ok(json!({ "wrapped": v })))),
        )
        .unwrap();

        let load = app.compose_promise("cb").unwrap();
        assert_eq!(load.load(7).await.unwrap(), json!({"wrapped": 7}));
    }

    #[tokio::test]
    async fn test_stream_loader_is_incompatible() {
        let app = LoaderCache::new();
        app.register_kind(KIND, "s", Loader::through(Ok).named("s"))
            .unwrap();

        let err = app.compose_promise("s").unwrap().load("x").await.unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Incompatible { kind: LoaderKind::Promise, ref label } if label == "s"
        ));
    }

    #[tokio::test]
    async fn test_argument_errors_reject() {
        let app = LoaderCache::new();
        let load = app.compose_promise("any").unwrap();
        let err = load
            .call(args![Loader::sync(|_, v| Ok(v))])
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_call_time_loaders_run_after_stack() {
        let app = LoaderCache::new();
        app.register_kind(KIND, "two", Loader::from_step(Suffix("2")))
            .unwrap();

        let load = app.compose_promise("two").unwrap();
        let extra = Loader::from_step(Suffix("!"));
        assert_eq!(load.call(args!["1", extra]).await.unwrap(), json!("12!"));
    }
}
