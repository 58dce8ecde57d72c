// Sync Iterator
// Runs a resolved stack immediately, threading each return value into the next step

use crate::error::LoaderResult;
use crate::execution::args::{split_call_args, Arg};
use crate::execution::context::LoadContext;
use crate::execution::events::LoadEvent;
use crate::iterators::{prepare, Strategy};
use crate::stack::models::{first_value, LoaderFn, LoaderKind, ResolvedStep};

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Runs a prepared stack against the call's data arguments
pub type SyncRun =
    Arc<dyn Fn(&[ResolvedStep], &LoadContext, Vec<Value>) -> LoaderResult<Value> + Send + Sync>;

/// Strategy for immediate execution
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncIterator;

impl Strategy for SyncIterator {
    type Output = SyncLoad;

    fn kind(&self) -> LoaderKind {
        LoaderKind::Sync
    }

    fn iterate(&self, stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> SyncLoad {
        SyncLoad::new(stack, ctx)
    }
}

/// A stack composed for immediate execution
#[derive(Clone)]
pub struct SyncLoad {
    stack: Arc<[ResolvedStep]>,
    ctx: LoadContext,
    run: SyncRun,
}

impl SyncLoad {
    /// Bind `stack` to the built-in sequential runner
    pub fn new(stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> Self {
        Self::with_runner(stack, ctx, Arc::new(run))
    }

    /// Bind `stack` to a custom runner. Call-time extras, the default loader
    /// and wrap are applied before `run` sees the stack.
    pub fn with_runner(stack: Arc<[ResolvedStep]>, ctx: LoadContext, run: SyncRun) -> Self {
        Self { stack, ctx, run }
    }

    /// Run the stack.
    ///
    /// The first step receives every data argument; each later step receives
    /// the previous return value. Trailing loader arguments run after the
    /// composed stack. An error from any step stops the stack and is returned.
    pub fn call(&self, args: Vec<Arg>) -> LoaderResult<Value> {
        let split = split_call_args(args, LoaderKind::Sync)?;
        let stack = prepare(&self.stack, &self.ctx, split.extra)?;
        (self.run)(&stack, &self.ctx, split.data)
    }

    /// Run the stack against a single value
    pub fn load(&self, value: impl Into<Value>) -> LoaderResult<Value> {
        self.call(vec![Arg::Data(value.into())])
    }

    pub fn stack(&self) -> &[ResolvedStep] {
        &self.stack
    }

    pub fn context(&self) -> &LoadContext {
        &self.ctx
    }
}

impl fmt::Debug for SyncLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncLoad")
            .field("stack", &self.stack)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Built-in runner: each step receives the previous step's return value
pub fn run(
    stack: &[ResolvedStep],
    ctx: &LoadContext,
    data: Vec<Value>,
) -> LoaderResult<Value> {
    let started = Instant::now();
    let name = ctx.owned_name();
    let mut args = data;

    for (index, step) in stack.iter().enumerate() {
        let label = step.label();
        ctx.emit(LoadEvent::step_started(
            name.clone(),
            LoaderKind::Sync,
            index,
            label.as_str(),
        ));

        let step_started = Instant::now();
        let result = call_step(step, ctx, args);
        ctx.emit(LoadEvent::step_completed(
            name.clone(),
            LoaderKind::Sync,
            index,
            label.as_str(),
            result.is_ok(),
            step_started.elapsed(),
        ));

        match result {
            Ok(value) => args = vec![value],
            Err(err) => {
                tracing::debug!(step = %label, index, error = %err, "sync loader failed");
                ctx.emit(LoadEvent::error(err.to_string(), name.clone(), Some(index)));
                ctx.emit(LoadEvent::stack_completed(
                    name,
                    LoaderKind::Sync,
                    false,
                    started.elapsed(),
                ));
                return Err(err);
            }
        }
    }

    ctx.emit(LoadEvent::stack_completed(
        name,
        LoaderKind::Sync,
        true,
        started.elapsed(),
    ));
    Ok(first_value(args))
}

fn call_step(step: &ResolvedStep, ctx: &LoadContext, args: Vec<Value>) -> LoaderResult<Value> {
    match step {
        ResolvedStep::Missing(_) => Err(step.not_callable()),
        ResolvedStep::Loader(loader) => match loader.func() {
            LoaderFn::Sync(f) => f(ctx, args),
            _ => Err(step.incompatible(LoaderKind::Sync)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::LoaderCache;
    use crate::error::LoaderError;
    use crate::execution::events::progress_channel;
    use crate::stack::models::Loader;
    use crate::{args, steps};

    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_step_receives_all_arguments() {
        let app = LoaderCache::new();
        app.register(
            "pair",
            Loader::sync_args(|_, args| {
                let mut obj = serde_json::Map::new();
                let key = args[0].as_str().unwrap_or_default().to_string();
                obj.insert(key, args[1].clone());
                Ok(Value::Object(obj))
            }),
        )
        .unwrap();
        app.register(
            "tag",
            Loader::sync_args(|_, args| {
                assert_eq!(args.len(), 1);
                let mut obj = args[0].clone();
                obj["tagged"] = json!(true);
                Ok(obj)
            }),
        )
        .unwrap();
        app.register("d", steps!["pair", "tag"]).unwrap();

        let load = app.compose_sync("d").unwrap();
        let result = load.call(args!["one", "two"]).unwrap();
        assert_eq!(result, json!({"one": "two", "tagged": true}));
    }

    #[test]
    fn test_empty_stack_returns_first_argument() {
        let app = LoaderCache::new();
        let load = app.compose_sync("missing-name").unwrap();
        assert_eq!(load.load(json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert_eq!(load.call(Vec::new()).unwrap(), Value::Null);
    }

    #[test]
    fn test_error_aborts_remaining_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let app = LoaderCache::new();
        app.register(
            "fail",
            Loader::sync(|_, _| Err(LoaderError::step("fail", "bad input"))).named("fail"),
        )
        .unwrap();
        app.register(
            "count",
            Loader::sync(move |_, v| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            }),
        )
        .unwrap();
        app.register("stack", steps!["count", "fail", "count"]).unwrap();

        let err = app.compose_sync("stack").unwrap().load("x").unwrap_err();
        assert!(matches!(err, LoaderError::Step { ref label, .. } if label == "fail"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_step_fails_at_execution() {
        let app = LoaderCache::new();
        app.register("broken", steps!["not-registered"]).unwrap();

        // Composition succeeds; the unknown name only fails when run
        let load = app.compose_sync("broken").unwrap();
        assert_eq!(load.stack().len(), 1);

        let err = load.load("x").unwrap_err();
        assert!(matches!(err, LoaderError::NotCallable(ref n) if n == "not-registered"));
    }

    #[test]
    fn test_incompatible_loader_kind() {
        let app = LoaderCache::new();
        app.register("later", Loader::promise(|_, v| async move { Ok(v) }).named("later"))
            .unwrap();

        let err = app.compose_sync("later").unwrap().load("x").unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Incompatible { kind: LoaderKind::Sync, ref label } if label == "later"
        ));
    }

    #[test]
    fn test_call_time_loaders_run_after_stack() {
        let app = LoaderCache::new();
        app.register("upper", Loader::sync(|_, v| {
            Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
        }))
        .unwrap();

        let exclaim = Loader::sync(|_, v| Ok(json!(format!("{}!", v.as_str().unwrap_or_default()))));
        let load = app.compose_sync("upper").unwrap();

        assert_eq!(load.call(args!["hi", exclaim]).unwrap(), json!("HI!"));
        // The composed stack is unchanged by call-time extras
        assert_eq!(load.load("hi").unwrap(), json!("HI"));
    }

    #[test]
    fn test_loader_can_compose_through_context() {
        let app = LoaderCache::new();
        app.register("double", Loader::sync(|_, v| Ok(json!(v.as_i64().unwrap_or(0) * 2))))
            .unwrap();
        app.register(
            "quadruple",
            Loader::sync(|ctx, v| {
                let double = ctx.app().compose_sync("double")?;
                double.load(double.load(v)?)
            }),
        )
        .unwrap();

        let load = app.compose_sync("quadruple").unwrap();
        assert_eq!(load.load(3).unwrap(), json!(12));
    }

    #[test]
    fn test_emits_step_events() {
        let (tx, mut rx) = progress_channel();
        let app = LoaderCache::new().with_progress(tx);
        app.register("id", Loader::sync(|_, v| Ok(v)).named("id")).unwrap();

        app.compose_sync("id").unwrap().load("x").unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(events
            .iter()
            .any(|e| matches!(e, LoadEvent::StepStarted { label, .. } if label == "id")));
        assert!(matches!(
            events.last(),
            Some(LoadEvent::StackCompleted { success: true, .. })
        ));
    }
}
