// Async Iterator
// Continuation-passing driver: each step hands its result to the next through `next`

use crate::error::{LoaderError, LoaderResult};
use crate::execution::args::{split_call_args, Arg, Done};
use crate::execution::context::LoadContext;
use crate::execution::events::LoadEvent;
use crate::iterators::{prepare, Strategy};
use crate::stack::models::{first_value, LoaderFn, LoaderKind, ResolvedStep};

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Starts a prepared stack; the result must eventually reach `done`
pub type AsyncRun = Arc<dyn Fn(Arc<[ResolvedStep]>, LoadContext, Vec<Value>, Done) + Send + Sync>;

/// Strategy for continuation-passing execution
#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncIterator;

impl Strategy for AsyncIterator {
    type Output = AsyncLoad;

    fn kind(&self) -> LoaderKind {
        LoaderKind::Async
    }

    fn iterate(&self, stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> AsyncLoad {
        AsyncLoad::new(stack, ctx)
    }
}

/// A stack composed for continuation-passing execution
#[derive(Clone)]
pub struct AsyncLoad {
    stack: Arc<[ResolvedStep]>,
    ctx: LoadContext,
    run: AsyncRun,
}

impl AsyncLoad {
    /// Bind `stack` to the built-in continuation chain
    pub fn new(stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> Self {
        Self::with_runner(stack, ctx, Arc::new(start))
    }

    /// Bind `stack` to a custom runner
    pub fn with_runner(stack: Arc<[ResolvedStep]>, ctx: LoadContext, run: AsyncRun) -> Self {
        Self { stack, ctx, run }
    }

    /// Start the stack.
    ///
    /// The final argument must be an [`Arg::Done`] callback; it receives the
    /// last step's result, or the first error. Only malformed arguments are
    /// returned directly, everything else goes to the callback.
    pub fn call(&self, args: Vec<Arg>) -> LoaderResult<()> {
        let split = split_call_args(args, LoaderKind::Async)?;
        let done = split.done.ok_or(LoaderError::MissingCallback)?;

        match prepare(&self.stack, &self.ctx, split.extra) {
            Ok(stack) => (self.run)(stack, self.ctx.clone(), split.data, done),
            Err(err) => done(Err(err)),
        }
        Ok(())
    }

    /// Start the stack with a separate completion callback
    pub fn call_with<F>(&self, mut args: Vec<Arg>, done: F) -> LoaderResult<()>
    where
        F: FnOnce(LoaderResult<Value>) + Send + 'static,
    {
        args.push(Arg::done(done));
        self.call(args)
    }

    /// Start the stack against a single value
    pub fn load<F>(&self, value: impl Into<Value>, done: F) -> LoaderResult<()>
    where
        F: FnOnce(LoaderResult<Value>) + Send + 'static,
    {
        self.call_with(vec![Arg::Data(value.into())], done)
    }

    /// Run the stack and await the callback result.
    ///
    /// Fails with [`LoaderError::Canceled`] if a step drops its continuation
    /// without calling it.
    pub async fn call_future(&self, args: Vec<Arg>) -> LoaderResult<Value> {
        let (tx, rx) = oneshot::channel();
        self.call_with(args, move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.map_err(|_| LoaderError::Canceled)?
    }

    pub fn stack(&self) -> &[ResolvedStep] {
        &self.stack
    }

    pub fn context(&self) -> &LoadContext {
        &self.ctx
    }
}

impl fmt::Debug for AsyncLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLoad")
            .field("stack", &self.stack)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Built-in runner: sync steps run inline, async steps resume the chain
/// from their continuation
pub fn start(stack: Arc<[ResolvedStep]>, ctx: LoadContext, data: Vec<Value>, done: Done) {
    let chain = Arc::new(Chain {
        stack,
        ctx,
        started: Instant::now(),
    });
    advance(chain, 0, data, done);
}

/// State shared by every continuation of one invocation
struct Chain {
    stack: Arc<[ResolvedStep]>,
    ctx: LoadContext,
    started: Instant,
}

impl Chain {
    fn finish(&self, result: LoaderResult<Value>, failed_at: Option<usize>, done: Done) {
        let name = self.ctx.owned_name();
        if let Err(err) = &result {
            tracing::debug!(index = ?failed_at, error = %err, "async loader failed");
            self.ctx
                .emit(LoadEvent::error(err.to_string(), name.clone(), failed_at));
        }
        self.ctx.emit(LoadEvent::stack_completed(
            name,
            LoaderKind::Async,
            result.is_ok(),
            self.started.elapsed(),
        ));
        done(result);
    }

    fn step_completed(&self, index: usize, label: &str, success: bool, started: Instant) {
        self.ctx.emit(LoadEvent::step_completed(
            self.ctx.owned_name(),
            LoaderKind::Async,
            index,
            label,
            success,
            started.elapsed(),
        ));
    }
}

/// Run steps from `start` until one suspends on its continuation or the stack ends.
///
/// Sync steps run inline; an async step receives a `next` that resumes the
/// chain at the following index.
fn advance(chain: Arc<Chain>, start: usize, data: Vec<Value>, done: Done) {
    let mut args = data;

    for index in start..chain.stack.len() {
        let step = &chain.stack[index];
        let label = step.label();
        chain.ctx.emit(LoadEvent::step_started(
            chain.ctx.owned_name(),
            LoaderKind::Async,
            index,
            label.as_str(),
        ));
        let step_started = Instant::now();

        let func = match step {
            ResolvedStep::Missing(_) => {
                chain.step_completed(index, &label, false, step_started);
                chain.finish(Err(step.not_callable()), Some(index), done);
                return;
            }
            ResolvedStep::Loader(loader) => loader.func().clone(),
        };

        match func {
            LoaderFn::Sync(f) => {
                let result = f(&chain.ctx, args);
                chain.step_completed(index, &label, result.is_ok(), step_started);
                match result {
                    Ok(value) => args = vec![value],
                    Err(err) => {
                        chain.finish(Err(err), Some(index), done);
                        return;
                    }
                }
            }
            LoaderFn::Async(f) => {
                let resume = chain.clone();
                let next: Done = Box::new(move |result: LoaderResult<Value>| {
                    resume.step_completed(index, &label, result.is_ok(), step_started);
                    match result {
                        Ok(value) => advance(resume, index + 1, vec![value], done),
                        Err(err) => resume.finish(Err(err), Some(index), done),
                    }
                });
                f(chain.ctx.clone(), args, next);
                return;
            }
            _ => {
                chain.step_completed(index, &label, false, step_started);
                chain.finish(Err(step.incompatible(LoaderKind::Async)), Some(index), done);
                return;
            }
        }
    }

    chain.finish(Ok(first_value(args)), None, done);
}
