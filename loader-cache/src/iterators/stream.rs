// Stream Iterator
// Pipes every step into one record stream and writes the input at its head

use crate::error::{LoaderError, LoaderResult};
use crate::execution::args::{split_call_args, Arg};
use crate::execution::context::LoadContext;
use crate::execution::events::LoadEvent;
use crate::iterators::{prepare, Strategy};
use crate::stack::models::{LoaderFn, LoaderKind, ResolvedStep, ValueStream};

use futures::future;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Builds the record pipeline for a prepared stack on top of `head`
pub type StreamRun = Arc<
    dyn Fn(&[ResolvedStep], &LoadContext, ValueStream) -> LoaderResult<ValueStream> + Send + Sync,
>;

/// Strategy for stream execution
#[derive(Debug, Clone, Copy)]
pub struct StreamIterator {
    defer: bool,
}

impl StreamIterator {
    /// `defer` postpones the head write to a spawned task when a runtime is available
    pub fn new(defer: bool) -> Self {
        Self { defer }
    }
}

impl Default for StreamIterator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Strategy for StreamIterator {
    type Output = StreamLoad;

    fn kind(&self) -> LoaderKind {
        LoaderKind::Stream
    }

    fn iterate(&self, stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> StreamLoad {
        StreamLoad::new(stack, ctx, self.defer)
    }
}

/// A stack composed into a record stream
#[derive(Clone)]
pub struct StreamLoad {
    stack: Arc<[ResolvedStep]>,
    ctx: LoadContext,
    defer: bool,
    run: StreamRun,
}

impl StreamLoad {
    /// Bind `stack` to the built-in pipeline
    pub fn new(stack: Arc<[ResolvedStep]>, ctx: LoadContext, defer: bool) -> Self {
        Self::with_runner(stack, ctx, defer, Arc::new(pipe))
    }

    /// Bind `stack` to a custom pipeline builder
    pub fn with_runner(
        stack: Arc<[ResolvedStep]>,
        ctx: LoadContext,
        defer: bool,
        run: StreamRun,
    ) -> Self {
        Self {
            stack,
            ctx,
            defer,
            run,
        }
    }

    /// Build the pipeline and write the first data argument at its head.
    ///
    /// Failures of individual records arrive as `Err` items; a step may keep
    /// producing records after an error, so consumers decide whether to stop.
    /// A stack that cannot run at all (an unregistered name or a callback
    /// loader) yields a single `Err` item whether or not data was passed. An
    /// empty stack re-emits the input unchanged.
    pub fn call(&self, args: Vec<Arg>) -> ValueStream {
        let split = match split_call_args(args, LoaderKind::Stream) {
            Ok(split) => split,
            Err(err) => return failed(err),
        };
        let stack = match prepare(&self.stack, &self.ctx, split.extra) {
            Ok(stack) => stack,
            Err(err) => return failed(err),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let head = UnboundedReceiverStream::new(rx).boxed();
        match (self.run)(&stack, &self.ctx, head) {
            Ok(output) => {
                write_head(tx, split.data.into_iter().next(), self.defer);
                output
            }
            Err(err) => failed(err),
        }
    }

    /// Pipe a single value through the stack
    pub fn load(&self, value: impl Into<Value>) -> ValueStream {
        self.call(vec![Arg::Data(value.into())])
    }

    pub fn stack(&self) -> &[ResolvedStep] {
        &self.stack
    }

    pub fn context(&self) -> &LoadContext {
        &self.ctx
    }
}

impl fmt::Debug for StreamLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLoad")
            .field("stack", &self.stack)
            .field("ctx", &self.ctx)
            .field("defer", &self.defer)
            .finish_non_exhaustive()
    }
}

fn failed(err: LoaderError) -> ValueStream {
    stream::once(future::ready(Err(err))).boxed()
}

/// Write the head record, then end the input by dropping the sender
fn write_head(tx: mpsc::UnboundedSender<LoaderResult<Value>>, value: Option<Value>, defer: bool) {
    let write = move || {
        if let Some(value) = value {
            let _ = tx.send(Ok(value));
        }
    };

    if defer {
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                tokio::task::yield_now().await;
                write();
            });
            return;
        }
        tracing::trace!("no tokio runtime, writing stream head immediately");
    }
    write();
}

/// Built-in pipeline: each step consumes the previous step's records.
///
/// Fails before any record flows when a step cannot take part in a stream.
/// `StepStarted` events fire once the output is first polled, and each
/// step's `StepCompleted` fires when its own output ends.
pub fn pipe(
    stack: &[ResolvedStep],
    ctx: &LoadContext,
    head: ValueStream,
) -> LoaderResult<ValueStream> {
    let name = ctx.owned_name();
    let mut piped = head;

    for (index, step) in stack.iter().enumerate() {
        piped = match attach(step, ctx, piped) {
            Ok(output) => track_step(index, step.label(), ctx, output),
            Err(err) => {
                tracing::debug!(
                    step = %step.label(),
                    index,
                    error = %err,
                    "stream loader cannot run"
                );
                ctx.emit(LoadEvent::error(err.to_string(), name.clone(), Some(index)));
                ctx.emit(LoadEvent::stack_completed(
                    name,
                    LoaderKind::Stream,
                    false,
                    Duration::ZERO,
                ));
                return Err(err);
            }
        };
    }

    let ok = Arc::new(AtomicBool::new(true));
    let failed = ok.clone();
    let error_ctx = ctx.clone();
    let observed = piped.inspect(move |item| {
        if let Err(err) = item {
            tracing::debug!(error = %err, "stream record failed");
            failed.store(false, Ordering::SeqCst);
            error_ctx.emit(LoadEvent::error(err.to_string(), error_ctx.owned_name(), None));
        }
    });

    let started = Instant::now();
    let end_ctx = ctx.clone();
    let observed = on_end(observed, move || {
        end_ctx.emit(LoadEvent::stack_completed(
            end_ctx.owned_name(),
            LoaderKind::Stream,
            ok.load(Ordering::SeqCst),
            started.elapsed(),
        ));
    });

    let labels: Vec<String> = stack.iter().map(ResolvedStep::label).collect();
    let start_ctx = ctx.clone();
    Ok(stream::once(async move {
        for (index, label) in labels.iter().enumerate() {
            start_ctx.emit(LoadEvent::step_started(
                start_ctx.owned_name(),
                LoaderKind::Stream,
                index,
                label.as_str(),
            ));
        }
        observed
    })
    .flatten()
    .boxed())
}

/// Attach one step to the pipeline, lifting sync and promise loaders into
/// single-record transforms
fn attach(
    step: &ResolvedStep,
    ctx: &LoadContext,
    input: ValueStream,
) -> LoaderResult<ValueStream> {
    let func = match step {
        ResolvedStep::Missing(_) => return Err(step.not_callable()),
        ResolvedStep::Loader(loader) => loader.func().clone(),
    };

    let output = match func {
        LoaderFn::Stream(f) => f(ctx.clone(), input),
        LoaderFn::Sync(f) => {
            let ctx = ctx.clone();
            input
                .map(move |item| item.and_then(|value| f(&ctx, vec![value])))
                .boxed()
        }
        LoaderFn::Promise(f) => {
            let ctx = ctx.clone();
            input
                .then(move |item| {
                    let f = f.clone();
                    let ctx = ctx.clone();
                    async move {
                        match item {
                            Ok(value) => f(ctx, vec![value]).await,
                            Err(err) => Err(err),
                        }
                    }
                })
                .boxed()
        }
        LoaderFn::Async(_) => return Err(step.incompatible(LoaderKind::Stream)),
    };
    Ok(output)
}

/// Report a step as completed once its output ends; it fails if any record
/// leaving it was an error
fn track_step(index: usize, label: String, ctx: &LoadContext, output: ValueStream) -> ValueStream {
    let started = Instant::now();
    let ok = Arc::new(AtomicBool::new(true));
    let failed = ok.clone();
    let output = output.inspect(move |item| {
        if item.is_err() {
            failed.store(false, Ordering::SeqCst);
        }
    });

    let ctx = ctx.clone();
    on_end(output, move || {
        ctx.emit(LoadEvent::step_completed(
            ctx.owned_name(),
            LoaderKind::Stream,
            index,
            label.as_str(),
            ok.load(Ordering::SeqCst),
            started.elapsed(),
        ));
    })
}

/// Run `f` after the last record of `input`
fn on_end<S, F>(input: S, f: F) -> ValueStream
where
    S: Stream<Item = LoaderResult<Value>> + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    let end = stream::once(async move {
        f();
        None
    })
    .filter_map(|item: Option<LoaderResult<Value>>| future::ready(item));

    input.chain(end).boxed()
}
