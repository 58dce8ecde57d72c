// Iterators Module
// Execution strategies that drive a resolved stack under one calling convention

pub mod callback;
pub mod promise;
pub mod stream;
pub mod sync;

// Re-export key types
pub use callback::{AsyncIterator, AsyncLoad, AsyncRun};
pub use promise::{PromiseIterator, PromiseLoad, PromiseRun};
pub use stream::{StreamIterator, StreamLoad, StreamRun};
pub use sync::{SyncIterator, SyncLoad, SyncRun};

use crate::error::{LoaderError, LoaderResult};
use crate::execution::context::LoadContext;
use crate::stack::models::{LoaderKind, ResolvedStep, StepRef};

use std::fmt;
use std::sync::Arc;

/// Trait for execution strategies.
///
/// A strategy turns a resolved stack and its context into a callable with the
/// calling convention of its kind. Strategies never re-resolve the composed
/// stack; only call-time extras are resolved when the callable runs.
pub trait Strategy: Send + Sync {
    /// The callable produced for a stack
    type Output;

    /// Kind driven by this strategy
    fn kind(&self) -> LoaderKind;

    /// Bind a resolved stack to this strategy
    fn iterate(&self, stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> Self::Output;
}

/// The strategy bound to one kind of an engine.
///
/// Each kind starts with its built-in strategy; replace it with
/// [`LoaderCache::set_iterator`](crate::LoaderCache::set_iterator).
#[derive(Clone)]
pub enum Driver {
    Sync(Arc<dyn Strategy<Output = SyncLoad>>),
    Async(Arc<dyn Strategy<Output = AsyncLoad>>),
    Promise(Arc<dyn Strategy<Output = PromiseLoad>>),
    Stream(Arc<dyn Strategy<Output = StreamLoad>>),
}

impl Driver {
    pub fn sync<S>(strategy: S) -> Self
    where
        S: Strategy<Output = SyncLoad> + 'static,
    {
        Driver::Sync(Arc::new(strategy))
    }

    pub fn callback<S>(strategy: S) -> Self
    where
        S: Strategy<Output = AsyncLoad> + 'static,
    {
        Driver::Async(Arc::new(strategy))
    }

    pub fn promise<S>(strategy: S) -> Self
    where
        S: Strategy<Output = PromiseLoad> + 'static,
    {
        Driver::Promise(Arc::new(strategy))
    }

    pub fn stream<S>(strategy: S) -> Self
    where
        S: Strategy<Output = StreamLoad> + 'static,
    {
        Driver::Stream(Arc::new(strategy))
    }

    /// The built-in strategy for `kind`
    pub fn builtin(kind: LoaderKind, defer_stream_write: bool) -> Self {
        match kind {
            LoaderKind::Sync => Driver::sync(SyncIterator),
            LoaderKind::Async => Driver::callback(AsyncIterator),
            LoaderKind::Promise => Driver::promise(PromiseIterator),
            LoaderKind::Stream => Driver::stream(StreamIterator::new(defer_stream_write)),
        }
    }

    /// Kind whose calling convention this driver produces
    pub fn kind(&self) -> LoaderKind {
        match self {
            Driver::Sync(_) => LoaderKind::Sync,
            Driver::Async(_) => LoaderKind::Async,
            Driver::Promise(_) => LoaderKind::Promise,
            Driver::Stream(_) => LoaderKind::Stream,
        }
    }

    /// Bind a resolved stack to the strategy
    pub fn iterate(&self, stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> Composed {
        match self {
            Driver::Sync(strategy) => Composed::Sync(strategy.iterate(stack, ctx)),
            Driver::Async(strategy) => Composed::Async(strategy.iterate(stack, ctx)),
            Driver::Promise(strategy) => Composed::Promise(strategy.iterate(stack, ctx)),
            Driver::Stream(strategy) => Composed::Stream(strategy.iterate(stack, ctx)),
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Driver").field(&self.kind()).finish()
    }
}

/// A composed stack bound to one of the four strategies
#[derive(Debug, Clone)]
pub enum Composed {
    Sync(SyncLoad),
    Async(AsyncLoad),
    Promise(PromiseLoad),
    Stream(StreamLoad),
}

impl Composed {
    pub fn kind(&self) -> LoaderKind {
        match self {
            Composed::Sync(_) => LoaderKind::Sync,
            Composed::Async(_) => LoaderKind::Async,
            Composed::Promise(_) => LoaderKind::Promise,
            Composed::Stream(_) => LoaderKind::Stream,
        }
    }

    /// The composed (already resolved) stack
    pub fn stack(&self) -> &[ResolvedStep] {
        match self {
            Composed::Sync(load) => load.stack(),
            Composed::Async(load) => load.stack(),
            Composed::Promise(load) => load.stack(),
            Composed::Stream(load) => load.stack(),
        }
    }

    pub fn into_sync(self) -> LoaderResult<SyncLoad> {
        match self {
            Composed::Sync(load) => Ok(load),
            other => Err(other.mismatch(LoaderKind::Sync)),
        }
    }

    pub fn into_async(self) -> LoaderResult<AsyncLoad> {
        match self {
            Composed::Async(load) => Ok(load),
            other => Err(other.mismatch(LoaderKind::Async)),
        }
    }

    pub fn into_promise(self) -> LoaderResult<PromiseLoad> {
        match self {
            Composed::Promise(load) => Ok(load),
            other => Err(other.mismatch(LoaderKind::Promise)),
        }
    }

    pub fn into_stream(self) -> LoaderResult<StreamLoad> {
        match self {
            Composed::Stream(load) => Ok(load),
            other => Err(other.mismatch(LoaderKind::Stream)),
        }
    }

    fn mismatch(&self, expected: LoaderKind) -> LoaderError {
        LoaderError::KindMismatch {
            expected,
            actual: self.kind(),
        }
    }
}

/// Build the stack for one invocation: composed stack, then call-time extras,
/// then the default loader when nothing remains, then the wrap option.
pub(crate) fn prepare(
    stack: &Arc<[ResolvedStep]>,
    ctx: &LoadContext,
    extra: Vec<StepRef>,
) -> LoaderResult<Arc<[ResolvedStep]>> {
    let options = ctx.options();
    let unchanged = extra.is_empty()
        && options.wrap.is_none()
        && (!stack.is_empty() || options.default_loader.is_none());
    if unchanged {
        return Ok(stack.clone());
    }

    let mut steps: Vec<ResolvedStep> = stack.to_vec();
    if !extra.is_empty() {
        steps.extend(ctx.app().resolve_kind(ctx.kind(), extra)?);
    }

    if steps.is_empty() {
        if let Some(default_loader) = &options.default_loader {
            steps = ctx.app().resolve_kind(ctx.kind(), default_loader.clone())?;
        }
    }

    if let Some(wrap) = &options.wrap {
        steps = steps
            .into_iter()
            .map(|step| match step {
                ResolvedStep::Loader(loader) => ResolvedStep::Loader(wrap(loader)),
                missing => missing,
            })
            .collect();
    }

    Ok(steps.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::LoaderCache;

    #[test]
    fn test_composed_kind_conversion() {
        let app = LoaderCache::new();
        app.register("a", crate::Loader::sync(|_, v| Ok(v))).unwrap();

        let composed = app.compose("a").unwrap();
        assert_eq!(composed.kind(), LoaderKind::Sync);
        assert_eq!(composed.stack().len(), 1);

        let err = composed.clone().into_stream().unwrap_err();
        assert!(matches!(
            err,
            LoaderError::KindMismatch {
                expected: LoaderKind::Stream,
                actual: LoaderKind::Sync
            }
        ));
        assert!(composed.into_sync().is_ok());
    }
}
