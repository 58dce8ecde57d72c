// Loader Cache Library
// Named loader stacks composed into sync, callback, future, and stream pipelines

pub mod engine;
pub mod error;
pub mod execution;
pub mod iterators;
pub mod stack;
pub mod utils;

// Re-export commonly used types
pub use error::{LoaderError, LoaderResult};

// Re-export engine types
pub use engine::{EngineConfig, LoaderCache, LoaderType};

// Re-export stack types
pub use stack::{
    Loader, LoaderFn, LoaderKind, Next, PromiseFuture, PromiseStep, Registry, ResolvedStep,
    Resolver, StepRef, ValueStream,
};

// Re-export execution types
pub use execution::{
    progress_channel, split_call_args, Arg, LoadContext, LoadEvent, LoadOptions, ProgressReceiver,
    ProgressSender, SplitArgs,
};

// Re-export iterator types
pub use iterators::{
    AsyncIterator, AsyncLoad, AsyncRun, Composed, Driver, PromiseIterator, PromiseLoad,
    PromiseRun, StreamIterator, StreamLoad, StreamRun, Strategy, SyncIterator, SyncLoad, SyncRun,
};
