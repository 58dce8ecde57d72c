// Stack Module
// Loader types, the named stack registry, and the resolver that flattens it

pub mod models;
pub mod registry;
pub mod resolver;

// Re-export key types
pub use models::{
    Loader, LoaderFn, LoaderKind, Next, PromiseFuture, PromiseStep, ResolvedStep, StepRef,
    ValueStream,
};
pub use registry::{validate_name, Lookup, Registry};
pub use resolver::Resolver;
