// Loader Types
// A registry scoped to one execution kind, paired with that kind's strategy

use crate::error::{LoaderError, LoaderResult};
use crate::execution::context::LoadContext;
use crate::iterators::{Composed, Driver};
use crate::stack::models::{LoaderKind, ResolvedStep, StepRef};
use crate::stack::registry::Registry;
use crate::stack::resolver::Resolver;

use std::sync::Arc;

/// Named stacks of one kind plus the strategy that drives them
#[derive(Debug, Clone)]
pub struct LoaderType {
    kind: LoaderKind,
    registry: Registry,
    driver: Driver,
}

impl LoaderType {
    pub fn new(kind: LoaderKind) -> Self {
        Self {
            kind,
            registry: Registry::new(),
            driver: Driver::builtin(kind, true),
        }
    }

    /// Choose whether the built-in stream strategy defers its head write;
    /// other kinds are unaffected
    pub fn with_deferred_write(mut self, defer: bool) -> Self {
        if self.kind == LoaderKind::Stream {
            self.driver = Driver::builtin(self.kind, defer);
        }
        self
    }

    pub fn kind(&self) -> LoaderKind {
        self.kind
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Replace the strategy; it must produce this kind's calling convention
    pub fn set_driver(&mut self, driver: Driver) -> LoaderResult<()> {
        if driver.kind() != self.kind {
            return Err(LoaderError::KindMismatch {
                expected: self.kind,
                actual: driver.kind(),
            });
        }
        self.driver = driver;
        Ok(())
    }

    /// Resolve references against this kind's registry
    pub fn resolve(&self, refs: &StepRef) -> LoaderResult<Vec<ResolvedStep>> {
        Resolver::new(&self.registry).resolve(refs)
    }

    /// Resolve the stack registered under `name`; unregistered names resolve
    /// to an empty stack
    pub fn resolve_name(&self, name: &str) -> LoaderResult<Vec<ResolvedStep>> {
        if !self.registry.contains(name) {
            return Ok(Vec::new());
        }
        self.resolve(&StepRef::from(name))
    }

    /// Bind a resolved stack to this kind's strategy
    pub fn iterate(&self, stack: Arc<[ResolvedStep]>, ctx: LoadContext) -> Composed {
        self.driver.iterate(stack, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterators::{PromiseIterator, SyncIterator};
    use crate::stack::models::Loader;
    use crate::steps;

    #[test]
    fn test_resolve_name() {
        let mut loaders = LoaderType::new(LoaderKind::Promise);
        loaders
            .registry_mut()
            .set("read", Loader::sync(|_, v| Ok(v)))
            .unwrap();
        loaders
            .registry_mut()
            .set("bar", steps!["read", "yaml"])
            .unwrap();

        let stack = loaders.resolve_name("bar").unwrap();
        assert_eq!(stack.len(), 2);
        assert!(stack[0].loader().is_some());
        assert!(matches!(&stack[1], ResolvedStep::Missing(n) if n == "yaml"));

        assert!(loaders.resolve_name("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_resolve_name_reports_cycles() {
        let mut loaders = LoaderType::new(LoaderKind::Sync);
        loaders.registry_mut().set("a", steps!["b"]).unwrap();
        loaders.registry_mut().set("b", steps!["a"]).unwrap();

        let err = loaders.resolve_name("a").unwrap_err();
        assert!(matches!(err, LoaderError::Cycle(ref path) if path == &["a", "b", "a"]));
    }

    #[test]
    fn test_driver_must_match_kind() {
        let mut loaders = LoaderType::new(LoaderKind::Sync);
        assert_eq!(loaders.driver().kind(), LoaderKind::Sync);

        let err = loaders.set_driver(Driver::promise(PromiseIterator)).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::KindMismatch {
                expected: LoaderKind::Sync,
                actual: LoaderKind::Promise
            }
        ));
        assert!(loaders.set_driver(Driver::sync(SyncIterator)).is_ok());
    }
}
