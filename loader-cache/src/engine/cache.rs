// Loader Cache
// Registers named loader stacks per kind and composes them into callables

use crate::engine::config::EngineConfig;
use crate::engine::types::LoaderType;
use crate::error::{LoaderError, LoaderResult};
use crate::execution::args::Arg;
use crate::execution::context::{LoadContext, LoadOptions};
use crate::execution::events::{EventSender, LoadEvent, ProgressSender};
use crate::iterators::{AsyncLoad, Composed, Driver, PromiseLoad, StreamLoad, SyncLoad};
use crate::stack::models::{LoaderKind, PromiseFuture, ResolvedStep, StepRef, ValueStream};
use crate::stack::registry::validate_name;
use crate::utils::match_extension;

use futures::future::{self, FutureExt};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Engine holding named loader stacks, one registry per enabled kind.
///
/// `LoaderCache` is a cheap handle over shared state; clones see the same
/// registries and options. Loaders receive it through
/// [`LoadContext::app`] and may compose other stacks while running.
///
/// Registration is meant to finish before composed stacks run concurrently;
/// a stack composed earlier never sees later registrations.
#[derive(Clone)]
pub struct LoaderCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    options: RwLock<Map<String, Value>>,
    types: RwLock<HashMap<LoaderKind, LoaderType>>,
    events: RwLock<Option<ProgressSender>>,
}

impl LoaderCache {
    /// Create an engine with every kind enabled and `sync` as the default
    pub fn new() -> Self {
        Self::from_config(EngineConfig::default())
    }

    /// Create an engine from a validated configuration
    pub fn with_config(config: EngineConfig) -> LoaderResult<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: EngineConfig) -> Self {
        let types = config
            .kinds
            .iter()
            .map(|&kind| {
                let loader_type =
                    LoaderType::new(kind).with_deferred_write(config.defer_stream_write);
                (kind, loader_type)
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                config,
                options: RwLock::new(Map::new()),
                types: RwLock::new(types),
                events: RwLock::new(None),
            }),
        }
    }

    /// Report registration, composition, and execution progress on `tx`
    pub fn with_progress(self, tx: ProgressSender) -> Self {
        *self.inner.events.write() = Some(tx);
        self
    }

    pub(crate) fn progress(&self) -> Option<ProgressSender> {
        self.inner.events.read().clone()
    }

    fn emit(&self, event: LoadEvent) {
        self.inner.events.read().send_event(event);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn default_kind(&self) -> LoaderKind {
        self.inner.config.default_kind
    }

    /// Enabled kinds, in configuration order
    pub fn kinds(&self) -> Vec<LoaderKind> {
        self.inner.config.kinds.clone()
    }

    fn kind_for(&self, options: &LoadOptions) -> LoaderResult<LoaderKind> {
        let kind = options.kind.unwrap_or_else(|| self.default_kind());
        if !self.inner.config.enables(kind) {
            return Err(disabled(kind));
        }
        Ok(kind)
    }

    // Options

    pub fn option(&self, key: &str) -> Option<Value> {
        self.inner.options.read().get(key).cloned()
    }

    pub fn set_option(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        self.inner.options.write().insert(key.clone(), value.into());
        self.emit(LoadEvent::OptionSet { key });
    }

    pub fn set_options(&self, options: Map<String, Value>) {
        for (key, value) in options {
            self.set_option(key, value);
        }
    }

    // Registration

    /// Append steps to `name` in the default kind's registry
    pub fn register(&self, name: &str, refs: impl Into<StepRef>) -> LoaderResult<()> {
        self.register_kind(self.default_kind(), name, refs)
    }

    /// Append steps to `name` in the registry of `kind`.
    ///
    /// Steps already present under `name` are skipped; names inside `refs`
    /// are stored unresolved and looked up when a stack is composed.
    pub fn register_kind(
        &self,
        kind: LoaderKind,
        name: &str,
        refs: impl Into<StepRef>,
    ) -> LoaderResult<()> {
        let total_steps = {
            let mut types = self.inner.types.write();
            let loader_type = types.get_mut(&kind).ok_or_else(|| disabled(kind))?;
            loader_type.registry_mut().set(name, refs)?
        };

        tracing::debug!(kind = %kind, name, total_steps, "registered loader stack");
        self.emit(LoadEvent::LoaderRegistered {
            kind,
            name: name.to_string(),
            total_steps,
        });
        Ok(())
    }

    /// Raw (unresolved) stack registered under `name`
    pub fn get(&self, kind: LoaderKind, name: &str) -> Option<Vec<StepRef>> {
        let types = self.inner.types.read();
        types.get(&kind)?.registry().get(name).map(<[StepRef]>::to_vec)
    }

    pub fn has(&self, kind: LoaderKind, name: &str) -> bool {
        let types = self.inner.types.read();
        types
            .get(&kind)
            .is_some_and(|loader_type| loader_type.registry().contains(name))
    }

    /// Registered names for `kind`, sorted
    pub fn names(&self, kind: LoaderKind) -> Vec<String> {
        let types = self.inner.types.read();
        types
            .get(&kind)
            .map(|loader_type| loader_type.registry().names())
            .unwrap_or_default()
    }

    // Strategies

    /// Replace the strategy driving `driver.kind()`.
    ///
    /// Stacks composed earlier keep the strategy they were bound to.
    pub fn set_iterator(&self, driver: Driver) -> LoaderResult<()> {
        let kind = driver.kind();
        {
            let mut types = self.inner.types.write();
            let loader_type = types.get_mut(&kind).ok_or_else(|| disabled(kind))?;
            loader_type.set_driver(driver)?;
        }
        tracing::debug!(kind = %kind, "replaced loader strategy");
        Ok(())
    }

    /// Strategy currently driving `kind`
    pub fn iterator(&self, kind: LoaderKind) -> LoaderResult<Driver> {
        let types = self.inner.types.read();
        types
            .get(&kind)
            .map(|loader_type| loader_type.driver().clone())
            .ok_or_else(|| disabled(kind))
    }

    // Resolution

    /// Flatten references against the default kind's registry
    pub fn resolve(&self, refs: impl Into<StepRef>) -> LoaderResult<Vec<ResolvedStep>> {
        self.resolve_kind(self.default_kind(), refs)
    }

    /// Flatten references against the registry of `kind`
    pub fn resolve_kind(
        &self,
        kind: LoaderKind,
        refs: impl Into<StepRef>,
    ) -> LoaderResult<Vec<ResolvedStep>> {
        let types = self.inner.types.read();
        let loader_type = types.get(&kind).ok_or_else(|| disabled(kind))?;
        loader_type.resolve(&refs.into())
    }

    // Composition

    /// Compose the stack registered under `name` with the default options
    pub fn compose(&self, name: &str) -> LoaderResult<Composed> {
        self.compose_with(name, LoadOptions::new(), no_steps())
    }

    /// Compose `name` followed by `extra` with the default options
    pub fn compose_extra(&self, name: &str, extra: impl Into<StepRef>) -> LoaderResult<Composed> {
        self.compose_with(name, LoadOptions::new(), extra)
    }

    /// Compose `name` followed by `extra` under `options`.
    ///
    /// The stack is resolved once, here. An unregistered `name` composes an
    /// empty stack, which returns its input unchanged.
    pub fn compose_with(
        &self,
        name: &str,
        options: LoadOptions,
        extra: impl Into<StepRef>,
    ) -> LoaderResult<Composed> {
        validate_name(name)?;
        let kind = self.kind_for(&options)?;
        let extra = extra.into();

        let types = self.inner.types.read();
        let loader_type = types.get(&kind).ok_or_else(|| disabled(kind))?;
        let mut stack = loader_type.resolve_name(name)?;
        stack.extend(loader_type.resolve(&extra)?);

        Ok(self.bind(loader_type, Some(name), options, stack))
    }

    pub fn compose_sync(&self, name: &str) -> LoaderResult<SyncLoad> {
        self.compose_kind(name, LoaderKind::Sync)?.into_sync()
    }

    pub fn compose_async(&self, name: &str) -> LoaderResult<AsyncLoad> {
        self.compose_kind(name, LoaderKind::Async)?.into_async()
    }

    pub fn compose_promise(&self, name: &str) -> LoaderResult<PromiseLoad> {
        self.compose_kind(name, LoaderKind::Promise)?.into_promise()
    }

    pub fn compose_stream(&self, name: &str) -> LoaderResult<StreamLoad> {
        self.compose_kind(name, LoaderKind::Stream)?.into_stream()
    }

    fn compose_kind(&self, name: &str, kind: LoaderKind) -> LoaderResult<Composed> {
        self.compose_with(name, LoadOptions::new().with_kind(kind), no_steps())
    }

    /// Compose an anonymous stack from references
    pub fn seq(&self, kind: LoaderKind, refs: impl Into<StepRef>) -> LoaderResult<Composed> {
        self.anonymous(LoadOptions::new().with_kind(kind), refs.into())
    }

    fn anonymous(&self, options: LoadOptions, refs: StepRef) -> LoaderResult<Composed> {
        let kind = self.kind_for(&options)?;
        let types = self.inner.types.read();
        let loader_type = types.get(&kind).ok_or_else(|| disabled(kind))?;
        let stack = loader_type.resolve(&refs)?;
        Ok(self.bind(loader_type, None, options, stack))
    }

    fn bind(
        &self,
        loader_type: &LoaderType,
        name: Option<&str>,
        options: LoadOptions,
        stack: Vec<ResolvedStep>,
    ) -> Composed {
        let kind = loader_type.kind();
        let total_steps = stack.len();
        tracing::debug!(name = ?name, kind = %kind, total_steps, "composed loader stack");
        self.emit(LoadEvent::StackComposed {
            name: name.map(str::to_string),
            kind,
            total_steps,
        });

        let ctx = LoadContext::new(self.clone(), options, kind, name);
        loader_type.iterate(stack.into(), ctx)
    }

    // Loading by name match

    /// Run the sync stack matched from the first data argument
    pub fn load(&self, args: Vec<Arg>) -> LoaderResult<Value> {
        self.load_with(LoadOptions::new(), args)
    }

    /// Run the sync stack matched from the first data argument under `options`
    pub fn load_with(&self, options: LoadOptions, args: Vec<Arg>) -> LoaderResult<Value> {
        self.matched(LoaderKind::Sync, options, &args)?
            .into_sync()?
            .call(args)
    }

    /// Start the async stack matched from the first data argument; the final
    /// argument must be the completion callback
    pub fn load_async(&self, args: Vec<Arg>) -> LoaderResult<()> {
        self.matched(LoaderKind::Async, LoadOptions::new(), &args)?
            .into_async()?
            .call(args)
    }

    pub fn load_promise(&self, args: Vec<Arg>) -> PromiseFuture {
        let composed = self
            .matched(LoaderKind::Promise, LoadOptions::new(), &args)
            .and_then(Composed::into_promise);
        match composed {
            Ok(load) => load.call(args),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    pub fn load_stream(&self, args: Vec<Arg>) -> ValueStream {
        let composed = self
            .matched(LoaderKind::Stream, LoadOptions::new(), &args)
            .and_then(Composed::into_stream);
        match composed {
            Ok(load) => load.call(args),
            Err(err) => stream::once(future::ready(Err(err))).boxed(),
        }
    }

    /// Compose the stack named by the matcher, or an anonymous empty stack
    /// when nothing matches
    fn matched(&self, kind: LoaderKind, options: LoadOptions, args: &[Arg]) -> LoaderResult<Composed> {
        let data: Vec<Value> = args
            .iter()
            .map_while(|arg| match arg {
                Arg::Data(value) => Some(value.clone()),
                _ => None,
            })
            .collect();

        let name = match &options.match_loader {
            Some(matcher) => matcher(&data),
            None => match_extension(&data),
        };
        let options = options.with_kind(kind);

        match name {
            Some(name) => {
                tracing::trace!(name = %name, kind = %kind, "matched loader stack");
                self.compose_with(&name, options, no_steps())
            }
            None => self.anonymous(options, no_steps()),
        }
    }
}

impl Default for LoaderCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoaderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderCache")
            .field("config", &self.inner.config)
            .field("options", &*self.inner.options.read())
            .finish_non_exhaustive()
    }
}

fn no_steps() -> StepRef {
    StepRef::List(Vec::new())
}

fn disabled(kind: LoaderKind) -> LoaderError {
    LoaderError::InvalidKind(kind.to_string())
}
