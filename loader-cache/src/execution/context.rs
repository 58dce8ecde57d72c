// Load Context
// Per-invocation options and the context handed to every loader

use crate::engine::cache::LoaderCache;
use crate::execution::events::{EventSender, LoadEvent, ProgressSender};
use crate::stack::models::{Loader, LoaderKind, StepRef};

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Transformation applied to every resolved loader before execution
pub type Wrap = Arc<dyn Fn(Loader) -> Loader + Send + Sync>;

/// Maps the data arguments of a `load*` call to a stack name
pub type Matcher = Arc<dyn Fn(&[Value]) -> Option<String> + Send + Sync>;

/// Options for a single compose call
#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Execution kind (falls back to the engine default)
    pub kind: Option<LoaderKind>,
    /// Stack used when the composed stack resolves to nothing
    pub default_loader: Option<StepRef>,
    /// Applied to every resolved loader
    pub wrap: Option<Wrap>,
    /// Stack-name matcher for `load*` calls
    pub match_loader: Option<Matcher>,
    /// Free-form values visible to loaders
    pub values: Map<String, Value>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: LoaderKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_default_loader(mut self, refs: impl Into<StepRef>) -> Self {
        self.default_loader = Some(refs.into());
        self
    }

    pub fn with_wrap<F>(mut self, wrap: F) -> Self
    where
        F: Fn(Loader) -> Loader + Send + Sync + 'static,
    {
        self.wrap = Some(Arc::new(wrap));
        self
    }

    pub fn with_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[Value]) -> Option<String> + Send + Sync + 'static,
    {
        self.match_loader = Some(Arc::new(matcher));
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("kind", &self.kind)
            .field("default_loader", &self.default_loader)
            .field("wrap", &self.wrap.is_some())
            .field("match_loader", &self.match_loader.is_some())
            .field("values", &self.values)
            .finish()
    }
}

/// Context handed to every loader of a composed stack.
///
/// Carries the owning engine, so a loader can compose or resolve other stacks,
/// along with the options and execution kind of the current composition.
#[derive(Clone)]
pub struct LoadContext {
    app: LoaderCache,
    options: Arc<LoadOptions>,
    kind: LoaderKind,
    name: Option<Arc<str>>,
    events: Option<ProgressSender>,
}

impl LoadContext {
    pub(crate) fn new(
        app: LoaderCache,
        options: LoadOptions,
        kind: LoaderKind,
        name: Option<&str>,
    ) -> Self {
        let events = app.progress();
        Self {
            app,
            options: Arc::new(options),
            kind,
            name: name.map(Arc::from),
            events,
        }
    }

    /// The engine that composed this stack
    pub fn app(&self) -> &LoaderCache {
        &self.app
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Per-call option value, falling back to the engine-level option
    pub fn option(&self, key: &str) -> Option<Value> {
        self.options
            .get(key)
            .cloned()
            .or_else(|| self.app.option(key))
    }

    pub fn kind(&self) -> LoaderKind {
        self.kind
    }

    /// Name of the composed stack (`None` for anonymous sequences)
    pub fn stack_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn owned_name(&self) -> Option<String> {
        self.name.as_deref().map(str::to_string)
    }

    pub(crate) fn emit(&self, event: LoadEvent) {
        self.events.send_event(event);
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}
