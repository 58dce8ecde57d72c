// Loader Models
// Concrete loaders, step references, and resolved stack entries

use crate::error::{LoaderError, LoaderResult};
use crate::execution::context::LoadContext;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

/// Execution kind: selects both the registry namespace and the calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    /// Immediate, `(value, options) -> value`
    Sync,
    /// Continuation passing, `(value, options, next)`
    Async,
    /// Future returning, `(value, options) -> Future<value>`
    Promise,
    /// Record stream transform
    Stream,
}

impl LoaderKind {
    pub const ALL: [LoaderKind; 4] = [
        LoaderKind::Sync,
        LoaderKind::Async,
        LoaderKind::Promise,
        LoaderKind::Stream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderKind::Sync => "sync",
            LoaderKind::Async => "async",
            LoaderKind::Promise => "promise",
            LoaderKind::Stream => "stream",
        }
    }
}

impl fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoaderKind {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(LoaderKind::Sync),
            "async" => Ok(LoaderKind::Async),
            "promise" => Ok(LoaderKind::Promise),
            "stream" => Ok(LoaderKind::Stream),
            other => Err(LoaderError::InvalidKind(other.to_string())),
        }
    }
}

/// Stream of records flowing through a stream stack
pub type ValueStream = BoxStream<'static, LoaderResult<Value>>;

/// One-shot, error-first continuation handed to async loaders
pub type Next = Box<dyn FnOnce(LoaderResult<Value>) + Send>;

pub type SyncFn = dyn Fn(&LoadContext, Vec<Value>) -> LoaderResult<Value> + Send + Sync;
pub type AsyncFn = dyn Fn(LoadContext, Vec<Value>, Next) + Send + Sync;
pub type PromiseFuture = BoxFuture<'static, LoaderResult<Value>>;
pub type PromiseFn = dyn Fn(LoadContext, Vec<Value>) -> PromiseFuture + Send + Sync;
pub type StreamFn = dyn Fn(LoadContext, ValueStream) -> ValueStream + Send + Sync;

/// The function behind a loader, one variant per calling convention
#[derive(Clone)]
pub enum LoaderFn {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
    Promise(Arc<PromiseFn>),
    Stream(Arc<StreamFn>),
}

impl LoaderFn {
    pub fn kind(&self) -> LoaderKind {
        match self {
            LoaderFn::Sync(_) => LoaderKind::Sync,
            LoaderFn::Async(_) => LoaderKind::Async,
            LoaderFn::Promise(_) => LoaderKind::Promise,
            LoaderFn::Stream(_) => LoaderKind::Stream,
        }
    }

    fn addr(&self) -> *const () {
        match self {
            LoaderFn::Sync(f) => Arc::as_ptr(f) as *const (),
            LoaderFn::Async(f) => Arc::as_ptr(f) as *const (),
            LoaderFn::Promise(f) => Arc::as_ptr(f) as *const (),
            LoaderFn::Stream(f) => Arc::as_ptr(f) as *const (),
        }
    }
}

/// Async trait for loaders implemented as types rather than closures
#[async_trait::async_trait]
pub trait PromiseStep: Send + Sync {
    /// Run the step against its input arguments
    async fn load(&self, ctx: LoadContext, args: Vec<Value>) -> LoaderResult<Value>;
}

/// A concrete executable unit.
///
/// Cloning a loader keeps its identity: clones compare equal under
/// [`Loader::is_same`], which is what registration uses to drop duplicates.
#[derive(Clone)]
pub struct Loader {
    label: Option<Arc<str>>,
    func: LoaderFn,
}

impl Loader {
    fn from_fn(func: LoaderFn) -> Self {
        Self { label: None, func }
    }

    /// Sync loader receiving the first data argument
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&LoadContext, Value) -> LoaderResult<Value> + Send + Sync + 'static,
    {
        Self::sync_args(move |ctx, args| f(ctx, first_value(args)))
    }

    /// Sync loader receiving every data argument
    pub fn sync_args<F>(f: F) -> Self
    where
        F: Fn(&LoadContext, Vec<Value>) -> LoaderResult<Value> + Send + Sync + 'static,
    {
        Self::from_fn(LoaderFn::Sync(Arc::new(f)))
    }

    /// Continuation-passing loader receiving the first data argument
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(LoadContext, Value, Next) + Send + Sync + 'static,
    {
        Self::callback_args(move |ctx, args, next| f(ctx, first_value(args), next))
    }

    /// Continuation-passing loader receiving every data argument
    pub fn callback_args<F>(f: F) -> Self
    where
        F: Fn(LoadContext, Vec<Value>, Next) + Send + Sync + 'static,
    {
        Self::from_fn(LoaderFn::Async(Arc::new(f)))
    }

    /// Future-returning loader receiving the first data argument
    pub fn promise<F, Fut>(f: F) -> Self
    where
        F: Fn(LoadContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoaderResult<Value>> + Send + 'static,
    {
        Self::promise_args(move |ctx, args| f(ctx, first_value(args)))
    }

    /// Future-returning loader receiving every data argument
    pub fn promise_args<F, Fut>(f: F) -> Self
    where
        F: Fn(LoadContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoaderResult<Value>> + Send + 'static,
    {
        let func = move |ctx: LoadContext, args: Vec<Value>| -> PromiseFuture {
            f(ctx, args).boxed()
        };
        Self::from_fn(LoaderFn::Promise(Arc::new(func)))
    }

    /// Wrap a [`PromiseStep`] implementation
    pub fn from_step<S>(step: S) -> Self
    where
        S: PromiseStep + 'static,
    {
        let step = Arc::new(step);
        Self::promise_args(move |ctx, args| {
            let step = step.clone();
            async move { step.load(ctx, args).await }
        })
    }

    /// Stream transform loader
    pub fn stream<F>(f: F) -> Self
    where
        F: Fn(LoadContext, ValueStream) -> ValueStream + Send + Sync + 'static,
    {
        Self::from_fn(LoaderFn::Stream(Arc::new(f)))
    }

    /// Stream loader mapping every record; errors pass through untouched
    pub fn through<F>(f: F) -> Self
    where
        F: Fn(Value) -> LoaderResult<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::stream(move |_ctx, input| {
            let f = f.clone();
            input.map(move |item| item.and_then(|value| f(value))).boxed()
        })
    }

    /// Attach a label used in events, logs, and error messages
    pub fn named(mut self, label: impl AsRef<str>) -> Self {
        self.label = Some(Arc::from(label.as_ref()));
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Label, or a placeholder naming the loader kind
    pub fn display_label(&self) -> String {
        match &self.label {
            Some(label) => label.to_string(),
            None => format!("<anonymous {}>", self.kind()),
        }
    }

    pub fn kind(&self) -> LoaderKind {
        self.func.kind()
    }

    pub fn func(&self) -> &LoaderFn {
        &self.func
    }

    /// Identity comparison: true when both share the same function allocation
    pub fn is_same(&self, other: &Loader) -> bool {
        self.func.kind() == other.func.kind() && self.func.addr() == other.func.addr()
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loader({}:{})", self.kind(), self.display_label())
    }
}

/// Raw stack entry: a concrete loader, the name of another stack, or a nested list
#[derive(Debug, Clone)]
pub enum StepRef {
    Loader(Loader),
    Name(String),
    List(Vec<StepRef>),
}

impl StepRef {
    /// Identity comparison used for union-append: loaders by allocation,
    /// names by value, lists element-wise
    pub fn is_same(&self, other: &StepRef) -> bool {
        match (self, other) {
            (StepRef::Loader(a), StepRef::Loader(b)) => a.is_same(b),
            (StepRef::Name(a), StepRef::Name(b)) => a == b,
            (StepRef::List(a), StepRef::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_same(y))
            }
            _ => false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            StepRef::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Splice the top level of a list; any other reference becomes a single entry
    pub fn into_entries(self) -> Vec<StepRef> {
        match self {
            StepRef::List(items) => items,
            other => vec![other],
        }
    }

    pub fn is_empty_list(&self) -> bool {
        matches!(self, StepRef::List(items) if items.is_empty())
    }
}

impl From<Loader> for StepRef {
    fn from(loader: Loader) -> Self {
        StepRef::Loader(loader)
    }
}

impl From<&Loader> for StepRef {
    fn from(loader: &Loader) -> Self {
        StepRef::Loader(loader.clone())
    }
}

impl From<&str> for StepRef {
    fn from(name: &str) -> Self {
        StepRef::Name(name.to_string())
    }
}

impl From<String> for StepRef {
    fn from(name: String) -> Self {
        StepRef::Name(name)
    }
}

impl From<&String> for StepRef {
    fn from(name: &String) -> Self {
        StepRef::Name(name.clone())
    }
}

impl<T: Into<StepRef>> From<Vec<T>> for StepRef {
    fn from(items: Vec<T>) -> Self {
        StepRef::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<StepRef>, const N: usize> From<[T; N]> for StepRef {
    fn from(items: [T; N]) -> Self {
        StepRef::List(items.into_iter().map(Into::into).collect())
    }
}

/// Build a `StepRef::List` from mixed names, loaders, and nested lists
#[macro_export]
macro_rules! steps {
    ($($item:expr),* $(,)?) => {
        $crate::StepRef::List(vec![$($crate::StepRef::from($item)),*])
    };
}

/// Flat stack entry after resolution
#[derive(Debug, Clone)]
pub enum ResolvedStep {
    Loader(Loader),
    /// Unregistered name; fails with `NotCallable` when executed
    Missing(String),
}

impl ResolvedStep {
    pub fn loader(&self) -> Option<&Loader> {
        match self {
            ResolvedStep::Loader(loader) => Some(loader),
            ResolvedStep::Missing(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ResolvedStep::Loader(loader) => loader.display_label(),
            ResolvedStep::Missing(name) => name.clone(),
        }
    }

    pub fn is_same(&self, other: &ResolvedStep) -> bool {
        match (self, other) {
            (ResolvedStep::Loader(a), ResolvedStep::Loader(b)) => a.is_same(b),
            (ResolvedStep::Missing(a), ResolvedStep::Missing(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn not_callable(&self) -> LoaderError {
        LoaderError::NotCallable(self.label())
    }

    pub(crate) fn incompatible(&self, kind: LoaderKind) -> LoaderError {
        LoaderError::Incompatible {
            kind,
            label: self.label(),
        }
    }
}

/// First data argument, or `null` when none were given
pub(crate) fn first_value(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_kind_round_trip_from_str() {
        for kind in LoaderKind::ALL {
            assert_eq!(kind.as_str().parse::<LoaderKind>().unwrap(), kind);
        }

        let err = "parallel".parse::<LoaderKind>().unwrap_err();
        assert!(matches!(err, LoaderError::InvalidKind(ref s) if s == "parallel"));
    }

    #[test]
    fn test_kind_serde_lowercase() {
        let kind: LoaderKind = serde_yaml::from_str("promise").unwrap();
        assert_eq!(kind, LoaderKind::Promise);
        assert_eq!(serde_json::to_value(LoaderKind::Stream).unwrap(), json!("stream"));
    }

    #[test]
    fn test_loader_identity() {
        let a = Loader::sync(|_, v| Ok(v));
        let b = Loader::sync(|_, v| Ok(v));
        let relabeled = a.clone().named("identity");

        assert!(a.is_same(&a.clone()));
        assert!(a.is_same(&relabeled));
        assert!(!a.is_same(&b));
        assert_eq!(relabeled.label(), Some("identity"));
        assert_eq!(a.display_label(), "<anonymous sync>");
    }

    #[test]
    fn test_step_ref_identity() {
        let f = Loader::sync(|_, v| Ok(v));
        let list: StepRef = steps!["read", f.clone(), ["yaml"]];
        let same: StepRef = steps!["read", f.clone(), ["yaml"]];
        let other: StepRef = steps!["read", ["yaml"], f];

        assert!(list.is_same(&same));
        assert!(!list.is_same(&other));
        assert!(StepRef::from("a").is_same(&StepRef::from("a".to_string())));
    }

    #[test]
    fn test_into_entries_splices_one_level() {
        let nested: StepRef = steps!["a", steps!["b", ["c"]]];
        let entries = nested.into_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name(), Some("a"));
        assert!(matches!(&entries[1], StepRef::List(inner) if inner.len() == 2));

        let single = StepRef::from("solo").into_entries();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn test_loader_kinds() {
        assert_eq!(Loader::sync(|_, v| Ok(v)).kind(), LoaderKind::Sync);
        assert_eq!(
            Loader::callback(|_, v, next| next(Ok(v))).kind(),
            LoaderKind::Async
        );
        assert_eq!(
            Loader::promise(|_, v| async move { Ok(v) }).kind(),
            LoaderKind::Promise
        );
        assert_eq!(Loader::through(Ok).kind(), LoaderKind::Stream);
    }
}
