// Call Arguments
// Splits the arguments of a composed call into data, extra loaders, and a callback

use crate::error::{LoaderError, LoaderResult};
use crate::stack::models::{Loader, LoaderKind, Next, StepRef};

use serde_json::Value;
use std::fmt;

/// Completion callback of an async pipeline
pub type Done = Next;

/// One argument of a composed call
pub enum Arg {
    /// Payload handed to the first step
    Data(Value),
    /// Extra loader appended after the composed stack
    Step(StepRef),
    /// Completion callback (async pipelines only)
    Done(Done),
}

impl Arg {
    /// Wrap a completion callback
    pub fn done<F>(f: F) -> Self
    where
        F: FnOnce(LoaderResult<Value>) + Send + 'static,
    {
        Arg::Done(Box::new(f))
    }

    /// True for loaders, stacks, and callbacks; false for plain data
    pub fn is_loader_like(&self) -> bool {
        crate::utils::is_loader_like(self)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Arg::Step(step) => f.debug_tuple("Step").field(step).finish(),
            Arg::Done(_) => f.write_str("Done(..)"),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Data(value)
    }
}

/// Strings are data, never stack names
impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Data(Value::String(value.to_string()))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Data(Value::String(value))
    }
}

impl From<StepRef> for Arg {
    fn from(step: StepRef) -> Self {
        Arg::Step(step)
    }
}

impl From<Loader> for Arg {
    fn from(loader: Loader) -> Self {
        Arg::Step(StepRef::Loader(loader))
    }
}

/// Build a `Vec<Arg>` from mixed data values and loaders
#[macro_export]
macro_rules! args {
    ($($item:expr),* $(,)?) => {
        vec![$($crate::Arg::from($item)),*]
    };
}

/// Arguments of a composed call after splitting
#[derive(Default)]
pub struct SplitArgs {
    /// Data arguments, handed to the first step
    pub data: Vec<Value>,
    /// Trailing loaders, in call order
    pub extra: Vec<StepRef>,
    /// Completion callback (async only)
    pub done: Option<Done>,
}

impl SplitArgs {
    /// Extra loaders as a single list reference
    pub fn extra_ref(&self) -> StepRef {
        StepRef::List(self.extra.clone())
    }
}

impl fmt::Debug for SplitArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitArgs")
            .field("data", &self.data)
            .field("extra", &self.extra)
            .field("done", &self.done.is_some())
            .finish()
    }
}

/// Split call arguments for an execution kind.
///
/// Trailing loader-like arguments are peeled off the end until a data
/// argument is reached; the first argument always stays data. For async
/// pipelines the final argument must be the completion callback and is taken
/// out before the scan. Data arguments must be plain values.
pub fn split_call_args(args: Vec<Arg>, kind: LoaderKind) -> LoaderResult<SplitArgs> {
    let mut args = args;
    let mut split = SplitArgs::default();

    if kind == LoaderKind::Async {
        match args.pop() {
            Some(Arg::Done(done)) => split.done = Some(done),
            _ => return Err(LoaderError::MissingCallback),
        }
    }

    while args.len() > 1 && args.last().is_some_and(Arg::is_loader_like) {
        match args.pop() {
            Some(Arg::Step(step)) => split.extra.push(step),
            Some(Arg::Done(_)) => return Err(misplaced_callback(kind)),
            _ => break,
        }
    }
    split.extra.reverse();

    for arg in args {
        match arg {
            Arg::Data(value) => split.data.push(value),
            Arg::Step(_) => {
                return Err(LoaderError::InvalidArguments(
                    "loader arguments must follow the data arguments".to_string(),
                ))
            }
            Arg::Done(_) => return Err(misplaced_callback(kind)),
        }
    }

    Ok(split)
}

fn misplaced_callback(kind: LoaderKind) -> LoaderError {
    if kind == LoaderKind::Async {
        LoaderError::InvalidArguments("the completion callback must be the last argument".into())
    } else {
        LoaderError::InvalidArguments(format!(
            "completion callbacks are only accepted by async pipelines, not {}",
            kind
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps;

    use serde_json::json;

    fn noop() -> Loader {
        Loader::sync(|_, v| Ok(v))
    }

    #[test]
    fn test_single_argument_is_data() {
        let split = split_call_args(args!["fixtures/a.bar"], LoaderKind::Sync).unwrap();
        assert_eq!(split.data, vec![json!("fixtures/a.bar")]);
        assert!(split.extra.is_empty());
        assert!(split.done.is_none());
    }

    #[test]
    fn test_trailing_loaders_become_extra_steps() {
        let split = split_call_args(
            args!["fixtures/a.bar", noop().named("first"), steps!["data"]],
            LoaderKind::Sync,
        )
        .unwrap();

        assert_eq!(split.data.len(), 1);
        assert_eq!(split.extra.len(), 2);
        assert!(matches!(&split.extra[0], StepRef::Loader(l) if l.label() == Some("first")));
        assert!(matches!(&split.extra[1], StepRef::List(_)));
    }

    #[test]
    fn test_multiple_data_arguments() {
        let split = split_call_args(args!["a", json!(2), noop()], LoaderKind::Promise).unwrap();
        assert_eq!(split.data, vec![json!("a"), json!(2)]);
        assert_eq!(split.extra.len(), 1);
    }

    #[test]
    fn test_first_argument_never_a_loader() {
        let err = split_call_args(args![noop()], LoaderKind::Sync).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidArguments(_)));
    }

    #[test]
    fn test_loader_between_data_rejected() {
        let err = split_call_args(args!["a", noop(), "b"], LoaderKind::Sync).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidArguments(_)));
    }

    #[test]
    fn test_async_takes_final_callback() {
        let mut args = args!["fixtures/a.bar", noop()];
        args.push(Arg::done(|_| {}));

        let split = split_call_args(args, LoaderKind::Async).unwrap();
        assert_eq!(split.data, vec![json!("fixtures/a.bar")]);
        assert_eq!(split.extra.len(), 1);
        assert!(split.done.is_some());
    }

    #[test]
    fn test_async_callback_alone() {
        let split = split_call_args(vec![Arg::done(|_| {})], LoaderKind::Async).unwrap();
        assert!(split.data.is_empty());
        assert!(split.done.is_some());
    }

    #[test]
    fn test_async_requires_callback() {
        let err = split_call_args(args!["fixtures/a.bar"], LoaderKind::Async).unwrap_err();
        assert!(matches!(err, LoaderError::MissingCallback));

        let err = split_call_args(Vec::new(), LoaderKind::Async).unwrap_err();
        assert!(matches!(err, LoaderError::MissingCallback));
    }

    #[test]
    fn test_callback_rejected_outside_async() {
        let args = vec![Arg::from("x"), Arg::done(|_| {})];
        let err = split_call_args(args, LoaderKind::Sync).unwrap_err();
        assert!(err.to_string().contains("only accepted by async"));
    }

    #[test]
    fn test_empty_arguments() {
        let split = split_call_args(Vec::new(), LoaderKind::Stream).unwrap();
        assert!(split.data.is_empty());
        assert!(split.extra.is_empty());
    }
}
