// Utility Functions
// Argument predicates and the default stack-name matcher

use crate::execution::args::Arg;
use crate::stack::models::{LoaderKind, StepRef};

use serde_json::Value;

/// Return true if a call argument is loader-like.
///
/// Loaders (of any kind), stack names or lists passed as steps, and completion
/// callbacks are loader-like; plain data, including `null`, never is.
pub fn is_loader_like(arg: &Arg) -> bool {
    match arg {
        Arg::Data(_) => false,
        Arg::Step(_) | Arg::Done(_) => true,
    }
}

/// Return true if the reference is a stream loader
pub fn is_stream(step: &StepRef) -> bool {
    matches!(step, StepRef::Loader(loader) if loader.kind() == LoaderKind::Stream)
}

/// Return true if the reference is a future-returning loader
pub fn is_promise(step: &StepRef) -> bool {
    matches!(step, StepRef::Loader(loader) if loader.kind() == LoaderKind::Promise)
}

/// Default stack-name matcher for `load*` calls.
///
/// Uses the first data argument when it is a string: the name is everything
/// after the last `.`, or the whole string when it has no dot.
///
/// # Examples
/// `"fixtures/a.bar"` matches `"bar"`, `"json"` matches `"json"`.
pub fn match_extension(data: &[Value]) -> Option<String> {
    let path = data.first()?.as_str()?;
    let name = match path.rfind('.') {
        Some(index) => &path[index + 1..],
        None => path,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
