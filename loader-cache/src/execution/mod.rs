// Execution Module
// Call arguments, per-call context, and progress events shared by every strategy

pub mod args;
pub mod context;
pub mod events;

// Re-export key types
pub use args::{split_call_args, Arg, Done, SplitArgs};
pub use context::{LoadContext, LoadOptions, Matcher, Wrap};
pub use events::{progress_channel, EventSender, LoadEvent, ProgressReceiver, ProgressSender};
