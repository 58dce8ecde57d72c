// Loader Errors
// Error type shared by registration, resolution, and every execution kind

use crate::stack::models::LoaderKind;

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result alias used throughout the crate
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors raised while registering, resolving, or running loader stacks.
///
/// Errors are `Clone` so the same value can travel through continuations and
/// stream items; foreign error sources are kept behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    #[error("Invalid loader name: {0:?}")]
    InvalidName(String),

    #[error("Invalid loader type: {0}")]
    InvalidKind(String),

    #[error("Expected a {expected} pipeline, found {actual}")]
    KindMismatch {
        expected: LoaderKind,
        actual: LoaderKind,
    },

    #[error("Loader `{0}` is not callable")]
    NotCallable(String),

    #[error("Loader `{label}` cannot run in a {kind} stack")]
    Incompatible { kind: LoaderKind, label: String },

    #[error("Loader cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Async pipelines require a trailing completion callback")]
    MissingCallback,

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Loader `{label}` failed: {message}")]
    Step { label: String, message: String },

    #[error("{0}")]
    Message(String),

    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    #[error("YAML error: {0}")]
    Yaml(Arc<serde_yaml::Error>),

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("Completion callback was dropped before it was called")]
    Canceled,
}

impl LoaderError {
    /// Error raised by a named loader
    pub fn step(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            label: label.into(),
            message: message.into(),
        }
    }

    /// Free-form error message
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<io::Error> for LoaderError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_yaml::Error> for LoaderError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(Arc::new(err))
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}
