// Engine Configuration
// Which execution kinds an engine enables and how it drives them

use crate::error::{LoaderError, LoaderResult};
use crate::stack::models::LoaderKind;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration for a [`LoaderCache`](crate::LoaderCache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Kind used when a call does not name one
    pub default_kind: LoaderKind,

    /// Kinds with a registry; anything else is rejected
    pub kinds: Vec<LoaderKind>,

    /// Write the stream head from a spawned task instead of inline
    pub defer_stream_write: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_kind: LoaderKind::Sync,
            kinds: LoaderKind::ALL.to_vec(),
            defer_stream_write: true,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> LoaderResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> LoaderResult<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that at least one kind is enabled and the default is among them
    pub fn validate(&self) -> LoaderResult<()> {
        if self.kinds.is_empty() {
            return Err(LoaderError::InvalidKind(
                "no loader types enabled".to_string(),
            ));
        }
        if !self.enables(self.default_kind) {
            return Err(LoaderError::InvalidKind(format!(
                "default type `{}` is not enabled",
                self.default_kind
            )));
        }
        Ok(())
    }

    pub fn enables(&self, kind: LoaderKind) -> bool {
        self.kinds.contains(&kind)
    }
}
