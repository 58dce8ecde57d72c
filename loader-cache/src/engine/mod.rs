// Engine Module
// The loader cache engine and its configuration

pub mod cache;
pub mod config;
pub mod types;

// Re-export key types
pub use cache::LoaderCache;
pub use config::EngineConfig;
pub use types::LoaderType;
