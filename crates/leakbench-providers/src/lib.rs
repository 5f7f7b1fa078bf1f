//! leakbench-providers: model backends for the leakbench run engine.
//!
//! Implements the `ModelBackend` trait for a local Ollama server and an
//! offline mock, plus the TOML configuration that selects between them.

pub mod config;
pub mod mock;
pub mod ollama;

pub use config::{create_backend, load_config, load_config_from, BackendConfig, LeakbenchConfig};
pub use leakbench_core::error::ProviderError;
