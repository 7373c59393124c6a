//! Configuration module - runtime limits, locations and optional services
//!
//! # Module Structure
//!
//! - `defaults` - All default constant values
//! - `types` - Configuration struct definitions (Config, InterpreterConfig, etc.)
//! - `loader` - File system loading and parsing

mod defaults;
mod loader;
mod types;

pub use defaults::{DEFAULT_CHANNEL_BYTES, DEFAULT_REPEAT_THRESHOLD, DEFAULT_SESSION_TIMEOUT_SECS};

pub use types::{expand_path, AiResolverConfig, Config, InterpreterConfig};

pub use loader::load_config;

#[cfg(test)]
pub use defaults::{
    DEFAULT_AI_MAX_RETRIES, DEFAULT_AI_TIMEOUT_SECS, DEFAULT_REMEDIATION_LOG_TAIL,
    DEFAULT_SCAN_MAX_FILE_BYTES,
};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
