//! Default configuration values
//!
//! All constants used throughout the config module are defined here.

/// Total size of the shared input channel in bytes (8 byte header + payload)
pub const DEFAULT_CHANNEL_BYTES: usize = 1024;

/// Worker mode with a shared channel; false forces the inline fallback host
pub const DEFAULT_SHARED_MEMORY: bool = true;

/// Elevated mode unlocks the safety monitor, AI input and package installs
pub const DEFAULT_ELEVATED: bool = false;
pub const DEFAULT_OFFLINE: bool = false;

/// Safety monitor limits
pub const DEFAULT_REPEAT_THRESHOLD: usize = 50;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;

/// Files above this size are left out of working directory scans
pub const DEFAULT_SCAN_MAX_FILE_BYTES: u64 = 1_000_000;

/// Number of recent log lines handed to remediation after an emergency stop
pub const DEFAULT_REMEDIATION_LOG_TAIL: usize = 40;

/// Runtime executable and arguments
pub const DEFAULT_INTERPRETER_PROGRAM: &str = "python3";

/// AI input resolver
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_AI_MAX_RETRIES: u32 = 2;
pub const DEFAULT_AI_MODEL: &str = "default";

/// Locations under the home directory
pub const DEFAULT_CONFIG_PATH: &str = "~/.exec-bridge/config.json";
pub const DEFAULT_WORK_DIR: &str = "~/.exec-bridge/workspace";
pub const DEFAULT_PERSISTENT_DIR: &str = "~/.exec-bridge/persistent";
pub const DEFAULT_PACKAGES_FILE: &str = "~/.exec-bridge/packages.json";
