//! Configuration type definitions

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::defaults::*;

/// Expand `~` and environment variables in a configured path
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

// ============================================
// INTERPRETER
// ============================================

/// How the runtime process is launched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterConfig {
    #[serde(default = "default_interpreter_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_interpreter_program() -> String {
    DEFAULT_INTERPRETER_PROGRAM.to_string()
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            program: default_interpreter_program(),
            args: Vec::new(),
        }
    }
}

// ============================================
// AI RESOLVER
// ============================================

/// Remote service that answers input prompts in elevated mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiResolverConfig {
    pub endpoint: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Per-request timeout (default: 15)
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts after the first failure (default: 2)
    #[serde(default = "default_ai_max_retries")]
    pub max_retries: u32,
}

fn default_ai_model() -> String {
    DEFAULT_AI_MODEL.to_string()
}
fn default_ai_timeout_secs() -> u64 {
    DEFAULT_AI_TIMEOUT_SECS
}
fn default_ai_max_retries() -> u32 {
    DEFAULT_AI_MAX_RETRIES
}

// ============================================
// MAIN CONFIG
// ============================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_bytes: Option<usize>,
    /// Set to false to run everything on the controller thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_memory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,
    /// Identical consecutive lines tolerated before an emergency stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_max_file_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_log_tail: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<InterpreterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_resolver: Option<AiResolverConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages_file: Option<String>,
}

impl Config {
    pub fn get_channel_bytes(&self) -> usize {
        self.channel_bytes.unwrap_or(DEFAULT_CHANNEL_BYTES)
    }

    pub fn get_shared_memory(&self) -> bool {
        self.shared_memory.unwrap_or(DEFAULT_SHARED_MEMORY)
    }

    pub fn get_elevated(&self) -> bool {
        self.elevated.unwrap_or(DEFAULT_ELEVATED)
    }

    pub fn get_offline(&self) -> bool {
        self.offline.unwrap_or(DEFAULT_OFFLINE)
    }

    pub fn get_repeat_threshold(&self) -> usize {
        self.repeat_threshold.unwrap_or(DEFAULT_REPEAT_THRESHOLD)
    }

    pub fn get_session_timeout_secs(&self) -> u64 {
        self.session_timeout_secs
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS)
    }

    pub fn get_scan_max_file_bytes(&self) -> u64 {
        self.scan_max_file_bytes
            .unwrap_or(DEFAULT_SCAN_MAX_FILE_BYTES)
    }

    pub fn get_remediation_log_tail(&self) -> usize {
        self.remediation_log_tail
            .unwrap_or(DEFAULT_REMEDIATION_LOG_TAIL)
    }

    pub fn get_work_dir(&self) -> PathBuf {
        expand_path(self.work_dir.as_deref().unwrap_or(DEFAULT_WORK_DIR))
    }

    pub fn get_persistent_dir(&self) -> PathBuf {
        expand_path(
            self.persistent_dir
                .as_deref()
                .unwrap_or(DEFAULT_PERSISTENT_DIR),
        )
    }

    pub fn get_packages_file(&self) -> PathBuf {
        expand_path(
            self.packages_file
                .as_deref()
                .unwrap_or(DEFAULT_PACKAGES_FILE),
        )
    }

    pub fn get_interpreter(&self) -> InterpreterConfig {
        self.interpreter.clone().unwrap_or_default()
    }

    /// The AI resolver only exists when an endpoint is configured
    pub fn get_ai_resolver(&self) -> Option<AiResolverConfig> {
        self.ai_resolver
            .clone()
            .filter(|ai| !ai.endpoint.trim().is_empty())
    }
}
