use thiserror::Error;
use tracing::{error, warn};

use crate::channel::ChannelError;

/// How loudly an error should be surfaced to the person at the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Domain errors surfaced by the controller API
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Input channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Failed to parse protocol message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Input too long: {len} bytes (limit {capacity})")]
    InputTooLong { len: usize, capacity: usize },

    #[error("No input request is pending")]
    NoPendingInput,

    #[error("Host is not ready (state: {0})")]
    NotReady(String),

    #[error("Operation not permitted: {0}")]
    NotPermitted(String),

    #[error("Host spawn failed: {0}")]
    Spawn(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Channel(ChannelError::Abandoned) => ErrorSeverity::Info,
            Self::Channel(_) => ErrorSeverity::Error,
            Self::Protocol(_) => ErrorSeverity::Warning,
            Self::InputTooLong { .. } => ErrorSeverity::Warning,
            Self::NoPendingInput => ErrorSeverity::Info,
            Self::NotReady(_) => ErrorSeverity::Warning,
            Self::NotPermitted(_) => ErrorSeverity::Warning,
            Self::Spawn(_) => ErrorSeverity::Critical,
            Self::Config(_) => ErrorSeverity::Warning,
            Self::Io { .. } => ErrorSeverity::Error,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Channel(e) => e.to_string(),
            Self::Protocol(e) => format!("Invalid message format: {}", e),
            Self::InputTooLong { .. } => "Error: Input too long!".to_string(),
            Self::NoPendingInput => "The program is not waiting for input".to_string(),
            Self::NotReady(state) => format!("The runtime is not ready yet ({})", state),
            Self::NotPermitted(what) => format!("Not allowed: {}", what),
            Self::Spawn(msg) => format!("Could not start the runtime host: {}", msg),
            Self::Config(msg) => format!("Configuration issue: {}", msg),
            Self::Io { path, .. } => format!("Could not access {}", path),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Silent error logging with caller location.
/// Use when the operation is recoverable and nobody needs to be told.
///
/// ```ignore
/// use exec_bridge::error::ResultExt;
///
/// registry.save().log_err();
/// workspace.mount().warn_on_err();
/// ```
pub trait ResultExt<T> {
    /// Log error with caller location and return None
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_too_long_message_matches_console_text() {
        let err = BridgeError::InputTooLong {
            len: 2000,
            capacity: 1016,
        };
        assert_eq!(err.user_message(), "Error: Input too long!");
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert!(err.to_string().contains("2000"));
    }

    #[test]
    fn test_abandoned_channel_is_informational() {
        let err = BridgeError::from(ChannelError::Abandoned);
        assert_eq!(err.severity(), ErrorSeverity::Info);
    }

    #[test]
    fn test_result_ext_returns_option() {
        let ok: std::result::Result<u8, String> = Ok(3);
        assert_eq!(ok.log_err(), Some(3));
        let err: std::result::Result<u8, String> = Err("boom".into());
        assert_eq!(err.warn_on_err(), None);
    }
}
