//! Message enums exchanged between the controller and a host

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::SharedChannel;

/// Content of the terminal OUTPUT message that ends every run
pub const PROCESS_FINISHED: &str = "Process finished.\n";

/// Leading text of the error OUTPUT a host sends when INIT fails
pub const INIT_FAILED_PREFIX: &str = "Error loading runtime";

/// Path → text content of working directory files
pub type FileMap = BTreeMap<String, String>;

/// Controller → host
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    /// Bind the input channel and bring the runtime up.
    ///
    /// The channel never goes over the wire; a host that receives INIT
    /// without one runs without blocking input.
    Init {
        #[serde(skip)]
        buffer: Option<SharedChannel>,
        #[serde(default)]
        offline: bool,
    },

    /// Execute source text in the persistent global namespace
    Run { content: String },

    /// Best-effort package fetch
    Install { content: String },

    /// Parse-only check, answered with LINT_RESULT
    Lint { content: String },

    /// Reinstall a list of recorded packages
    RestorePackages { content: Vec<String> },

    /// Write files into the working directory, answered with FILES_SYNCED
    SyncFiles { content: FileMap },

    /// Walk the working directory, answered with FILES_UPDATE
    ScanFiles,
}

impl HostMessage {
    /// Wire name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "INIT",
            Self::Run { .. } => "RUN",
            Self::Install { .. } => "INSTALL",
            Self::Lint { .. } => "LINT",
            Self::RestorePackages { .. } => "RESTORE_PACKAGES",
            Self::SyncFiles { .. } => "SYNC_FILES",
            Self::ScanFiles => "SCAN_FILES",
        }
    }
}

/// Structured syntax error, enough to highlight a source line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Exception class name, e.g. `SyntaxError` or `IndentationError`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    pub msg: String,
}

/// Host → controller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerMessage {
    /// INIT completed
    Loaded,

    /// A chunk of program or host output
    Output {
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        system: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        error: bool,
    },

    /// Syntax or indentation error raised by RUN
    Error { error: ErrorDetail },

    /// Answer to LINT; `content` is a JSON-encoded [`LintReport`]
    LintResult { content: String },

    /// The program is blocked waiting for a line of input
    InputRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    /// Snapshot of the working directory
    FilesUpdate { content: FileMap },

    /// SYNC_FILES completed
    FilesSynced,
}

impl ControllerMessage {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self::Output {
            content: content.into(),
            system: false,
            error: false,
        }
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self::Output {
            content: content.into(),
            system: false,
            error: true,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::Output {
            content: content.into(),
            system: true,
            error: false,
        }
    }

    pub fn system_error(content: impl Into<String>) -> Self {
        Self::Output {
            content: content.into(),
            system: true,
            error: true,
        }
    }

    pub fn process_finished() -> Self {
        Self::system(PROCESS_FINISHED)
    }

    /// True for the single terminal message of a run
    pub fn is_process_finished(&self) -> bool {
        matches!(
            self,
            Self::Output { content, system: true, .. } if content.trim() == PROCESS_FINISHED.trim()
        )
    }

    /// Wire name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Loaded => "LOADED",
            Self::Output { .. } => "OUTPUT",
            Self::Error { .. } => "ERROR",
            Self::LintResult { .. } => "LINT_RESULT",
            Self::InputRequest { .. } => "INPUT_REQUEST",
            Self::FilesUpdate { .. } => "FILES_UPDATE",
            Self::FilesSynced => "FILES_SYNCED",
        }
    }
}

/// Result of a parse-only check
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintReport {
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl LintReport {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":false}"#.to_string())
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_controller_message_wire_shapes() {
        let cases = [
            (ControllerMessage::Loaded, json!({"type": "LOADED"})),
            (
                ControllerMessage::stdout("hi\n"),
                json!({"type": "OUTPUT", "content": "hi\n"}),
            ),
            (
                ControllerMessage::process_finished(),
                json!({"type": "OUTPUT", "content": "Process finished.\n", "system": true}),
            ),
            (
                ControllerMessage::stderr("Traceback"),
                json!({"type": "OUTPUT", "content": "Traceback", "error": true}),
            ),
            (
                ControllerMessage::InputRequest {
                    content: Some("Name? ".into()),
                },
                json!({"type": "INPUT_REQUEST", "content": "Name? "}),
            ),
            (
                ControllerMessage::InputRequest { content: None },
                json!({"type": "INPUT_REQUEST"}),
            ),
            (ControllerMessage::FilesSynced, json!({"type": "FILES_SYNCED"})),
        ];
        for (message, expected) in cases {
            assert_eq!(serde_json::to_value(&message).unwrap(), expected);
        }
    }

    #[test]
    fn test_error_detail_uses_type_key() {
        let message = ControllerMessage::Error {
            error: ErrorDetail {
                kind: "IndentationError".into(),
                lineno: Some(3),
                msg: "expected an indented block".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "ERROR",
                "error": {"type": "IndentationError", "lineno": 3, "msg": "expected an indented block"}
            })
        );
    }

    #[test]
    fn test_host_message_parses_from_wire() {
        let run: HostMessage = serde_json::from_str(r#"{"type":"RUN","content":"print(1)"}"#).unwrap();
        assert!(matches!(run, HostMessage::Run { content } if content == "print(1)"));

        let scan: HostMessage = serde_json::from_str(r#"{"type":"SCAN_FILES"}"#).unwrap();
        assert!(matches!(scan, HostMessage::ScanFiles));

        let restore: HostMessage =
            serde_json::from_str(r#"{"type":"RESTORE_PACKAGES","content":["numpy"]}"#).unwrap();
        assert_eq!(restore.kind(), "RESTORE_PACKAGES");
    }

    #[test]
    fn test_init_never_serializes_the_channel() {
        let init = HostMessage::Init {
            buffer: Some(SharedChannel::default()),
            offline: true,
        };
        assert_eq!(
            serde_json::to_value(&init).unwrap(),
            json!({"type": "INIT", "offline": true})
        );
    }

    #[test]
    fn test_process_finished_detection() {
        assert!(ControllerMessage::process_finished().is_process_finished());
        assert!(!ControllerMessage::stdout("Process finished.\n").is_process_finished());
        assert!(!ControllerMessage::system("Packages restored.\n").is_process_finished());
    }

    #[test]
    fn test_lint_report_json() {
        assert_eq!(LintReport::clean().to_json(), r#"{"error":false}"#);
        let report = LintReport {
            error: true,
            lineno: Some(2),
            offset: Some(5),
            msg: Some("invalid syntax".into()),
            text: None,
        };
        assert_eq!(LintReport::from_json(&report.to_json()).unwrap(), report);
    }
}
