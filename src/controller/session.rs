//! One RUN from dispatch to its terminal message

use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    Stdout,
    Stderr,
    System,
    InputEcho,
}

/// One entry of the append-only output log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

impl LogEntry {
    pub fn new(content: impl Into<String>, kind: LogKind) -> Self {
        Self {
            content: content.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The host reported `Process finished.`
    Finished,
    /// The session was torn down before finishing
    Aborted(String),
}

/// What a completion callback receives
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub session_id: u64,
    pub status: RunStatus,
    pub logs: Vec<LogEntry>,
    /// Last stderr text or formatted syntax error seen during the session
    pub last_error: Option<String>,
}

pub type CompletionCallback = Box<dyn FnOnce(RunOutcome)>;

pub struct ExecutionSession {
    id: u64,
    source: String,
    started: Instant,
    programmatic: bool,
    waiting_for_input: bool,
    logs: Vec<LogEntry>,
    last_error: Option<String>,
    callback: Option<CompletionCallback>,
}

impl ExecutionSession {
    pub fn new(
        id: u64,
        source: String,
        programmatic: bool,
        callback: Option<CompletionCallback>,
    ) -> Self {
        Self {
            id,
            source,
            started: Instant::now(),
            programmatic,
            waiting_for_input: false,
            logs: Vec::new(),
            last_error: None,
            callback,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_programmatic(&self) -> bool {
        self.programmatic
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.waiting_for_input
    }

    pub fn set_waiting_for_input(&mut self, waiting: bool) {
        self.waiting_for_input = waiting;
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    /// The last `n` log entries
    pub fn log_tail(&self, n: usize) -> Vec<LogEntry> {
        let start = self.logs.len().saturating_sub(n);
        self.logs[start..].to_vec()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_last_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// End the session, firing its callback if one is still registered.
    ///
    /// Consumes the session, so the callback can run at most once.
    pub fn complete(mut self, status: RunStatus) -> RunStatus {
        if let Some(callback) = self.callback.take() {
            callback(RunOutcome {
                session_id: self.id,
                status: status.clone(),
                logs: std::mem::take(&mut self.logs),
                last_error: self.last_error.take(),
            });
        }
        status
    }
}

impl std::fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("id", &self.id)
            .field("programmatic", &self.programmatic)
            .field("waiting_for_input", &self.waiting_for_input)
            .field("logs", &self.logs.len())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
