//! Structured JSONL logging plus human-readable stderr output.
//!
//! - **JSONL to file** (~/.exec-bridge/logs/exec-bridge.jsonl) for tooling
//! - **Compact to stderr** for developers
//!
//! ```rust,ignore
//! use exec_bridge::logging;
//!
//! // Keep the guard alive for the duration of the program
//! let _guard = logging::init();
//! tracing::info!(event_type = "run_event", session_id = 3, "Run started");
//! ```
//!
//! Each file line is one JSON object:
//! ```json
//! {"timestamp":"2026-03-02T10:30:45.123Z","level":"INFO","target":"exec_bridge::controller","fields":{"message":"Run finished","session_id":3,"duration_ms":42}}
//! ```

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_BUFFER: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();
const MAX_LOG_LINES: usize = 50;

/// Guard that must be kept alive for the duration of the program.
/// Dropping it flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize file + stderr logging.
///
/// Falls back to stderr-only logging when the log file can't be opened.
pub fn init() -> LoggingGuard {
    let _ = LOG_BUFFER.set(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES)));

    let log_dir = get_log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("[LOGGING] Failed to create log directory: {}", e);
    }
    let log_path = log_path();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,exec_bridge=info,ureq=warn"));

    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .compact();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    let (json_layer, file_guard) = match file {
        Ok(file) => {
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file);
            let json_layer = fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_target(true)
                .with_level(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_span_events(FmtSpan::NONE);
            (Some(json_layer), Some(guard))
        }
        Err(e) => {
            eprintln!("[LOGGING] Failed to open log file: {}", e);
            (None, None)
        }
    };

    // Option<Layer> is itself a layer, so one chain covers both cases
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init();

    tracing::info!(
        event_type = "app_lifecycle",
        action = "started",
        log_path = %log_path.display(),
        "Logging initialized"
    );

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// ~/.exec-bridge/logs/
fn get_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".exec-bridge").join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("exec-bridge-logs"))
}

/// Path to the JSONL log file
pub fn log_path() -> PathBuf {
    get_log_dir().join("exec-bridge.jsonl")
}

/// Category-tagged log line, also kept in the in-memory ring.
///
/// Prefer tracing macros with structured fields for anything new.
pub fn log(category: &str, message: &str) {
    add_to_buffer(category, message);
    tracing::info!(category = category, "{}", message);
}

fn add_to_buffer(category: &str, message: &str) {
    if let Some(buffer) = LOG_BUFFER.get() {
        if let Ok(mut buf) = buffer.lock() {
            if buf.len() >= MAX_LOG_LINES {
                buf.pop_front();
            }
            buf.push_back(format!("[{}] {}", category, message));
        }
    }
}

/// Last `n` lines from the in-memory ring, newest first
pub fn get_last_logs(n: usize) -> Vec<String> {
    if let Some(buffer) = LOG_BUFFER.get() {
        if let Ok(buf) = buffer.lock() {
            return buf.iter().rev().take(n).cloned().collect();
        }
    }
    Vec::new()
}

/// Log the end of a run with structured fields
pub fn log_run_event(session_id: u64, action: &str, duration_ms: Option<u64>, success: bool) {
    add_to_buffer(
        "RUN",
        &format!("{} session={} (success={})", action, session_id, success),
    );

    match duration_ms {
        Some(duration) => {
            tracing::info!(
                event_type = "run_event",
                session_id,
                action,
                duration_ms = duration,
                success,
                "Run {} {}",
                action,
                session_id
            );
        }
        None => {
            tracing::info!(
                event_type = "run_event",
                session_id,
                action,
                success,
                "Run {} {}",
                action,
                session_id
            );
        }
    }
}
