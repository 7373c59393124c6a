//! Ring buffer for the runtime process's own stderr
//!
//! Program output never reaches the process stderr (the bootstrap redirects
//! it into the event stream), so anything captured here is a runtime crash
//! or a bootstrap failure. The buffer tees each line to the log and keeps
//! the most recent lines for error reports.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_MAX_LINES: usize = 200;
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024;

#[derive(Debug, Default)]
struct Lines {
    lines: VecDeque<String>,
    bytes: usize,
}

#[derive(Debug, Clone)]
pub struct StderrBuffer {
    inner: Arc<Mutex<Lines>>,
    max_lines: usize,
    max_bytes: usize,
}

impl Default for StderrBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES, DEFAULT_MAX_BYTES)
    }
}

impl StderrBuffer {
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Lines::default())),
            max_lines,
            max_bytes,
        }
    }

    /// Add a line, evicting the oldest ones past either limit
    pub fn push_line(&self, line: String) {
        let mut inner = self.inner.lock();
        while inner.bytes + line.len() > self.max_bytes || inner.lines.len() >= self.max_lines {
            match inner.lines.pop_front() {
                Some(old) => inner.bytes = inner.bytes.saturating_sub(old.len()),
                None => break,
            }
        }
        inner.bytes += line.len();
        inner.lines.push_back(line);
    }

    pub fn get_contents(&self) -> String {
        let inner = self.inner.lock();
        inner.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    pub fn get_last_n_lines(&self, n: usize) -> Vec<String> {
        let inner = self.inner.lock();
        let skip = inner.lines.len().saturating_sub(n);
        inner.lines.iter().skip(skip).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lines.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lines.clear();
        inner.bytes = 0;
    }

    /// Spawn a reader thread that tees `stderr` into this buffer
    pub fn capture<R: Read + Send + 'static>(&self, stderr: R, pid: u32) -> JoinHandle<()> {
        let buffer = self.clone();
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line_result in reader.lines() {
                match line_result {
                    Ok(line) => {
                        debug!(target: "RUNTIME", pid, "{}", line);
                        buffer.push_line(line);
                    }
                    Err(e) => {
                        warn!(pid, error = %e, "Error reading runtime stderr");
                        break;
                    }
                }
            }
            debug!(pid, "Runtime stderr reader exiting");
        })
    }
}
