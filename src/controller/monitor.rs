//! Runaway-program detection for elevated mode
//!
//! Two triggers: the same non-blank line printed more than `threshold`
//! times in a row, or a session outliving its wall-clock ceiling. Once a
//! trigger fires the monitor disarms itself, so one session yields at most
//! one emergency stop.

use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    threshold: usize,
    timeout: Duration,
    last_line: Option<String>,
    repeat_count: usize,
    started: Option<Instant>,
}

impl SafetyMonitor {
    pub fn new(threshold: usize, timeout: Duration) -> Self {
        Self {
            threshold,
            timeout,
            last_line: None,
            repeat_count: 0,
            started: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.started.is_some()
    }

    pub fn start(&mut self, now: Instant) {
        self.last_line = None;
        self.repeat_count = 0;
        self.started = Some(now);
    }

    pub fn disarm(&mut self) {
        self.started = None;
        self.last_line = None;
        self.repeat_count = 0;
    }

    /// When the wall-clock ceiling will be hit, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.started.map(|started| started + self.timeout)
    }

    /// Feed one OUTPUT chunk. Returns the stop reason when a trigger fires.
    pub fn observe(&mut self, content: &str, now: Instant) -> Option<String> {
        if !self.is_armed() {
            return None;
        }

        for line in content.split('\n') {
            if line.trim().is_empty() {
                continue;
            }
            if self.last_line.as_deref() == Some(line) {
                self.repeat_count += 1;
            } else {
                self.last_line = Some(line.to_string());
                self.repeat_count = 1;
            }

            if self.repeat_count > self.threshold {
                debug!(repeat_count = self.repeat_count, "Repeat threshold exceeded");
                self.disarm();
                return Some(format!(
                    "Infinite Loop Detected: Same output repeated > {} times.",
                    self.threshold
                ));
            }
        }

        self.check_deadline(now)
    }

    pub fn check_deadline(&mut self, now: Instant) -> Option<String> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.disarm();
        Some(format!("Time Limit Exceeded ({}).", describe(self.timeout)))
    }
}

fn describe(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s > 0 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{} seconds", s),
    }
}
