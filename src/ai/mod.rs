//! AI-provided answers for programs waiting on input
//!
//! Only consulted in elevated mode, for programmatic runs, after the
//! auto-input queue is exhausted. Resolution runs off the controller thread;
//! see [`crate::controller`] for how results come back.

mod resolver;

pub use resolver::{build_request_body, interpret_response, HttpInputResolver};

use crate::controller::LogEntry;

/// Something that can answer a program's input prompt
pub trait InputResolver: Send + Sync {
    /// `Ok(None)` means the resolver had no answer
    fn resolve(&self, prompt: Option<&str>, logs: &[LogEntry]) -> anyhow::Result<Option<String>>;
}
