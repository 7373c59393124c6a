//! Message protocol between the execution controller and a host
//!
//! Both directions are closed enums tagged by a `type` field in
//! SCREAMING_SNAKE_CASE, so they serialize to the same shapes whether they
//! cross a thread boundary in memory or a process boundary as JSONL.
//!
//! # Host-bound (controller → host)
//! - `INIT`: bind the shared input channel, load the runtime
//! - `RUN`, `LINT`, `INSTALL`: execute, parse-check, fetch a package
//! - `RESTORE_PACKAGES`: reinstall previously recorded packages
//! - `SYNC_FILES`, `SCAN_FILES`: push / pull working directory contents
//!
//! # Controller-bound (host → controller)
//! - `LOADED`, `OUTPUT`, `ERROR`, `LINT_RESULT`
//! - `INPUT_REQUEST`: the running program is blocked on input
//! - `FILES_UPDATE`, `FILES_SYNCED`
//!
//! # Module Structure
//!
//! - `message`: the two message enums, error detail and lint report types
//! - `io`: graceful JSONL parsing and a streaming reader

mod io;
mod message;

pub use io::*;
pub use message::*;
