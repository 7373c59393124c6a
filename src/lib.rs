//! exec-bridge - interactive code execution with a synchronous stdin bridge
//!
//! A host runs an interpreter on its own thread and blocks it on "read a
//! line" while the controller, which owns the only input surface, supplies
//! the line through a shared channel.

pub mod ai;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod logging;
pub mod packages;
pub mod protocol;
pub mod stdin_listener;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
