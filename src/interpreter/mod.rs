//! Interpreter seam
//!
//! A host drives exactly one [`Interpreter`]. The interpreter never talks
//! to the controller directly: program output and input requests go
//! through the [`InterpreterIo`] the host passes into [`Interpreter::run`],
//! which is where line buffering, flush-before-prompt and the blocking
//! channel wait live.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod process;
mod stderr_buffer;

pub use process::ProcessInterpreter;
pub use stderr_buffer::StderrBuffer;

/// What a successfully loaded runtime reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub name: String,
    pub version: String,
    /// Whether INSTALL can reach a package manager
    pub package_manager: bool,
}

/// Failure of the host-side I/O a running program calls into
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostIoError {
    #[error("host terminated")]
    Terminated,
    #[error("input unavailable: {0}")]
    Input(String),
}

/// Host callbacks available to a running program
pub trait InterpreterIo {
    fn write_stdout(&mut self, text: &str) -> Result<(), HostIoError>;
    fn write_stderr(&mut self, text: &str) -> Result<(), HostIoError>;
    /// Forward any buffered stdout
    fn flush(&mut self) -> Result<(), HostIoError> {
        Ok(())
    }
    /// Show `prompt`, then block until a line of input is available
    fn read_line(&mut self, prompt: Option<&str>) -> Result<String, HostIoError>;
}

/// Location of a syntax or indentation error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxErrorInfo {
    /// Exception class name
    pub kind: String,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    pub msg: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Source didn't parse; `rendered` is the formatted error text
    #[error("{}: {}", info.kind, info.msg)]
    Syntax {
        info: SyntaxErrorInfo,
        rendered: String,
    },
    /// Any other failure; the string is the formatted traceback
    #[error("{0}")]
    Runtime(String),
    /// The host was torn down while the program ran
    #[error("execution terminated")]
    Terminated,
}

/// Hard-kill hook, callable from any thread while a run is in progress
#[derive(Clone)]
pub struct Terminator(Arc<dyn Fn() + Send + Sync>);

impl Terminator {
    pub fn new(kill: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(kill))
    }

    pub fn terminate(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Terminator")
    }
}

/// A language runtime the host can execute source text with
pub trait Interpreter: Send {
    /// Bring the runtime up. Called once per host.
    fn load(&mut self, offline: bool) -> anyhow::Result<RuntimeInfo>;

    /// Execute `source` in the persistent global namespace
    fn run(&mut self, source: &str, io: &mut dyn InterpreterIo) -> Result<(), ExecError>;

    /// Parse without executing
    fn check_syntax(&mut self, source: &str) -> Result<(), ExecError>;

    fn install(&mut self, package: &str) -> anyhow::Result<()>;

    /// A way to kill a run from outside the host thread, if the runtime has one
    fn terminator(&self) -> Option<Terminator> {
        None
    }
}

/// Builds a fresh interpreter for each new host
pub type InterpreterFactory = Box<dyn Fn() -> Box<dyn Interpreter>>;
