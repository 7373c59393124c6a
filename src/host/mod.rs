//! Execution host
//!
//! Owns one interpreter and turns [`HostMessage`]s into interpreter calls,
//! reporting everything back as [`ControllerMessage`]s through its
//! [`Outbox`]. The host is transport-agnostic: a worker thread drives it in
//! normal mode, the controller thread drives it directly in fallback mode.
//!
//! Every RUN ends with exactly one `Process finished.` message, whatever
//! happened during the run.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::channel::SharedChannel;
use crate::error::ResultExt;
use crate::interpreter::{ExecError, Interpreter, InterpreterIo, Terminator};
use crate::protocol::{
    ControllerMessage, ErrorDetail, FileMap, HostMessage, LintReport, INIT_FAILED_PREFIX,
};
use crate::transport::Outbox;

pub mod input;
mod io;
mod workspace;

pub use input::{ChannelInput, InputSource, ModalInput, ModalPrompt, NoInput};
pub use io::HostIo;
pub use workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Uninitialized,
    Initializing,
    Ready,
    Executing,
    /// INIT failed; only a fresh host can recover
    Failed,
}

pub struct Host {
    interpreter: Box<dyn Interpreter>,
    workspace: Workspace,
    outbox: Outbox,
    state: HostState,
    input: Option<Box<dyn InputSource>>,
    /// Fallback mode: bound as the input source at INIT instead of the channel
    modal: Option<Box<dyn ModalPrompt>>,
    offline: bool,
    package_manager: bool,
}

impl Host {
    pub fn new(interpreter: Box<dyn Interpreter>, workspace: Workspace, outbox: Outbox) -> Self {
        Self {
            interpreter,
            workspace,
            outbox,
            state: HostState::Uninitialized,
            input: None,
            modal: None,
            offline: false,
            package_manager: false,
        }
    }

    /// Host whose input comes from a blocking modal prompt
    pub fn with_modal_prompt(mut self, modal: Box<dyn ModalPrompt>) -> Self {
        self.modal = Some(modal);
        self
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.outbox.generation()
    }

    pub fn terminator(&self) -> Option<Terminator> {
        self.interpreter.terminator()
    }

    /// Handle one message. Never panics on interpreter failures.
    pub fn dispatch(&mut self, message: HostMessage) {
        debug!(
            generation = self.generation(),
            message_type = message.kind(),
            state = ?self.state,
            "Host dispatch"
        );

        match message {
            HostMessage::Init { buffer, offline } => self.init(buffer, offline),
            other if self.state != HostState::Ready => {
                warn!(
                    message_type = other.kind(),
                    state = ?self.state,
                    "Dropping message, host is not ready"
                );
            }
            HostMessage::Run { content } => self.run(&content),
            HostMessage::Install { content } => self.install(&content),
            HostMessage::Lint { content } => self.lint(&content),
            HostMessage::RestorePackages { content } => self.restore_packages(&content),
            HostMessage::SyncFiles { content } => self.sync_files(&content),
            HostMessage::ScanFiles => self.scan_files(),
        }
    }

    fn emit(&self, message: ControllerMessage) {
        if self.outbox.send(message).is_err() {
            debug!(generation = self.generation(), "Outbox closed, message dropped");
        }
    }

    #[instrument(skip_all, fields(generation = self.generation(), offline = offline))]
    fn init(&mut self, buffer: Option<SharedChannel>, offline: bool) {
        if self.state != HostState::Uninitialized {
            warn!(state = ?self.state, "INIT refused, host already initialized");
            self.emit(ControllerMessage::system_error(
                "Error: runtime already initialized; restart to reload it.\n",
            ));
            return;
        }
        self.state = HostState::Initializing;
        self.offline = offline;

        let info = match self.interpreter.load(offline) {
            Ok(info) => info,
            Err(e) => {
                self.state = HostState::Failed;
                warn!(error = %e, "Runtime failed to load");
                self.emit(ControllerMessage::system_error(format!(
                    "{}: {:#}\n",
                    INIT_FAILED_PREFIX, e
                )));
                return;
            }
        };
        info!(runtime = %info.name, version = %info.version, "Runtime loaded");
        self.package_manager = info.package_manager && !offline;

        let input: Box<dyn InputSource> = match (self.modal.take(), buffer) {
            (Some(modal), _) => Box::new(ModalInput::new(modal)),
            (None, Some(channel)) => Box::new(ChannelInput::new(channel.bind())),
            (None, None) => Box::new(NoInput),
        };
        self.input = Some(input);

        if offline {
            self.emit(ControllerMessage::system(
                "Offline Mode: Skipping Package Manager.\n",
            ));
        }

        match self.workspace.mount() {
            Ok(_) => self.emit(ControllerMessage::system(
                "Local Persistent Storage Loaded.\n",
            )),
            Err(e) => self.emit(ControllerMessage::system_error(format!(
                "Warning: Persistent storage failed: {:#}\n",
                e
            ))),
        }

        self.state = HostState::Ready;
        self.emit(ControllerMessage::Loaded);
    }

    #[instrument(skip_all, fields(generation = self.generation(), bytes = source.len()))]
    fn run(&mut self, source: &str) {
        self.state = HostState::Executing;
        let started = Instant::now();

        let mut no_input = NoInput;
        let input: &mut dyn InputSource = match self.input.as_deref_mut() {
            Some(input) => input,
            None => &mut no_input,
        };
        let mut io = HostIo::new(&self.outbox, input);
        let result = self.interpreter.run(source, &mut io);
        if let Err(e) = io.flush() {
            debug!(error = %e, "Final stdout flush dropped");
        }

        match result {
            Ok(()) => {}
            Err(ExecError::Syntax { info, rendered }) => {
                self.emit(ControllerMessage::Error {
                    error: ErrorDetail {
                        kind: info.kind,
                        lineno: info.lineno,
                        msg: info.msg,
                    },
                });
                self.emit(ControllerMessage::stderr(rendered));
            }
            Err(ExecError::Runtime(traceback)) => {
                self.emit(ControllerMessage::stderr(traceback));
            }
            Err(ExecError::Terminated) => {
                debug!("Run terminated");
            }
        }

        self.workspace.flush_to_store().warn_on_err();
        self.state = HostState::Ready;
        debug!(duration_ms = started.elapsed().as_millis() as u64, "Run complete");
        self.emit(ControllerMessage::process_finished());
    }

    fn install(&mut self, package: &str) {
        let package = package.trim();
        if package.is_empty() {
            return;
        }
        if self.offline || !self.package_manager {
            self.emit(ControllerMessage::system_error(format!(
                "Failed to install {}: package manager unavailable\n",
                package
            )));
            return;
        }
        match self.interpreter.install(package) {
            Ok(()) => self.emit(ControllerMessage::system(format!(
                "Successfully installed {}\n",
                package
            ))),
            Err(e) => self.emit(ControllerMessage::system_error(format!(
                "Failed to install {}: {:#}\n",
                package, e
            ))),
        }
    }

    fn lint(&mut self, source: &str) {
        let report = match self.interpreter.check_syntax(source) {
            Err(ExecError::Syntax { info, .. }) => LintReport {
                error: true,
                lineno: info.lineno,
                offset: info.offset,
                msg: Some(info.msg),
                text: info.text,
            },
            Err(other) => {
                debug!(error = %other, "Lint failure treated as clean");
                LintReport::clean()
            }
            Ok(()) => LintReport::clean(),
        };
        self.emit(ControllerMessage::LintResult {
            content: report.to_json(),
        });
    }

    fn restore_packages(&mut self, packages: &[String]) {
        if packages.is_empty() {
            return;
        }
        self.emit(ControllerMessage::system("Restoring installed packages...\n"));
        if self.offline || !self.package_manager {
            self.emit(ControllerMessage::system_error(
                "Failed to restore packages: package manager unavailable\n",
            ));
            return;
        }
        for package in packages {
            if let Err(e) = self.interpreter.install(package) {
                self.emit(ControllerMessage::system_error(format!(
                    "Failed to restore packages: {}: {:#}\n",
                    package, e
                )));
                return;
            }
        }
        self.emit(ControllerMessage::system("Packages restored.\n"));
    }

    fn sync_files(&mut self, files: &FileMap) {
        let report = self.workspace.write_files(files);
        for path in report.rejected {
            self.emit(ControllerMessage::system_error(format!(
                "File Sync Error: refusing to write '{}'\n",
                path
            )));
        }
        for (path, error) in report.failed {
            self.emit(ControllerMessage::system_error(format!(
                "File Sync Error: {}: {}\n",
                path, error
            )));
        }
        self.workspace.flush_to_store().warn_on_err();
        self.emit(ControllerMessage::FilesSynced);
    }

    fn scan_files(&mut self) {
        let files = self.workspace.scan();
        debug!(count = files.len(), "Scanned working directory");
        self.emit(ControllerMessage::FilesUpdate { content: files });
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
