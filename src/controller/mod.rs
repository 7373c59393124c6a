//! Main-thread execution controller
//!
//! Owns the host lifecycle, decides where each input request's answer
//! comes from and keeps at most one session running. The controller never
//! blocks on the host: every reply arrives as a [`ControllerEvent`] on its
//! queue and is handled from [`Controller::pump`].
//!
//! A RUN issued while a session is active restarts the environment and runs
//! the new source once the replacement host is loaded; stale host state is
//! never reused.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::ai::{HttpInputResolver, InputResolver};
use crate::channel::{ChannelError, SharedChannel};
use crate::config::Config;
use crate::error::{BridgeError, ResultExt};
use crate::host::{Host, ModalPrompt, Workspace};
use crate::interpreter::InterpreterFactory;
use crate::logging;
use crate::packages::{detect_missing_packages, PackageRegistry};
use crate::protocol::{
    ControllerMessage, ErrorDetail, FileMap, HostMessage, LintReport, INIT_FAILED_PREFIX,
};
use crate::transport::{HostTransport, InlineHost, Outbox, WorkerHandle};

mod arbitration;
mod auto_input;
mod diagnostics;
mod files;
mod lifecycle;
mod monitor;
mod session;

pub use arbitration::{wants_enter, ArbitrationContext, InputStrategy};
pub use auto_input::AutoInputQueue;
pub use diagnostics::{format_error_detail, friendly_error_message};
pub use files::FileMirror;
pub use lifecycle::Lifecycle;
pub use monitor::SafetyMonitor;
pub use session::{
    CompletionCallback, ExecutionSession, LogEntry, LogKind, RunOutcome, RunStatus,
};

/// Label of the run marker when no file is open
const DEFAULT_RUN_LABEL: &str = "main.py";

/// Upper bound on events handled by one `pump`
const MAX_EVENTS_PER_PUMP: usize = 4096;

const PUMP_SLICE: Duration = Duration::from_millis(50);

/// Everything that can land on the controller's queue
#[derive(Debug)]
pub enum ControllerEvent {
    /// A reply from the host of `generation`
    Host {
        generation: u64,
        message: ControllerMessage,
    },
    /// Background AI resolution finished
    AiInput {
        session_id: u64,
        request_id: u64,
        result: Result<Option<String>, String>,
    },
}

/// UI notifications. Every method has a no-op default.
pub trait ControllerDelegate {
    fn on_log(&mut self, _entry: &LogEntry) {}

    /// The program is waiting and the answer must come from a person
    fn on_input_requested(&mut self, _prompt: Option<&str>) {}

    fn on_run_state_changed(&mut self, _running: bool) {}

    /// A syntax or indentation error to highlight at `lineno`
    fn on_syntax_error(&mut self, _lineno: u32, _message: &str, _kind: &str) {}

    fn on_lint_result(&mut self, _report: &LintReport) {}

    fn on_files_changed(&mut self, _files: &FileMap) {}

    /// Ask whether `missing` packages should be installed before running
    fn confirm_install(&mut self, _missing: &[String]) -> bool {
        false
    }
}

struct NullDelegate;

impl ControllerDelegate for NullDelegate {}

/// Hand-off after an emergency stop
#[derive(Debug, Clone)]
pub struct RemediationRequest {
    pub reason: String,
    pub source: String,
    pub log_tail: Vec<LogEntry>,
}

/// Receives programs the safety monitor had to kill
pub trait Remediation {
    fn hand_off(&mut self, request: RemediationRequest);
}

/// Builds the blocking modal used by a fallback host
pub type ModalFactory = Box<dyn Fn() -> Box<dyn ModalPrompt>>;

struct RunRequest {
    source: String,
    inputs: Vec<String>,
    programmatic: bool,
    callback: Option<CompletionCallback>,
}

impl RunRequest {
    /// Resolve the callback of a request that never became a session
    fn reject(self, reason: &str) {
        if let Some(callback) = self.callback {
            callback(RunOutcome {
                session_id: 0,
                status: RunStatus::Aborted(reason.to_string()),
                logs: Vec::new(),
                last_error: None,
            });
        }
    }
}

/// Installs confirmed before a host was ready to take them
struct PendingInstall {
    packages: Vec<String>,
    request: RunRequest,
}

#[derive(Debug, Clone)]
struct PendingInput {
    session_id: u64,
    request_id: u64,
    prompt: Option<String>,
}

pub struct Controller {
    config: Config,
    factory: InterpreterFactory,
    channel: SharedChannel,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,
    transport: Option<Box<dyn HostTransport>>,
    generation: u64,
    lifecycle: Lifecycle,
    session: Option<ExecutionSession>,
    next_session_id: u64,
    next_request_id: u64,
    run_after_init: Option<RunRequest>,
    install_after_init: Option<PendingInstall>,
    pending_input: Option<PendingInput>,
    auto_inputs: AutoInputQueue,
    monitor: SafetyMonitor,
    files: FileMirror,
    packages: PackageRegistry,
    log: Vec<LogEntry>,
    last_error: Option<String>,
    elevated: bool,
    online: bool,
    shared_memory: bool,
    delegate: Box<dyn ControllerDelegate>,
    resolver: Option<Arc<dyn InputResolver>>,
    remediation: Option<Box<dyn Remediation>>,
    modal_factory: Option<ModalFactory>,
}

impl Controller {
    pub fn new(config: Config, factory: InterpreterFactory) -> Result<Self, BridgeError> {
        let channel = SharedChannel::new(config.get_channel_bytes())?;
        let (events_tx, events_rx) = mpsc::channel();
        let monitor = SafetyMonitor::new(
            config.get_repeat_threshold(),
            Duration::from_secs(config.get_session_timeout_secs()),
        );
        let resolver = config
            .get_ai_resolver()
            .map(|ai| Arc::new(HttpInputResolver::new(&ai)) as Arc<dyn InputResolver>);

        Ok(Self {
            elevated: config.get_elevated(),
            online: !config.get_offline(),
            shared_memory: config.get_shared_memory(),
            config,
            factory,
            channel,
            events_tx,
            events_rx,
            transport: None,
            generation: 0,
            lifecycle: Lifecycle::Stopped,
            session: None,
            next_session_id: 0,
            next_request_id: 0,
            run_after_init: None,
            install_after_init: None,
            pending_input: None,
            auto_inputs: AutoInputQueue::new(),
            monitor,
            files: FileMirror::default(),
            packages: PackageRegistry::in_memory(),
            log: Vec::new(),
            last_error: None,
            delegate: Box::new(NullDelegate),
            resolver,
            remediation: None,
            modal_factory: None,
        })
    }

    pub fn with_delegate(mut self, delegate: Box<dyn ControllerDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn InputResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_remediation(mut self, remediation: Box<dyn Remediation>) -> Self {
        self.remediation = Some(remediation);
        self
    }

    /// Modal used for input when running without shared memory
    pub fn with_modal_factory(mut self, factory: ModalFactory) -> Self {
        self.modal_factory = Some(factory);
        self
    }

    pub fn with_packages(mut self, packages: PackageRegistry) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_files(mut self, files: FileMirror) -> Self {
        self.files = files;
        self
    }

    // ============================================
    // ACCESSORS
    // ============================================

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The append-only output log
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn files(&self) -> &FileMirror {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut FileMirror {
        &mut self.files
    }

    pub fn packages(&self) -> &PackageRegistry {
        &self.packages
    }

    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(ExecutionSession::id)
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_busy()
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.pending_input.is_some()
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.pending_input.as_ref().and_then(|p| p.prompt.as_deref())
    }

    /// Nothing running, nothing queued, and no host still loading
    pub fn is_idle(&self) -> bool {
        self.session.is_none()
            && self.run_after_init.is_none()
            && self.install_after_init.is_none()
            && matches!(
                self.lifecycle,
                Lifecycle::Ready | Lifecycle::Failed | Lifecycle::Stopped
            )
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Whether `stop` can interrupt a running program
    pub fn can_cancel(&self) -> bool {
        self.transport.as_ref().map(|t| t.can_cancel()).unwrap_or(false)
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn set_elevated(&mut self, elevated: bool) {
        self.elevated = elevated;
        if !elevated {
            self.monitor.disarm();
        }
    }

    // ============================================
    // COMMANDS
    // ============================================

    /// Bring up the first host. A no-op while one is alive.
    #[instrument(skip_all)]
    pub fn start(&mut self) -> Result<(), BridgeError> {
        if self.lifecycle.has_host() {
            return Ok(());
        }
        self.append("Initializing runtime...\n", LogKind::System);
        self.spawn_host(Lifecycle::Initializing)
    }

    /// Run `source` as a person pressing run would
    pub fn run(&mut self, source: impl Into<String>) -> Result<(), BridgeError> {
        self.request_run(RunRequest {
            source: source.into(),
            inputs: Vec::new(),
            programmatic: false,
            callback: None,
        })
    }

    /// Run `source` with pre-supplied answers; `callback` fires exactly once
    pub fn run_programmatic<I, S>(
        &mut self,
        source: impl Into<String>,
        inputs: I,
        callback: impl FnOnce(RunOutcome) + 'static,
    ) -> Result<(), BridgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_run(RunRequest {
            source: source.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            programmatic: true,
            callback: Some(Box::new(callback)),
        })
    }

    /// Answer the pending input request with text typed by a person.
    ///
    /// Oversized input is rejected and the program stays blocked.
    pub fn submit_input(&mut self, text: &str) -> Result<(), BridgeError> {
        match self.publish(text) {
            Err(e @ BridgeError::InputTooLong { .. }) => {
                warn!(error = %e, "Manual input rejected");
                self.append(format!("{}\n", e.user_message()), LogKind::Stderr);
                Err(e)
            }
            other => other,
        }
    }

    /// User stop: kill the host, then bring up a fresh one
    #[instrument(skip_all, fields(generation = self.generation))]
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        if !self.can_cancel() && self.lifecycle.is_busy() {
            warn!("Host cannot interrupt its program; replacing it instead");
        }
        self.abort_session("stopped by user");
        self.teardown_host();
        self.append("\n[System] Process stopped by user.\n", LogKind::System);
        self.spawn_host(Lifecycle::Reinitializing)
    }

    /// Parse-only check; the report arrives through the delegate
    pub fn lint(&mut self, source: impl Into<String>) -> Result<(), BridgeError> {
        self.require_host()?;
        self.post(HostMessage::Lint {
            content: source.into(),
        });
        Ok(())
    }

    pub fn install(&mut self, package: &str) -> Result<(), BridgeError> {
        if !self.elevated {
            return Err(BridgeError::NotPermitted(
                "package installation requires elevated mode".to_string(),
            ));
        }
        if !self.online {
            return Err(BridgeError::NotPermitted(
                "package installation is unavailable offline".to_string(),
            ));
        }
        self.require_host()?;
        self.post(HostMessage::Install {
            content: package.trim().to_string(),
        });
        Ok(())
    }

    // ============================================
    // EVENT LOOP
    // ============================================

    /// Handle queued events, waiting at most `max_wait` for the first one.
    /// Also enforces the session deadline. Returns the number handled.
    pub fn pump(&mut self, max_wait: Duration) -> usize {
        let wait = match self.monitor.deadline() {
            Some(deadline) => max_wait.min(deadline.saturating_duration_since(Instant::now())),
            None => max_wait,
        };

        let mut handled = 0;
        match self.events_rx.recv_timeout(wait) {
            Ok(event) => {
                self.handle_event(event);
                handled += 1;
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
        while handled < MAX_EVENTS_PER_PUMP {
            let Ok(event) = self.events_rx.try_recv() else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }

        if let Some(reason) = self.monitor.check_deadline(Instant::now()) {
            self.emergency_stop(&reason);
        }
        handled
    }

    /// Pump until `done` holds or `limit` passes. Returns whether `done` held.
    pub fn pump_until(&mut self, limit: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if done(&*self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump((deadline - now).min(PUMP_SLICE));
        }
    }

    /// Pump until nothing is running or queued
    pub fn run_until_idle(&mut self, limit: Duration) -> bool {
        self.pump_until(limit, Self::is_idle)
    }

    fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Host {
                generation,
                message,
            } => {
                if generation != self.generation {
                    debug!(
                        generation,
                        current = self.generation,
                        message_type = message.kind(),
                        "Discarding reply from retired host"
                    );
                    return;
                }
                self.handle_message(message);
            }
            ControllerEvent::AiInput {
                session_id,
                request_id,
                result,
            } => self.on_ai_input(session_id, request_id, result),
        }
    }

    fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Loaded => self.on_loaded(),
            output @ ControllerMessage::Output { .. } => self.on_output(output),
            ControllerMessage::Error { error } => self.on_error(error),
            ControllerMessage::LintResult { content } => {
                let report = LintReport::from_json(&content).unwrap_or_else(|e| {
                    warn!(error = %e, "Malformed lint result dropped");
                    LintReport::clean()
                });
                self.delegate.on_lint_result(&report);
            }
            ControllerMessage::InputRequest { content } => self.on_input_request(content),
            ControllerMessage::FilesUpdate { content } => {
                if self.files.merge_update(&content) {
                    self.delegate.on_files_changed(self.files.files());
                }
            }
            ControllerMessage::FilesSynced => debug!("Host files synced"),
        }
    }

    // ============================================
    // HOST LIFECYCLE
    // ============================================

    fn spawn_host(&mut self, loading: Lifecycle) -> Result<(), BridgeError> {
        self.generation += 1;
        let outbox = Outbox::new(self.generation, self.events_tx.clone());
        let workspace = Workspace::new(
            self.config.get_work_dir(),
            self.config.get_persistent_dir(),
            self.config.get_scan_max_file_bytes(),
        );
        let host = Host::new((self.factory)(), workspace, outbox.clone());
        self.set_lifecycle(loading);

        let mut transport: Box<dyn HostTransport> = if self.shared_memory {
            match WorkerHandle::spawn(host, outbox, self.channel.clone()) {
                Ok(worker) => Box::new(worker),
                Err(e) => {
                    error!(severity = ?e.severity(), error = %e, "Host worker failed to start");
                    self.append(format!("Critical Error: {}\n", e.user_message()), LogKind::Stderr);
                    self.fail_host("host could not be started");
                    return Err(e);
                }
            }
        } else {
            self.append(
                "Warning: Running in Compatibility Mode (Main Thread). Performance may be slower and input uses prompts.\n",
                LogKind::Stderr,
            );
            let host = match &self.modal_factory {
                Some(make) => host.with_modal_prompt(make()),
                None => host,
            };
            Box::new(InlineHost::new(host, outbox))
        };

        info!(
            generation = self.generation,
            shared_memory = self.shared_memory,
            "Starting host"
        );
        let buffer = self.shared_memory.then(|| self.channel.clone());
        transport.post(HostMessage::Init {
            buffer,
            offline: !self.online,
        });
        self.transport = Some(transport);
        Ok(())
    }

    fn teardown_host(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            self.set_lifecycle(Lifecycle::Terminating);
            transport.terminate();
        }
        self.pending_input = None;
        self.monitor.disarm();
    }

    fn fail_host(&mut self, reason: &str) {
        self.teardown_host();
        self.set_lifecycle(Lifecycle::Failed);
        if let Some(request) = self.run_after_init.take() {
            request.reject(reason);
        }
        if let Some(pending) = self.install_after_init.take() {
            pending.request.reject(reason);
        }
    }

    fn require_host(&self) -> Result<(), BridgeError> {
        if self.lifecycle == Lifecycle::Ready || self.lifecycle.is_busy() {
            Ok(())
        } else {
            Err(BridgeError::NotReady(self.lifecycle.to_string()))
        }
    }

    fn post(&mut self, message: HostMessage) {
        match self.transport.as_mut() {
            Some(transport) => transport.post(message),
            None => warn!(message_type = message.kind(), "No host to post to"),
        }
    }

    fn set_lifecycle(&mut self, next: Lifecycle) {
        if self.lifecycle == next {
            return;
        }
        debug!(from = %self.lifecycle, to = %next, "Lifecycle transition");
        let was_busy = self.lifecycle.is_busy();
        self.lifecycle = next;
        if was_busy != next.is_busy() {
            self.delegate.on_run_state_changed(next.is_busy());
        }
    }

    fn on_loaded(&mut self) {
        self.set_lifecycle(Lifecycle::Ready);
        info!(generation = self.generation, "Host ready");
        self.append("Runtime Ready.\n", LogKind::System);

        if self.online {
            if !self.packages.is_empty() {
                self.post(HostMessage::RestorePackages {
                    content: self.packages.names(),
                });
            }
        } else {
            self.append(
                "[System] Offline Mode: Package restoration skipped.\n",
                LogKind::System,
            );
        }

        self.post(HostMessage::ScanFiles);

        if let Some(pending) = self.install_after_init.take() {
            self.send_installs(pending.packages, pending.request);
        }
        if let Some(request) = self.run_after_init.take() {
            self.dispatch_run(request);
        }
    }

    // ============================================
    // SESSIONS
    // ============================================

    fn request_run(&mut self, request: RunRequest) -> Result<(), BridgeError> {
        if self.elevated {
            let missing = detect_missing_packages(
                &request.source,
                self.files.files(),
                &self.packages.names(),
            );
            if !missing.is_empty() {
                if !self.online {
                    self.append(
                        format!(
                            "[System] Warning: Missing libraries detected ({}), but cannot install while offline.\n",
                            missing.join(", ")
                        ),
                        LogKind::Stderr,
                    );
                } else if self.delegate.confirm_install(&missing) {
                    info!(packages = ?missing, "Installing missing packages instead of running");
                    return self.request_install(missing, request);
                }
            }
        }

        match self.lifecycle {
            state if state.is_busy() => {
                self.append(
                    "\n[System] Restarting environment for new run...\n",
                    LogKind::System,
                );
                self.abort_session("restarted for a new run");
                self.queue_run(request);
                self.teardown_host();
                self.spawn_host(Lifecycle::Reinitializing)
            }
            Lifecycle::Ready => {
                self.dispatch_run(request);
                Ok(())
            }
            Lifecycle::Initializing | Lifecycle::Reinitializing => {
                self.append(
                    "Runtime is loading, the run will start when it is ready.\n",
                    LogKind::System,
                );
                self.queue_run(request);
                Ok(())
            }
            _ => {
                self.queue_run(request);
                self.spawn_host(Lifecycle::Initializing)
            }
        }
    }

    /// Send INSTALL for each package, or hold them until a host has loaded
    fn request_install(
        &mut self,
        packages: Vec<String>,
        request: RunRequest,
    ) -> Result<(), BridgeError> {
        if self.require_host().is_ok() {
            self.send_installs(packages, request);
            return Ok(());
        }

        let packages = match self.install_after_init.take() {
            Some(previous) => {
                previous.request.reject("superseded by a newer run");
                let mut merged = previous.packages;
                for package in packages {
                    if !merged.contains(&package) {
                        merged.push(package);
                    }
                }
                merged
            }
            None => packages,
        };
        debug!(packages = ?packages, "Installs held until the runtime is ready");
        self.install_after_init = Some(PendingInstall { packages, request });

        if self.lifecycle.has_host() {
            return Ok(());
        }
        self.append("Initializing runtime...\n", LogKind::System);
        self.spawn_host(Lifecycle::Initializing)
    }

    fn send_installs(&mut self, packages: Vec<String>, request: RunRequest) {
        for package in packages {
            self.post(HostMessage::Install { content: package });
        }
        request.reject("installing missing packages");
    }

    fn queue_run(&mut self, request: RunRequest) {
        if let Some(previous) = self.run_after_init.replace(request) {
            previous.reject("superseded by a newer run");
        }
    }

    fn dispatch_run(&mut self, request: RunRequest) {
        self.next_session_id += 1;
        let id = self.next_session_id;
        self.auto_inputs.replace(request.inputs);
        self.last_error = None;
        self.session = Some(ExecutionSession::new(
            id,
            request.source.clone(),
            request.programmatic,
            request.callback,
        ));
        if self.elevated {
            self.monitor.start(Instant::now());
        } else {
            self.monitor.disarm();
        }
        self.set_lifecycle(Lifecycle::Executing);

        let label = self
            .files
            .current()
            .unwrap_or(DEFAULT_RUN_LABEL)
            .to_string();
        self.append(format!("\n {} \n", label), LogKind::System);
        logging::log_run_event(id, "started", None, true);

        self.post(HostMessage::SyncFiles {
            content: self.files.files().clone(),
        });
        self.post(HostMessage::Run {
            content: request.source,
        });
    }

    fn finish_session(&mut self) {
        self.monitor.disarm();
        self.pending_input = None;
        self.auto_inputs.clear();
        self.set_lifecycle(Lifecycle::Ready);
        if let Some(session) = self.session.take() {
            logging::log_run_event(
                session.id(),
                "finished",
                Some(session.elapsed_ms()),
                session.last_error().is_none(),
            );
            session.complete(RunStatus::Finished);
        }
        self.post(HostMessage::ScanFiles);
    }

    fn abort_session(&mut self, reason: &str) {
        self.auto_inputs.clear();
        if let Some(session) = self.session.take() {
            logging::log_run_event(session.id(), "aborted", Some(session.elapsed_ms()), false);
            session.complete(RunStatus::Aborted(reason.to_string()));
        }
    }

    fn emergency_stop(&mut self, reason: &str) {
        warn!(reason, generation = self.generation, "Emergency stop");
        let tail = self.config.get_remediation_log_tail();
        let (source, log_tail) = self
            .session
            .as_ref()
            .map(|s| (s.source().to_string(), s.log_tail(tail)))
            .unwrap_or_default();

        self.abort_session(reason);
        self.teardown_host();
        self.append(
            format!("\n[System] EMERGENCY STOP: {}\n", reason),
            LogKind::Stderr,
        );
        self.spawn_host(Lifecycle::Reinitializing).log_err();

        if let Some(remediation) = self.remediation.as_mut() {
            remediation.hand_off(RemediationRequest {
                reason: reason.to_string(),
                source,
                log_tail,
            });
        }
    }

    // ============================================
    // OUTPUT
    // ============================================

    fn append(&mut self, content: impl Into<String>, kind: LogKind) {
        let entry = LogEntry::new(content, kind);
        if let Some(session) = self.session.as_mut() {
            session.push_log(entry.clone());
        }
        self.delegate.on_log(&entry);
        self.log.push(entry);
    }

    fn record_error(&mut self, error: String) {
        if let Some(session) = self.session.as_mut() {
            session.set_last_error(error.clone());
        }
        self.last_error = Some(error);
    }

    fn on_output(&mut self, message: ControllerMessage) {
        let finished = message.is_process_finished();
        let ControllerMessage::Output {
            content,
            system,
            error,
        } = message
        else {
            return;
        };
        let kind = if error {
            LogKind::Stderr
        } else if system {
            LogKind::System
        } else {
            LogKind::Stdout
        };
        self.append(content.clone(), kind);

        if error {
            self.record_error(content.clone());
            if self.lifecycle.is_loading() && content.starts_with(INIT_FAILED_PREFIX) {
                warn!(generation = self.generation, "Host failed to initialize");
                self.fail_host("runtime failed to load");
                return;
            }
        }

        if let Some(reason) = self.monitor.observe(&content, Instant::now()) {
            self.emergency_stop(&reason);
            return;
        }

        if finished {
            self.finish_session();
        }

        if system && !error {
            if let Some(package) = installed_package(&content) {
                if self.packages.record(package) {
                    self.packages.save().warn_on_err();
                }
            }
        }
    }

    fn on_error(&mut self, detail: ErrorDetail) {
        self.record_error(format_error_detail(&detail));
        if !diagnostics::is_syntax_kind(&detail.kind) {
            return;
        }
        if let Some(lineno) = detail.lineno.filter(|n| *n > 0) {
            let friendly = friendly_error_message(&detail.msg);
            self.delegate.on_syntax_error(lineno, &friendly, &detail.kind);
        }
    }

    // ============================================
    // INPUT
    // ============================================

    fn on_input_request(&mut self, prompt: Option<String>) {
        let prompt = prompt.filter(|p| !p.is_empty());
        if let Some(prompt) = &prompt {
            self.append(prompt.clone(), LogKind::Stdout);
        }

        let (session_id, programmatic) = match self.session.as_mut() {
            Some(session) => {
                session.set_waiting_for_input(true);
                (session.id(), session.is_programmatic())
            }
            None => {
                warn!("Input requested with no active session");
                (0, false)
            }
        };
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.pending_input = Some(PendingInput {
            session_id,
            request_id,
            prompt: prompt.clone(),
        });
        self.set_lifecycle(Lifecycle::AwaitingInput);

        let ctx = ArbitrationContext {
            elevated: self.elevated,
            resolver_available: self.resolver.is_some(),
            programmatic,
        };
        match arbitration::choose(&mut self.auto_inputs, ctx) {
            InputStrategy::Auto(value) => {
                if let Err(e) = self.publish(&value) {
                    warn!(error = %e, "Auto-input not delivered");
                    self.append("Error: Auto-input too long!\n", LogKind::Stderr);
                }
            }
            InputStrategy::Ai => self.request_ai_input(session_id, request_id, prompt),
            InputStrategy::Manual => self.delegate.on_input_requested(prompt.as_deref()),
        }
    }

    /// Write `value` into the channel and release the blocked program
    fn publish(&mut self, value: &str) -> Result<(), BridgeError> {
        if self.pending_input.is_none() {
            return Err(BridgeError::NoPendingInput);
        }
        self.channel.publish_str(value).map_err(|e| match e {
            ChannelError::PayloadTooLarge { len, capacity } => {
                BridgeError::InputTooLong { len, capacity }
            }
            other => BridgeError::Channel(other),
        })?;

        self.pending_input = None;
        if let Some(session) = self.session.as_mut() {
            session.set_waiting_for_input(false);
        }
        self.set_lifecycle(Lifecycle::Executing);
        self.append(format!("{}\n", value), LogKind::InputEcho);
        Ok(())
    }

    fn request_ai_input(&mut self, session_id: u64, request_id: u64, prompt: Option<String>) {
        let Some(resolver) = self.resolver.clone() else {
            self.delegate.on_input_requested(prompt.as_deref());
            return;
        };
        self.append("[AI] Generating input for prompt...\n", LogKind::System);

        let logs = self
            .session
            .as_ref()
            .map(|s| s.logs().to_vec())
            .unwrap_or_default();
        let tx = self.events_tx.clone();
        let thread_prompt = prompt.clone();
        let spawned = thread::Builder::new()
            .name(format!("ai-input-{}", session_id))
            .spawn(move || {
                let result = resolver
                    .resolve(thread_prompt.as_deref(), &logs)
                    .map_err(|e| format!("{:#}", e));
                if tx
                    .send(ControllerEvent::AiInput {
                        session_id,
                        request_id,
                        result,
                    })
                    .is_err()
                {
                    debug!(session_id, "Controller gone before AI input arrived");
                }
            });

        if let Err(e) = spawned {
            self.ai_failed(&e.to_string(), prompt.as_deref());
        }
    }

    fn on_ai_input(&mut self, session_id: u64, request_id: u64, result: Result<Option<String>, String>) {
        let Some(pending) = self.pending_input.clone() else {
            debug!(session_id, "AI input arrived with nothing pending");
            return;
        };
        if (pending.session_id, pending.request_id) != (session_id, request_id) {
            debug!(session_id, request_id, "Stale AI input discarded");
            return;
        }

        match result {
            Ok(Some(value)) => {
                if let Err(e) = self.publish(&value) {
                    warn!(error = %e, "AI input not delivered");
                    self.append("Error: AI Input too long!\n", LogKind::Stderr);
                }
            }
            Ok(None) => {
                let last_output = self.session.as_ref().and_then(|s| {
                    s.logs()
                        .iter()
                        .rev()
                        .find(|e| matches!(e.kind, LogKind::Stdout | LogKind::Stderr))
                        .map(|e| e.content.clone())
                });
                if wants_enter(pending.prompt.as_deref(), last_output.as_deref()) {
                    self.append(
                        "[System] AI Input failed. Defaulting to Enter.\n",
                        LogKind::System,
                    );
                    self.publish("").log_err();
                } else {
                    self.ai_failed("AI returned no input", pending.prompt.as_deref());
                }
            }
            Err(e) => self.ai_failed(&e, pending.prompt.as_deref()),
        }
    }

    fn ai_failed(&mut self, error: &str, prompt: Option<&str>) {
        warn!(error, "AI input failed, falling back to manual input");
        self.append(
            format!("[AI Error] Failed to provide input: {}\n", error),
            LogKind::Stderr,
        );
        self.delegate.on_input_requested(prompt);
    }
}

/// Package name from a host's "Successfully installed X" line
fn installed_package(content: &str) -> Option<&str> {
    let (_, rest) = content.split_once("Successfully installed ")?;
    let name = rest.lines().next()?.trim();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
