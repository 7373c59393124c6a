//! CPython runtime in a child process
//!
//! The child runs an embedded bootstrap that swaps its stdout, stderr,
//! stdin and `input()` for a JSONL event stream, then executes commands
//! read from its stdin in one persistent namespace. The child is spawned in
//! its own process group so the whole group can be killed when the host is
//! torn down mid-run.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{
    ExecError, HostIoError, Interpreter, InterpreterIo, RuntimeInfo, StderrBuffer,
    SyntaxErrorInfo, Terminator,
};
use crate::config::InterpreterConfig;
use crate::logging;
use crate::protocol::{serialize_message, JsonlReader};

const BOOTSTRAP: &str = include_str!("bootstrap.py");

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum RuntimeCommand<'a> {
    Run { source: &'a str },
    Lint { source: &'a str },
    Install { package: &'a str },
    /// Reply to an input event; `None` raises EOFError in the program
    Input { text: Option<&'a str> },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RuntimeEvent {
    Ready {
        version: String,
        #[serde(default)]
        pip: bool,
    },
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    Input {
        #[serde(default)]
        prompt: Option<String>,
    },
    Done {
        #[serde(default)]
        syntax: Option<SyntaxErrorInfo>,
        #[serde(default)]
        traceback: Option<String>,
    },
    Lint {
        #[serde(default)]
        syntax: Option<SyntaxErrorInfo>,
        #[serde(default)]
        failure: Option<String>,
    },
    Installed {
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

struct RuntimeProcess {
    child: Child,
    stdin: ChildStdin,
    events: JsonlReader<ChildStdout, RuntimeEvent>,
}

impl RuntimeProcess {
    fn send(&mut self, command: &RuntimeCommand<'_>) -> anyhow::Result<()> {
        let mut line = serialize_message(command)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .context("Failed to write to runtime stdin")
    }

    fn next_event(&mut self) -> anyhow::Result<Option<RuntimeEvent>> {
        self.events
            .next_message_graceful()
            .context("Failed to read runtime event")
    }
}

/// Interpreter backed by a long-lived `python3` child process
pub struct ProcessInterpreter {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
    process: Option<RuntimeProcess>,
    /// PID of the live child (also its process group id)
    pid: Arc<Mutex<Option<u32>>>,
    killed: Arc<AtomicBool>,
    stderr: StderrBuffer,
}

impl ProcessInterpreter {
    pub fn new(config: &InterpreterConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            work_dir: work_dir.into(),
            process: None,
            pid: Arc::new(Mutex::new(None)),
            killed: Arc::new(AtomicBool::new(false)),
            stderr: StderrBuffer::default(),
        }
    }

    fn process(&mut self) -> anyhow::Result<&mut RuntimeProcess> {
        self.process
            .as_mut()
            .ok_or_else(|| anyhow!("runtime is not loaded"))
    }

    /// Runtime vanished; describe why, using whatever it printed on the way out
    fn runtime_lost(&mut self) -> ExecError {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.wait();
        }
        *self.pid.lock() = None;
        if self.killed.load(Ordering::SeqCst) {
            return ExecError::Terminated;
        }
        let tail = self.stderr.get_last_n_lines(20).join("\n");
        if tail.is_empty() {
            ExecError::Runtime("Runtime exited unexpectedly\n".to_string())
        } else {
            ExecError::Runtime(format!("Runtime exited unexpectedly:\n{}\n", tail))
        }
    }
}

impl Interpreter for ProcessInterpreter {
    #[instrument(skip_all, fields(program = %self.program))]
    fn load(&mut self, offline: bool) -> anyhow::Result<RuntimeInfo> {
        if self.process.is_some() {
            bail!("runtime already loaded");
        }
        let program = which::which(&self.program)
            .with_context(|| format!("Could not find '{}' on PATH", self.program))?;
        std::fs::create_dir_all(&self.work_dir).with_context(|| {
            format!("Failed to create working directory {}", self.work_dir.display())
        })?;

        let mut command = Command::new(&program);
        command
            .args(&self.args)
            .arg("-u")
            .arg("-c")
            .arg(BOOTSTRAP)
            .current_dir(&self.work_dir)
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn runtime: {}", program.display()))?;
        let pid = child.id();
        logging::log(
            "RUNTIME",
            &format!("Spawned {} (PID {})", program.display(), pid),
        );

        let stdin = child.stdin.take().context("Runtime stdin unavailable")?;
        let stdout = child.stdout.take().context("Runtime stdout unavailable")?;
        if let Some(stderr) = child.stderr.take() {
            self.stderr.capture(stderr, pid);
        }

        *self.pid.lock() = Some(pid);
        self.process = Some(RuntimeProcess {
            child,
            stdin,
            events: JsonlReader::new(stdout),
        });

        loop {
            let event = self.process()?.next_event()?;
            match event {
                Some(RuntimeEvent::Ready { version, pip }) => {
                    info!(pid, %version, pip, "Runtime ready");
                    return Ok(RuntimeInfo {
                        name: "CPython".to_string(),
                        version,
                        package_manager: pip && !offline,
                    });
                }
                Some(other) => debug!(event = ?other, "Ignoring event before ready"),
                None => {
                    let reason = self.runtime_lost();
                    bail!("Runtime failed to start: {}", reason);
                }
            }
        }
    }

    fn run(&mut self, source: &str, io: &mut dyn InterpreterIo) -> Result<(), ExecError> {
        self.killed.store(false, Ordering::SeqCst);
        let process = self
            .process()
            .map_err(|e| ExecError::Runtime(format!("{}\n", e)))?;
        if process.send(&RuntimeCommand::Run { source }).is_err() {
            return Err(self.runtime_lost());
        }

        loop {
            let event = match self.process().and_then(|p| p.next_event()) {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => return Err(self.runtime_lost()),
            };

            let io_result = match event {
                RuntimeEvent::Stdout { text } => io.write_stdout(&text),
                RuntimeEvent::Stderr { text } => io.write_stderr(&text),
                RuntimeEvent::Input { prompt } => match io.read_line(prompt.as_deref()) {
                    Ok(line) => self
                        .process()
                        .and_then(|p| p.send(&RuntimeCommand::Input { text: Some(&line) }))
                        .map_err(|e| HostIoError::Input(e.to_string())),
                    Err(HostIoError::Input(reason)) => {
                        warn!(%reason, "Input unavailable, sending EOF to program");
                        self.process()
                            .and_then(|p| p.send(&RuntimeCommand::Input { text: None }))
                            .map_err(|e| HostIoError::Input(e.to_string()))
                    }
                    Err(HostIoError::Terminated) => Err(HostIoError::Terminated),
                },
                RuntimeEvent::Done { syntax, traceback } => {
                    return match (syntax, traceback) {
                        (Some(info), rendered) => Err(ExecError::Syntax {
                            rendered: rendered.unwrap_or_else(|| format!("{}: {}\n", info.kind, info.msg)),
                            info,
                        }),
                        (None, Some(traceback)) => Err(ExecError::Runtime(traceback)),
                        (None, None) => Ok(()),
                    };
                }
                other => {
                    debug!(event = ?other, "Ignoring unexpected event during run");
                    Ok(())
                }
            };

            match io_result {
                Ok(()) => {}
                Err(HostIoError::Terminated) => {
                    if let Some(terminator) = self.terminator() {
                        terminator.terminate();
                    }
                    self.runtime_lost();
                    return Err(ExecError::Terminated);
                }
                Err(HostIoError::Input(_)) => return Err(self.runtime_lost()),
            }
        }
    }

    fn check_syntax(&mut self, source: &str) -> Result<(), ExecError> {
        let process = self
            .process()
            .map_err(|e| ExecError::Runtime(e.to_string()))?;
        if process.send(&RuntimeCommand::Lint { source }).is_err() {
            return Err(self.runtime_lost());
        }
        loop {
            let event = self.process().and_then(|p| p.next_event());
            match event {
                Ok(Some(RuntimeEvent::Lint { syntax, failure })) => {
                    return match (syntax, failure) {
                        (Some(info), _) => Err(ExecError::Syntax {
                            rendered: String::new(),
                            info,
                        }),
                        (None, Some(failure)) => Err(ExecError::Runtime(failure)),
                        (None, None) => Ok(()),
                    };
                }
                Ok(Some(other)) => debug!(event = ?other, "Ignoring event during lint"),
                Ok(None) | Err(_) => return Err(self.runtime_lost()),
            }
        }
    }

    #[instrument(skip(self))]
    fn install(&mut self, package: &str) -> anyhow::Result<()> {
        self.process()?.send(&RuntimeCommand::Install { package })?;
        loop {
            let event = self.process()?.next_event()?;
            match event {
                Some(RuntimeEvent::Installed { ok: true, .. }) => return Ok(()),
                Some(RuntimeEvent::Installed { ok: false, error }) => {
                    bail!(error.unwrap_or_else(|| "pip failed".to_string()))
                }
                Some(other) => debug!(event = ?other, "Ignoring event during install"),
                None => {
                    let reason = self.runtime_lost();
                    bail!("{}", reason);
                }
            }
        }
    }

    fn terminator(&self) -> Option<Terminator> {
        let pid = self.pid.clone();
        let killed = self.killed.clone();
        Some(Terminator::new(move || {
            killed.store(true, Ordering::SeqCst);
            if let Some(pgid) = pid.lock().take() {
                kill_runtime(pgid);
            }
        }))
    }
}

impl Drop for ProcessInterpreter {
    fn drop(&mut self) {
        if let Some(pgid) = self.pid.lock().take() {
            kill_runtime(pgid);
        }
        if let Some(mut process) = self.process.take() {
            let _ = process.child.wait();
        }
    }
}

/// SIGTERM the runtime's process group and return at once. A detached
/// reaper escalates to SIGKILL if the group outlives the grace period.
#[cfg(unix)]
fn kill_runtime(pgid: u32) {
    match signal_group(pgid, libc::SIGTERM) {
        Ok(()) => logging::log("RUNTIME", &format!("SIGTERM sent to PGID {}", pgid)),
        Err(libc::ESRCH) => return,
        Err(errno) => warn!(pgid, errno, "Failed to send SIGTERM"),
    }

    let spawned = std::thread::Builder::new()
        .name(format!("runtime-reaper-{}", pgid))
        .spawn(move || escalate_after_grace(pgid));
    if let Err(e) = spawned {
        warn!(pgid, error = %e, "Failed to start reaper, sending SIGKILL now");
        send_sigkill(pgid);
    }
}

#[cfg(unix)]
fn escalate_after_grace(pgid: u32) {
    use std::time::{Duration, Instant};

    const TERM_GRACE_MS: u64 = 250;
    const POLL_INTERVAL_MS: u64 = 25;

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(TERM_GRACE_MS) {
        if !group_alive(pgid) {
            return;
        }
        std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }

    logging::log(
        "RUNTIME",
        &format!("PGID {} ignored SIGTERM, escalating to SIGKILL", pgid),
    );
    send_sigkill(pgid);
}

#[cfg(unix)]
fn send_sigkill(pgid: u32) {
    if let Err(errno) = signal_group(pgid, libc::SIGKILL) {
        if errno != libc::ESRCH {
            warn!(pgid, errno, "Failed to send SIGKILL");
        }
    }
}

#[cfg(not(unix))]
fn kill_runtime(pgid: u32) {
    warn!(pgid, "Process group kill is only supported on unix");
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> Result<(), i32> {
    // Safety: kill() is a plain syscall; a negative pid targets the group
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
    // EPERM still means the group exists
    !matches!(signal_group(pgid, 0), Err(libc::ESRCH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_serialize_with_op_tag() {
        assert_eq!(
            serde_json::to_string(&RuntimeCommand::Run { source: "x = 1" }).unwrap(),
            r#"{"op":"run","source":"x = 1"}"#
        );
        assert_eq!(
            serde_json::to_string(&RuntimeCommand::Input { text: None }).unwrap(),
            r#"{"op":"input","text":null}"#
        );
    }

    #[test]
    fn test_events_parse_from_bootstrap_lines() {
        let done: RuntimeEvent = serde_json::from_str(
            r#"{"type":"done","syntax":{"kind":"SyntaxError","lineno":1,"offset":4,"msg":"invalid syntax","text":"x = = 1\n"},"traceback":"SyntaxError: invalid syntax\n"}"#,
        )
        .unwrap();
        match done {
            RuntimeEvent::Done {
                syntax: Some(info),
                traceback: Some(_),
            } => {
                assert_eq!(info.lineno, Some(1));
                assert_eq!(info.offset, Some(4));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let input: RuntimeEvent = serde_json::from_str(r#"{"type":"input","prompt":null}"#).unwrap();
        assert!(matches!(input, RuntimeEvent::Input { prompt: None }));
    }

    #[test]
    fn test_missing_program_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = InterpreterConfig {
            program: "definitely-not-a-python-binary".to_string(),
            args: Vec::new(),
        };
        let mut interpreter = ProcessInterpreter::new(&config, dir.path());
        let err = interpreter.load(false).unwrap_err();
        assert!(err.to_string().contains("Could not find"));
    }

    #[test]
    fn test_run_before_load_is_an_error() {
        struct NoIo;
        impl InterpreterIo for NoIo {
            fn write_stdout(&mut self, _: &str) -> Result<(), HostIoError> {
                Ok(())
            }
            fn write_stderr(&mut self, _: &str) -> Result<(), HostIoError> {
                Ok(())
            }
            fn read_line(&mut self, _: Option<&str>) -> Result<String, HostIoError> {
                Err(HostIoError::Input("none".into()))
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let mut interpreter = ProcessInterpreter::new(&InterpreterConfig::default(), dir.path());
        assert!(matches!(
            interpreter.run("print(1)", &mut NoIo),
            Err(ExecError::Runtime(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_runtime_returns_before_stubborn_group_dies() {
        use std::os::unix::process::CommandExt;
        use std::time::{Duration, Instant};

        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 5"])
            .process_group(0)
            .spawn()
            .unwrap();
        // Let the shell install its trap
        std::thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        kill_runtime(child.id());
        assert!(start.elapsed() < Duration::from_millis(100));

        // The reaper still gets it with SIGKILL
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
