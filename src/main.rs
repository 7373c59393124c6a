use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use exec_bridge::config::{load_config, Config};
use exec_bridge::controller::{
    Controller, ControllerDelegate, Lifecycle, LogEntry, LogKind, RunOutcome, RunStatus,
};
use exec_bridge::host::ModalPrompt;
use exec_bridge::interpreter::{Interpreter, InterpreterFactory, ProcessInterpreter};
use exec_bridge::logging;
use exec_bridge::packages::PackageRegistry;
use exec_bridge::protocol::LintReport;
use exec_bridge::stdin_listener::{start_stdin_listener, TerminalCommand, STOP_COMMAND};

const PUMP_INTERVAL: Duration = Duration::from_millis(50);
const LINT_LIMIT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "exec-bridge", version, about = "Run programs with interactive stdin")]
struct Cli {
    /// Config file (default: ~/.exec-bridge/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program, answering its input prompts from the terminal
    Run {
        file: PathBuf,
        /// Pre-supplied answer, consumed in order before asking (repeatable)
        #[arg(long = "input")]
        inputs: Vec<String>,
        /// Enable the safety monitor, AI input and package installs
        #[arg(long)]
        elevated: bool,
        /// Run on the main thread without the shared input channel
        #[arg(long)]
        fallback: bool,
        /// Skip the package manager
        #[arg(long)]
        offline: bool,
        /// Install missing packages instead of running (elevated only)
        #[arg(long = "install-missing")]
        install_missing: bool,
    },
    /// Check a program for syntax errors without running it
    Lint { file: PathBuf },
}

/// Prints log entries as they arrive
struct TerminalDelegate {
    install_missing: bool,
    lint: Rc<RefCell<Option<LintReport>>>,
}

impl ControllerDelegate for TerminalDelegate {
    fn on_log(&mut self, entry: &LogEntry) {
        match entry.kind {
            LogKind::Stdout => {
                print!("{}", entry.content);
                let _ = io::stdout().flush();
            }
            LogKind::Stderr | LogKind::System => eprint!("{}", entry.content),
            // The terminal already shows what was typed
            LogKind::InputEcho => {}
        }
    }

    fn on_input_requested(&mut self, prompt: Option<&str>) {
        if prompt.is_none() {
            eprint!("> ");
        }
        let _ = io::stderr().flush();
    }

    fn on_syntax_error(&mut self, lineno: u32, message: &str, kind: &str) {
        eprintln!("{} on line {}: {}", kind, lineno, message);
    }

    fn on_lint_result(&mut self, report: &LintReport) {
        *self.lint.borrow_mut() = Some(report.clone());
    }

    fn confirm_install(&mut self, missing: &[String]) -> bool {
        if !self.install_missing {
            eprintln!(
                "Missing packages: {} (pass --install-missing to install them)",
                missing.join(", ")
            );
        }
        self.install_missing
    }
}

/// Blocking terminal read for fallback mode
struct TerminalModal;

impl ModalPrompt for TerminalModal {
    fn prompt(&mut self, message: &str) -> Option<String> {
        eprint!("[{}] ", message.trim_end());
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
        }
    }
}

fn interpreter_factory(config: &Config) -> InterpreterFactory {
    let interpreter = config.get_interpreter();
    let work_dir = config.get_work_dir();
    Box::new(move || {
        Box::new(ProcessInterpreter::new(&interpreter, work_dir.clone())) as Box<dyn Interpreter>
    })
}

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn build_controller(config: Config, delegate: TerminalDelegate) -> Result<Controller> {
    let packages = PackageRegistry::load(config.get_packages_file());
    let shared_memory = config.get_shared_memory();
    let factory = interpreter_factory(&config);
    let mut controller = Controller::new(config, factory)
        .context("Failed to create controller")?
        .with_packages(packages)
        .with_delegate(Box::new(delegate));
    if !shared_memory {
        controller = controller.with_modal_factory(Box::new(|| {
            Box::new(TerminalModal) as Box<dyn ModalPrompt>
        }));
    }
    Ok(controller)
}

fn run_file(
    config: Config,
    file: &Path,
    inputs: Vec<String>,
    install_missing: bool,
) -> Result<ExitCode> {
    let source = read_source(file)?;
    let fallback = !config.get_shared_memory();
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main.py".to_string());

    let delegate = TerminalDelegate {
        install_missing,
        lint: Rc::default(),
    };
    let mut controller = build_controller(config, delegate)?;
    controller.files_mut().upsert(name.clone(), source.clone());
    controller.files_mut().set_current(Some(name));

    // Fallback mode reads stdin itself through the modal
    let commands = (!fallback).then(start_stdin_listener);
    if commands.is_some() {
        eprintln!("(type {} to stop the program)", STOP_COMMAND);
    }

    let outcome: Rc<RefCell<Option<RunOutcome>>> = Rc::default();
    let sink = outcome.clone();
    controller
        .run_programmatic(source, inputs, move |o| *sink.borrow_mut() = Some(o))
        .context("Failed to start run")?;

    while outcome.borrow().is_none() {
        controller.pump(PUMP_INTERVAL);
        let Some(commands) = &commands else {
            continue;
        };
        while let Ok(command) = commands.try_recv() {
            match command {
                TerminalCommand::Stop => controller.stop().context("Failed to stop")?,
                TerminalCommand::Line(line) if controller.is_waiting_for_input() => {
                    // Rejections are already in the log; the program keeps waiting
                    let _ = controller.submit_input(&line);
                }
                TerminalCommand::Line(_) => {
                    warn!("Input typed while the program is not waiting for it, ignored");
                }
            }
        }
    }

    let Some(outcome) = outcome.borrow_mut().take() else {
        return Ok(ExitCode::FAILURE);
    };
    info!(session_id = outcome.session_id, status = ?outcome.status, "Run complete");
    Ok(match outcome.status {
        RunStatus::Finished if outcome.last_error.is_none() => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn lint_file(config: Config, file: &Path) -> Result<ExitCode> {
    let source = read_source(file)?;
    let lint: Rc<RefCell<Option<LintReport>>> = Rc::default();
    let delegate = TerminalDelegate {
        install_missing: false,
        lint: lint.clone(),
    };
    let mut controller = build_controller(config, delegate)?;
    controller.start().context("Failed to start runtime")?;

    let ready = controller.pump_until(LINT_LIMIT, |c| {
        matches!(c.lifecycle(), Lifecycle::Ready | Lifecycle::Failed)
    });
    if !ready || controller.lifecycle() == Lifecycle::Failed {
        anyhow::bail!("runtime did not start");
    }

    controller.lint(source).context("Failed to send lint request")?;
    if !controller.pump_until(LINT_LIMIT, |_| lint.borrow().is_some()) {
        anyhow::bail!("no lint result within {:?}", LINT_LIMIT);
    }

    let Some(report) = lint.borrow_mut().take() else {
        return Ok(ExitCode::FAILURE);
    };
    println!("{}", report.to_json());
    Ok(if report.error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn main() -> ExitCode {
    let _guard = logging::init();
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref());

    let result = match cli.command {
        Command::Run {
            file,
            inputs,
            elevated,
            fallback,
            offline,
            install_missing,
        } => {
            if elevated {
                config.elevated = Some(true);
            }
            if fallback {
                config.shared_memory = Some(false);
            }
            if offline {
                config.offline = Some(true);
            }
            run_file(config, &file, inputs, install_missing)
        }
        Command::Lint { file } => lint_file(config, &file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("exec-bridge: {:#}", e);
            for line in logging::get_last_logs(5).iter().rev() {
                tracing::debug!(recent = %line, "Recent activity");
            }
            ExitCode::FAILURE
        }
    }
}
