//! Scripted interpreter for tests
//!
//! Understands a tiny line language, one statement per line:
//!
//! ```text
//! print Hello {name}     stdout line, {var} substituted
//! write Name:            stdout without newline
//! eprint oops            stderr line
//! input name Your name?  read a line into `name`, optional prompt
//! repeat 60 same         print the same line n times
//! sleep 50               milliseconds
//! file out.txt data      write a file into the working directory
//! fail boom              raise a runtime error
//! ```
//!
//! `import` and `from` lines are accepted and ignored. Unknown statements are
//! syntax errors; indented lines are indentation
//! errors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use parking_lot::Mutex;

use crate::interpreter::{
    ExecError, HostIoError, Interpreter, InterpreterFactory, InterpreterIo, RuntimeInfo,
    SyntaxErrorInfo,
};

#[derive(Debug, Default)]
struct ProbeState {
    runs: Vec<String>,
    installs: Vec<String>,
    loads: usize,
    fail_load: bool,
}

/// Shared view into every interpreter a factory has built
#[derive(Debug, Clone, Default)]
pub struct ScriptProbe {
    inner: Arc<Mutex<ProbeState>>,
}

impl ScriptProbe {
    pub fn runs(&self) -> Vec<String> {
        self.inner.lock().runs.clone()
    }

    pub fn installs(&self) -> Vec<String> {
        self.inner.lock().installs.clone()
    }

    pub fn loads(&self) -> usize {
        self.inner.lock().loads
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.inner.lock().fail_load = fail;
    }

    pub fn interpreter(&self, work_dir: impl Into<PathBuf>) -> ScriptedInterpreter {
        ScriptedInterpreter {
            probe: self.clone(),
            work_dir: work_dir.into(),
            vars: HashMap::new(),
        }
    }

    pub fn factory(&self, work_dir: impl Into<PathBuf>) -> InterpreterFactory {
        let probe = self.clone();
        let work_dir = work_dir.into();
        Box::new(move || Box::new(probe.interpreter(work_dir.clone())) as Box<dyn Interpreter>)
    }
}

enum Stmt {
    Print(String),
    Write(String),
    Eprint(String),
    Input { var: String, prompt: Option<String> },
    Repeat(usize, String),
    Sleep(u64),
    File(String, String),
    Fail(String),
}

pub struct ScriptedInterpreter {
    probe: ScriptProbe,
    work_dir: PathBuf,
    /// Persists across runs like a global namespace
    vars: HashMap<String, String>,
}

impl ScriptedInterpreter {
    fn parse(source: &str) -> Result<Vec<Stmt>, SyntaxErrorInfo> {
        let mut program = Vec::new();
        for (index, raw) in source.lines().enumerate() {
            let lineno = index as u32 + 1;
            if raw.trim().is_empty() || raw.trim_start().starts_with('#') {
                continue;
            }
            // Imports resolve to nothing; package detection only reads them
            if raw.starts_with("import ") || raw.starts_with("from ") {
                continue;
            }
            if raw.starts_with(' ') || raw.starts_with('\t') {
                return Err(SyntaxErrorInfo {
                    kind: "IndentationError".into(),
                    lineno: Some(lineno),
                    offset: Some(1),
                    msg: "unexpected indent".into(),
                    text: Some(raw.to_string()),
                });
            }
            let (word, rest) = raw.split_once(' ').unwrap_or((raw, ""));
            let stmt = match word {
                "print" => Stmt::Print(rest.to_string()),
                "write" => Stmt::Write(rest.to_string()),
                "eprint" => Stmt::Eprint(rest.to_string()),
                "input" => {
                    let (var, prompt) = rest.split_once(' ').unwrap_or((rest, ""));
                    Stmt::Input {
                        var: var.to_string(),
                        prompt: (!prompt.is_empty()).then(|| prompt.to_string()),
                    }
                }
                "repeat" => {
                    let (n, text) = rest.split_once(' ').unwrap_or((rest, ""));
                    match n.parse() {
                        Ok(n) => Stmt::Repeat(n, text.to_string()),
                        Err(_) => return Err(invalid_syntax(lineno, raw)),
                    }
                }
                "sleep" => match rest.parse() {
                    Ok(ms) => Stmt::Sleep(ms),
                    Err(_) => return Err(invalid_syntax(lineno, raw)),
                },
                "file" => {
                    let (name, text) = rest.split_once(' ').unwrap_or((rest, ""));
                    Stmt::File(name.to_string(), text.to_string())
                }
                "fail" => Stmt::Fail(rest.to_string()),
                _ => return Err(invalid_syntax(lineno, raw)),
            };
            program.push(stmt);
        }
        Ok(program)
    }

    fn expand(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (name, value) in &self.vars {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}

fn invalid_syntax(lineno: u32, text: &str) -> SyntaxErrorInfo {
    SyntaxErrorInfo {
        kind: "SyntaxError".into(),
        lineno: Some(lineno),
        offset: Some(1),
        msg: "invalid syntax".into(),
        text: Some(text.to_string()),
    }
}

fn io_error(e: HostIoError) -> ExecError {
    match e {
        HostIoError::Terminated => ExecError::Terminated,
        HostIoError::Input(reason) => ExecError::Runtime(format!("EOFError: {}\n", reason)),
    }
}

impl Interpreter for ScriptedInterpreter {
    fn load(&mut self, offline: bool) -> anyhow::Result<RuntimeInfo> {
        let mut state = self.probe.inner.lock();
        state.loads += 1;
        if state.fail_load {
            bail!("runtime download failed");
        }
        Ok(RuntimeInfo {
            name: "Scripted".into(),
            version: "1.0".into(),
            package_manager: !offline,
        })
    }

    fn run(&mut self, source: &str, io: &mut dyn InterpreterIo) -> Result<(), ExecError> {
        self.probe.inner.lock().runs.push(source.to_string());
        let program = Self::parse(source).map_err(|info| ExecError::Syntax {
            rendered: format!("{}: {}\n", info.kind, info.msg),
            info,
        })?;

        for stmt in program {
            match stmt {
                Stmt::Print(text) => io.write_stdout(&format!("{}\n", self.expand(&text))),
                Stmt::Write(text) => io.write_stdout(&self.expand(&text)),
                Stmt::Eprint(text) => io.write_stderr(&format!("{}\n", self.expand(&text))),
                Stmt::Input { var, prompt } => {
                    let line = io.read_line(prompt.as_deref()).map_err(io_error)?;
                    self.vars.insert(var, line);
                    Ok(())
                }
                Stmt::Repeat(n, text) => {
                    for _ in 0..n {
                        io.write_stdout(&format!("{}\n", text)).map_err(io_error)?;
                    }
                    Ok(())
                }
                Stmt::Sleep(ms) => {
                    std::thread::sleep(Duration::from_millis(ms));
                    Ok(())
                }
                Stmt::File(name, text) => {
                    std::fs::write(self.work_dir.join(name), text)
                        .map_err(|e| ExecError::Runtime(format!("OSError: {}\n", e)))?;
                    Ok(())
                }
                Stmt::Fail(text) => {
                    return Err(ExecError::Runtime(format!(
                        "Traceback (most recent call last):\nRuntimeError: {}\n",
                        text
                    )))
                }
            }
            .map_err(io_error)?;
        }
        Ok(())
    }

    fn check_syntax(&mut self, source: &str) -> Result<(), ExecError> {
        if source.contains('\0') {
            return Err(ExecError::Runtime(
                "ValueError: source code string cannot contain null bytes".into(),
            ));
        }
        Self::parse(source).map(|_| ()).map_err(|info| ExecError::Syntax {
            rendered: String::new(),
            info,
        })
    }

    fn install(&mut self, package: &str) -> anyhow::Result<()> {
        if package.starts_with("bad") {
            bail!("No matching distribution found for {}", package);
        }
        self.probe.inner.lock().installs.push(package.to_string());
        Ok(())
    }
}
