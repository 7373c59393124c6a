//! Output and input plumbing handed to the interpreter for one run

use crate::interpreter::{HostIoError, InterpreterIo};
use crate::protocol::ControllerMessage;
use crate::transport::Outbox;

use super::input::InputSource;

/// Line-buffers stdout into OUTPUT messages and routes input reads to the
/// host's [`InputSource`].
///
/// Pending stdout is always flushed before stderr text and before an input
/// request, so a prompt reaches the controller ahead of its INPUT_REQUEST.
pub struct HostIo<'a> {
    outbox: &'a Outbox,
    input: &'a mut dyn InputSource,
    pending: String,
}

impl<'a> HostIo<'a> {
    pub fn new(outbox: &'a Outbox, input: &'a mut dyn InputSource) -> Self {
        Self {
            outbox,
            input,
            pending: String::new(),
        }
    }
}

impl InterpreterIo for HostIo<'_> {
    fn write_stdout(&mut self, text: &str) -> Result<(), HostIoError> {
        self.pending.push_str(text);
        while let Some(pos) = self.pending.find('\n') {
            let rest = self.pending.split_off(pos + 1);
            let line = std::mem::replace(&mut self.pending, rest);
            self.outbox.send(ControllerMessage::stdout(line))?;
        }
        Ok(())
    }

    fn write_stderr(&mut self, text: &str) -> Result<(), HostIoError> {
        self.flush()?;
        if text.is_empty() {
            return Ok(());
        }
        self.outbox.send(ControllerMessage::stderr(text))
    }

    fn flush(&mut self) -> Result<(), HostIoError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.pending);
        self.outbox.send(ControllerMessage::stdout(chunk))
    }

    fn read_line(&mut self, prompt: Option<&str>) -> Result<String, HostIoError> {
        self.flush()?;
        self.input.read_input(prompt, self.outbox)
    }
}
