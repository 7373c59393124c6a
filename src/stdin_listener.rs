//! Terminal input for the command-line front end.
//!
//! Lines typed at the terminal are read on a background thread and handed to
//! the event loop through an `async_channel`, so the loop can keep pumping
//! host events while nobody is typing.
//!
//! A line that is exactly `:stop` is a stop request; everything else is an
//! answer for the program's pending input request.

use std::io::BufRead;

use crate::logging;

/// Typed in place of an answer to stop the running program
pub const STOP_COMMAND: &str = ":stop";

/// Something typed at the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    /// An answer for a pending input request, without its line ending
    Line(String),
    /// Stop the running program
    Stop,
}

impl TerminalCommand {
    pub fn parse(raw: &str) -> Self {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.trim() == STOP_COMMAND {
            TerminalCommand::Stop
        } else {
            TerminalCommand::Line(line.to_string())
        }
    }
}

/// Start a thread that reads terminal lines from stdin.
///
/// Uses a bounded channel of 100 entries; terminal input arrives far slower
/// than that. The thread exits when stdin closes or the receiver is dropped.
pub fn start_stdin_listener() -> async_channel::Receiver<TerminalCommand> {
    let (tx, rx) = async_channel::bounded(100);

    let spawned = std::thread::Builder::new()
        .name("stdin-listener".into())
        .spawn(move || {
            logging::log("STDIN", "Terminal listener started");
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        let command = TerminalCommand::parse(&line);
                        tracing::debug!(?command, "Terminal command");
                        // send_blocking since this is a plain thread
                        if tx.send_blocking(command).is_err() {
                            logging::log("STDIN", "Command channel closed, exiting");
                            break;
                        }
                    }
                    Err(e) => {
                        logging::log("STDIN", &format!("Error reading stdin: {}", e));
                        break;
                    }
                }
            }
            logging::log("STDIN", "Terminal listener exiting");
        });

    if let Err(e) = spawned {
        tracing::error!(error = %e, "Failed to start terminal listener");
    }
    rx
}
