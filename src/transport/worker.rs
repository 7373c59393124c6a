//! Host running on its own OS thread

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::{HostTransport, Outbox};
use crate::channel::SharedChannel;
use crate::error::BridgeError;
use crate::host::Host;
use crate::interpreter::Terminator;
use crate::logging;
use crate::protocol::HostMessage;

/// One host generation on a dedicated thread.
///
/// Dropping the handle terminates the host.
pub struct WorkerHandle {
    generation: u64,
    commands: Option<Sender<HostMessage>>,
    outbox: Outbox,
    channel: SharedChannel,
    terminator: Option<Terminator>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn(host: Host, outbox: Outbox, channel: SharedChannel) -> Result<Self, BridgeError> {
        let generation = outbox.generation();
        let terminator = host.terminator();
        let (tx, rx) = mpsc::channel::<HostMessage>();

        let thread = thread::Builder::new()
            .name(format!("exec-host-{}", generation))
            .spawn(move || {
                let mut host = host;
                while let Ok(message) = rx.recv() {
                    host.dispatch(message);
                }
                debug!(generation, "Host thread exiting");
            })
            .map_err(|e| BridgeError::Spawn(e.to_string()))?;

        logging::log("HOST", &format!("Spawned host generation {}", generation));
        Ok(Self {
            generation,
            commands: Some(tx),
            outbox,
            channel,
            terminator,
            thread: Some(thread),
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.commands.is_none()
    }
}

impl HostTransport for WorkerHandle {
    fn post(&mut self, message: HostMessage) {
        let Some(commands) = &self.commands else {
            warn!(
                generation = self.generation,
                message_type = message.kind(),
                "Post to terminated host dropped"
            );
            return;
        };
        let kind = message.kind();
        if commands.send(message).is_err() {
            warn!(
                generation = self.generation,
                message_type = kind,
                "Host thread is gone, message dropped"
            );
        }
    }

    fn terminate(&mut self) {
        if self.commands.is_none() {
            return;
        }
        self.outbox.kill();
        self.channel.abandon_waiters();
        if let Some(terminator) = &self.terminator {
            terminator.terminate();
        }
        self.commands = None;
        // Detached: a host stuck in pure computation is left to finish on its own
        let finished = self.thread.take().map(|t| t.is_finished()).unwrap_or(true);
        logging::log(
            "HOST",
            &format!(
                "Terminated host generation {} (thread finished: {})",
                self.generation, finished
            ),
        );
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn can_cancel(&self) -> bool {
        true
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
