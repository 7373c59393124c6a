//! How host messages reach a host and how replies come back
//!
//! Replies always land on the controller's event queue, tagged with the
//! generation of the host that produced them. A host generation that has
//! been terminated can no longer send anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use tracing::trace;

use crate::controller::ControllerEvent;
use crate::interpreter::HostIoError;
use crate::protocol::{ControllerMessage, HostMessage};

mod inline;
mod worker;

pub use inline::InlineHost;
pub use worker::WorkerHandle;

/// Host-side sender of controller-bound messages
#[derive(Debug, Clone)]
pub struct Outbox {
    generation: u64,
    alive: Arc<AtomicBool>,
    sender: Sender<ControllerEvent>,
}

impl Outbox {
    pub fn new(generation: u64, sender: Sender<ControllerEvent>) -> Self {
        Self {
            generation,
            alive: Arc::new(AtomicBool::new(true)),
            sender,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn send(&self, message: ControllerMessage) -> Result<(), HostIoError> {
        if !self.is_alive() {
            return Err(HostIoError::Terminated);
        }
        trace!(
            generation = self.generation,
            message_type = message.kind(),
            "Host reply"
        );
        self.sender
            .send(ControllerEvent::Host {
                generation: self.generation,
                message,
            })
            .map_err(|_| HostIoError::Terminated)
    }

    /// Mark this generation dead; every later send fails
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Controller-side handle to a running host
pub trait HostTransport {
    fn post(&mut self, message: HostMessage);

    /// Tear the host down. Worker transports hard-kill; inline ones can't.
    fn terminate(&mut self);

    fn generation(&self) -> u64;

    /// Whether `terminate` actually interrupts a running program
    fn can_cancel(&self) -> bool;
}
