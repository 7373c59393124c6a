//! Host driven directly on the controller's thread (compatibility mode)

use tracing::warn;

use super::{HostTransport, Outbox};
use crate::host::Host;
use crate::protocol::HostMessage;

/// Dispatches synchronously. A program waiting on a modal read blocks the
/// caller, and a program that never ends can't be interrupted.
pub struct InlineHost {
    host: Host,
    outbox: Outbox,
}

impl InlineHost {
    pub fn new(host: Host, outbox: Outbox) -> Self {
        Self { host, outbox }
    }
}

impl HostTransport for InlineHost {
    fn post(&mut self, message: HostMessage) {
        if !self.outbox.is_alive() {
            warn!(message_type = message.kind(), "Post to retired inline host dropped");
            return;
        }
        self.host.dispatch(message);
    }

    fn terminate(&mut self) {
        warn!(
            generation = self.outbox.generation(),
            "Inline host cannot interrupt a running program; retiring it"
        );
        self.outbox.kill();
    }

    fn generation(&self) -> u64 {
        self.outbox.generation()
    }

    fn can_cancel(&self) -> bool {
        false
    }
}
