use std::fmt;

/// Controller-side view of the host and the current session.
///
/// A RUN issued while busy goes
/// `Executing → Terminating → Reinitializing → Ready → Executing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Initializing,
    Ready,
    Executing,
    AwaitingInput,
    Terminating,
    Reinitializing,
    /// INIT failed; needs `start` or a new run to recreate the host
    Failed,
}

impl Lifecycle {
    /// A session is running or blocked on input
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Executing | Self::AwaitingInput)
    }

    /// A host exists and will eventually process posted messages
    pub fn has_host(self) -> bool {
        matches!(
            self,
            Self::Initializing
                | Self::Ready
                | Self::Executing
                | Self::AwaitingInput
                | Self::Reinitializing
        )
    }

    pub fn is_loading(self) -> bool {
        matches!(self, Self::Initializing | Self::Reinitializing)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::AwaitingInput => "awaiting input",
            Self::Terminating => "terminating",
            Self::Reinitializing => "reinitializing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
