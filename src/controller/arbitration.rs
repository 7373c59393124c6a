//! Where the answer to an INPUT_REQUEST comes from

use super::auto_input::AutoInputQueue;

const ENTER_PHRASES: [&str; 3] = ["press enter", "continue", "pause"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputStrategy {
    /// Next value from the auto-input queue
    Auto(String),
    /// Ask the AI resolver in the background
    Ai,
    /// Wait for the person at the keyboard
    Manual,
}

/// Context for one decision
#[derive(Debug, Clone, Copy)]
pub struct ArbitrationContext {
    pub elevated: bool,
    pub resolver_available: bool,
    /// Started by code rather than by a person pressing run
    pub programmatic: bool,
}

pub fn choose(queue: &mut AutoInputQueue, ctx: ArbitrationContext) -> InputStrategy {
    if let Some(value) = queue.pop() {
        return InputStrategy::Auto(value);
    }
    if ctx.elevated && ctx.resolver_available && ctx.programmatic {
        return InputStrategy::Ai;
    }
    InputStrategy::Manual
}

/// Best-effort guess that the program only wants Enter pressed.
///
/// Looks for a "press enter / continue / pause" phrase in the prompt or the
/// latest output. A heuristic, nothing more.
pub fn wants_enter(prompt: Option<&str>, last_output: Option<&str>) -> bool {
    [prompt, last_output].into_iter().flatten().any(|text| {
        let lower = text.to_lowercase();
        ENTER_PHRASES.iter().any(|phrase| lower.contains(phrase))
    })
}
