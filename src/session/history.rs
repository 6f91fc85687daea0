use crate::types::{Message, Role};

use super::Session;

impl Session {
    /// Append a message and enforce the retention policy.
    pub(crate) fn push_message(&mut self, message: Message, max_history: usize) {
        self.history.push(message);
        trim_history(&mut self.history, max_history);
    }
}

/// Bounded-retention trim, applied once the history exceeds twice
/// `max_history` (two turns of slack, so not every append trims).
///
/// Survivors are every system message plus everything in the trailing
/// `2 * max_history` window of the full list, union by position, in
/// original insertion order. A system message inside the window is kept
/// once. System messages are never dropped, so a system-heavy history can
/// exceed the window size.
pub(crate) fn trim_history(history: &mut Vec<Message>, max_history: usize) {
    let window = max_history * 2;
    if history.len() <= window {
        return;
    }
    let window_start = history.len() - window;
    let mut index = 0;
    history.retain(|message| {
        let keep = message.role == Role::System || index >= window_start;
        index += 1;
        keep
    });
}
