use serde::{Deserialize, Serialize};

/// The local focus session. One per running client; reset, never destroyed.
///
/// `running` implies `active_subject_id.is_some()`; the timer state machine is
/// the only writer and keeps that true.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub active_subject_id: Option<String>,
    pub elapsed_seconds: u64,
    pub running: bool,
}

impl FocusSession {
    /// Restored sessions are always inert: totals and elapsed survive, the
    /// timer does not resume on its own.
    pub fn into_inert(mut self) -> Self {
        self.running = false;
        self
    }
}
