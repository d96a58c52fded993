//! Per-session scanner state.

use std::collections::HashSet;

/// Everything the scanner remembers about the current session.
///
/// Owned by the acquisition loop. Other contexts only ever see copies
/// carried on events. Restarting a session replaces the value wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Identifies the session; bumped on every restart.
    pub generation: u64,
    /// Payloads already emitted this session.
    pub seen_payloads: HashSet<String>,
    /// Most recently emitted payload.
    pub last_emitted_payload: Option<String>,
    /// Read failures since the last successful read.
    pub consecutive_read_failures: u32,
    /// Not-found codes the operator has already been prompted about.
    pub asked_not_found: HashSet<String>,
}

impl SessionState {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            ..Default::default()
        }
    }

    /// A fresh, empty state for the following session.
    pub fn next(&self) -> Self {
        Self::new(self.generation + 1)
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.seen_payloads.is_empty()
            && self.last_emitted_payload.is_none()
            && self.consecutive_read_failures == 0
            && self.asked_not_found.is_empty()
    }

    pub fn has_seen(&self, payload: &str) -> bool {
        self.seen_payloads.contains(payload)
    }
}
