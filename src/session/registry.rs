//! Session-level deduplication of decoded codes.

use super::SessionState;
use crate::decode::DecodedCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A code seen for the first time in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub code: DecodedCode,
    pub timestamp: DateTime<Utc>,
    /// Session generation the code was admitted in.
    pub session: u64,
}

impl DetectionEvent {
    pub fn payload(&self) -> &str {
        &self.code.payload
    }
}

/// Filters per-frame candidates against session history.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionRegistry;

impl SessionRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Admits candidates not yet seen in this session.
    ///
    /// Each new payload is recorded as seen and becomes the last emitted
    /// payload. Already-seen payloads are dropped without an event. Events
    /// come back in candidate order.
    pub fn admit(
        &self,
        candidates: Vec<DecodedCode>,
        state: &mut SessionState,
    ) -> Vec<DetectionEvent> {
        let mut events = Vec::new();

        for code in candidates {
            if state.has_seen(&code.payload) {
                continue;
            }
            state.seen_payloads.insert(code.payload.clone());
            state.last_emitted_payload = Some(code.payload.clone());

            tracing::info!(
                payload = %code.payload,
                symbology = %code.symbology,
                session = state.generation,
                "New code detected"
            );

            events.push(DetectionEvent {
                code,
                timestamp: Utc::now(),
                session: state.generation,
            });
        }

        events
    }
}
