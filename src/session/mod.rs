//! Session bookkeeping.
//!
//! Tracks which payloads have been emitted in the current session so that
//! each code produces exactly one detection event until the session is
//! restarted.

mod registry;
mod state;

pub use registry::{DetectionEvent, SessionRegistry};
pub use state::SessionState;
