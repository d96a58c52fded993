//! Events delivered from the scanner's worker threads to the presentation
//! context.
//!
//! Detection, status and preview events come from the acquisition loop;
//! resolution events come from the lookup dispatcher once a detected code
//! has been resolved against the product store. All of them travel over one
//! ordered [`event_channel`].

mod channel;

pub use channel::{event_channel, EventReceiver, EventSender};

use crate::decode::Annotated;
use crate::lookup::Resolution;
use crate::session::DetectionEvent;
use serde::Serialize;
use std::fmt;

/// Externally observable state of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopStatus {
    Starting,
    Running,
    ErrorBackoff,
    Stopped,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopStatus::Starting => "starting",
            LoopStatus::Running => "running",
            LoopStatus::ErrorBackoff => "error-backoff",
            LoopStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Running counters for one acquisition session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub frames_read: u64,
    pub read_failures: u64,
    pub codes_detected: u64,
}

/// A loop state change, with a human-readable reason.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub status: LoopStatus,
    pub message: String,
    /// The loop stopped on its own and needs an explicit restart.
    pub fatal: bool,
    pub session: u64,
    pub stats: LoopStats,
}

/// A display copy of a frame that produced new codes.
#[derive(Debug, Clone)]
pub struct FramePreview {
    pub session: u64,
    pub sequence: u64,
    pub annotated: Annotated,
}

/// Everything the presentation context can receive.
#[derive(Debug, Clone)]
pub enum ScannerEvent {
    Detection(DetectionEvent),
    Status(StatusEvent),
    Resolution(Resolution),
    /// Only sent when previews are enabled in the loop config.
    Preview(FramePreview),
}

impl ScannerEvent {
    /// Short event kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScannerEvent::Detection(_) => "detection",
            ScannerEvent::Status(_) => "status",
            ScannerEvent::Resolution(_) => "resolution",
            ScannerEvent::Preview(_) => "preview",
        }
    }
}
