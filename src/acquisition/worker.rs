//! The acquisition loop state machine.
//!
//! ```text
//! Starting ──open ok──▶ Running ◀──read ok── ErrorBackoff
//!    │                     │  └──read failed──────▲
//!    │ open failed         │ cancelled / failures exhausted
//!    ▼                     ▼
//! Stopped ◀────────────────┘
//! ```
//!
//! The frame source is held only between a successful open and the move to
//! `Stopped`, and is released exactly once on that transition whichever
//! path leads there, including drop.

use crate::capture::{CaptureConfig, FrameSource, ScannerConfig};
use crate::decode::{annotate, MultiTransformDecoder};
use crate::events::{
    EventSender, FramePreview, LoopStats, LoopStatus, ScannerEvent, StatusEvent,
};
use crate::session::{SessionRegistry, SessionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Timing and failure tolerance of the loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Pause after every successful iteration.
    pub throttle: Duration,
    /// Pause after a failed read.
    pub read_backoff: Duration,
    /// Consecutive failed reads tolerated; one more stops the loop.
    pub max_read_errors: u32,
    /// Stop after this many frames (0 for no limit).
    pub frame_limit: u64,
    /// Send an annotated preview of every frame that produced new codes.
    pub preview: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(50),
            read_backoff: Duration::from_millis(100),
            max_read_errors: 5,
            frame_limit: 0,
            preview: false,
        }
    }
}

impl LoopConfig {
    pub fn from_scanner(scanner: &ScannerConfig, frame_limit: u64) -> Self {
        Self {
            throttle: scanner.throttle(),
            read_backoff: scanner.read_backoff(),
            max_read_errors: scanner.max_read_errors,
            frame_limit,
            preview: false,
        }
    }
}

/// Status cell shared with a controller that wants to poll the loop.
pub type SharedStatus = Arc<Mutex<LoopStatus>>;

/// One acquisition session over a borrowed frame source.
pub struct AcquisitionLoop<'a> {
    source: &'a mut dyn FrameSource,
    holding: bool,
    decoder: &'a MultiTransformDecoder,
    registry: SessionRegistry,
    capture: CaptureConfig,
    config: LoopConfig,
    events: EventSender,
    state: SessionState,
    status: LoopStatus,
    shared_status: Option<SharedStatus>,
    stats: LoopStats,
}

impl<'a> AcquisitionLoop<'a> {
    pub fn new(
        source: &'a mut dyn FrameSource,
        decoder: &'a MultiTransformDecoder,
        capture: CaptureConfig,
        config: LoopConfig,
        events: EventSender,
        state: SessionState,
    ) -> Self {
        Self {
            source,
            holding: false,
            decoder,
            registry: SessionRegistry::new(),
            capture,
            config,
            events,
            state,
            status: LoopStatus::Starting,
            shared_status: None,
            stats: LoopStats::default(),
        }
    }

    /// Mirrors every status change into `cell`.
    pub fn with_shared_status(mut self, cell: SharedStatus) -> Self {
        self.shared_status = Some(cell);
        self
    }

    pub fn status(&self) -> LoopStatus {
        self.status
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    fn emit_status(&mut self, status: LoopStatus, message: impl Into<String>, fatal: bool) {
        self.status = status;
        if let Some(cell) = &self.shared_status {
            if let Ok(mut shared) = cell.lock() {
                *shared = status;
            }
        }

        let message = message.into();
        if fatal {
            tracing::error!(%status, session = self.state.generation, "{}", message);
        } else {
            tracing::info!(%status, session = self.state.generation, "{}", message);
        }

        self.events.send(ScannerEvent::Status(StatusEvent {
            status,
            message,
            fatal,
            session: self.state.generation,
            stats: self.stats,
        }));
    }

    /// Opens the frame source. A failed open is final for this session.
    pub fn start(&mut self) -> LoopStatus {
        if self.status != LoopStatus::Starting {
            return self.status;
        }
        self.emit_status(LoopStatus::Starting, "Opening capture device", false);

        match self.source.open(&self.capture) {
            Ok(()) => {
                self.holding = true;
                self.emit_status(
                    LoopStatus::Running,
                    "Capture started, scanning for codes",
                    false,
                );
            }
            Err(e) => {
                self.emit_status(
                    LoopStatus::Stopped,
                    format!("Unable to open capture device: {}", e),
                    true,
                );
            }
        }
        self.status
    }

    /// Runs one iteration: read, decode, admit, emit, pause.
    ///
    /// Does nothing unless the loop is running or backing off.
    pub fn step(&mut self) -> LoopStatus {
        if !matches!(self.status, LoopStatus::Running | LoopStatus::ErrorBackoff) {
            return self.status;
        }

        let frame = match self.source.read() {
            Ok(frame) => frame,
            Err(e) => {
                self.state.consecutive_read_failures += 1;
                self.stats.read_failures += 1;
                let failures = self.state.consecutive_read_failures;

                if failures > self.config.max_read_errors {
                    self.release();
                    self.emit_status(
                        LoopStatus::Stopped,
                        format!(
                            "Camera read failed {} times in a row ({}), restart the scanner",
                            failures, e
                        ),
                        true,
                    );
                    return self.status;
                }

                self.emit_status(
                    LoopStatus::ErrorBackoff,
                    format!(
                        "Frame read failed ({}/{}): {}",
                        failures, self.config.max_read_errors, e
                    ),
                    false,
                );
                pause(self.config.read_backoff);
                return self.status;
            }
        };

        if self.state.consecutive_read_failures > 0 {
            self.state.consecutive_read_failures = 0;
            self.emit_status(LoopStatus::Running, "Capture recovered", false);
        }
        self.stats.frames_read += 1;

        let frame = if self.capture.mirror {
            frame.mirrored()
        } else {
            frame
        };

        let decoded = self.decoder.decode(&frame);
        if !decoded.failures.is_empty() {
            tracing::debug!(
                sequence = frame.sequence(),
                failed_transforms = decoded.failures.len(),
                "Some transforms failed to decode"
            );
        }

        let preview_codes = self.config.preview.then(|| decoded.codes.clone());
        let detections = self.registry.admit(decoded.codes, &mut self.state);
        self.stats.codes_detected += detections.len() as u64;
        let any_new = !detections.is_empty();
        for detection in detections {
            self.events.send(ScannerEvent::Detection(detection));
        }

        if let (true, Some(codes)) = (any_new, preview_codes) {
            if let Some(annotated) = annotate(&frame, &codes) {
                self.events.send(ScannerEvent::Preview(FramePreview {
                    session: self.state.generation,
                    sequence: frame.sequence(),
                    annotated,
                }));
            }
        }

        if self.config.frame_limit > 0 && self.stats.frames_read >= self.config.frame_limit {
            self.shutdown(format!("Frame limit of {} reached", self.config.frame_limit));
            return self.status;
        }

        pause(self.config.throttle);
        self.status
    }

    /// Runs until cancelled or stopped by a fatal error.
    ///
    /// `cancel` is checked before every iteration. An iteration in progress
    /// always completes.
    pub fn run(&mut self, cancel: &AtomicBool) -> LoopStatus {
        self.start();

        while matches!(self.status, LoopStatus::Running | LoopStatus::ErrorBackoff) {
            if cancel.load(Ordering::Acquire) {
                self.shutdown("Capture stopped");
                break;
            }
            self.step();
        }

        tracing::debug!(
            session = self.state.generation,
            frames = self.stats.frames_read,
            failures = self.stats.read_failures,
            codes = self.stats.codes_detected,
            "Acquisition loop exited"
        );
        self.status
    }

    /// Releases the source and moves to `Stopped`. No-op once stopped.
    pub fn shutdown(&mut self, reason: impl Into<String>) {
        if self.status == LoopStatus::Stopped {
            return;
        }
        self.release();
        self.emit_status(LoopStatus::Stopped, reason, false);
    }

    fn release(&mut self) {
        if self.holding {
            self.source.release();
            self.holding = false;
        }
    }
}

impl Drop for AcquisitionLoop<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MockRead, MockSource};
    use crate::decode::{BoundingBox, DecodedCode, ScriptedReader, Symbology, Transform};
    use crate::events::{event_channel, EventReceiver};

    fn fast_config() -> LoopConfig {
        LoopConfig {
            throttle: Duration::ZERO,
            read_backoff: Duration::ZERO,
            max_read_errors: 5,
            frame_limit: 0,
            preview: false,
        }
    }

    fn capture() -> CaptureConfig {
        CaptureConfig::with_dimensions(16, 16)
    }

    fn decoder_seeing(payloads: &[&str]) -> MultiTransformDecoder {
        let codes = payloads
            .iter()
            .map(|p| DecodedCode::new(*p, Symbology::Ean13, BoundingBox::new(1, 1, 4, 4)))
            .collect();
        MultiTransformDecoder::new(ScriptedReader::new(vec![codes], Transform::ALL.len()))
    }

    fn statuses(rx: &EventReceiver) -> Vec<StatusEvent> {
        rx.drain()
            .into_iter()
            .filter_map(|e| match e {
                ScannerEvent::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_five_failures_then_success_keeps_running() {
        let mut source = MockSource::new();
        source.push_failures(5);
        source.push_read(MockRead::Frame);
        let counters = source.counters();
        let decoder = decoder_seeing(&[]);
        let (tx, rx) = event_channel(64);

        let mut acq = AcquisitionLoop::new(
            &mut source,
            &decoder,
            capture(),
            fast_config(),
            tx,
            SessionState::new(1),
        );
        assert_eq!(acq.start(), LoopStatus::Running);

        for _ in 0..5 {
            assert_eq!(acq.step(), LoopStatus::ErrorBackoff);
        }
        assert_eq!(acq.state().consecutive_read_failures, 5);

        assert_eq!(acq.step(), LoopStatus::Running);
        assert_eq!(acq.state().consecutive_read_failures, 0);
        assert_eq!(counters.releases(), 0);

        let last = statuses(&rx).pop().unwrap();
        assert_eq!(last.status, LoopStatus::Running);
        assert!(!last.fatal);
    }

    #[test]
    fn test_sixth_failure_stops_and_releases_once() {
        let mut source = MockSource::new();
        source.push_failures(6);
        let counters = source.counters();
        let decoder = decoder_seeing(&[]);
        let (tx, rx) = event_channel(64);

        {
            let mut acq = AcquisitionLoop::new(
                &mut source,
                &decoder,
                capture(),
                fast_config(),
                tx,
                SessionState::new(1),
            );
            let status = acq.run(&AtomicBool::new(false));

            assert_eq!(status, LoopStatus::Stopped);
            assert_eq!(acq.stats().read_failures, 6);
            assert_eq!(counters.releases(), 1);
        }

        assert_eq!(counters.releases(), 1);
        assert_eq!(counters.reads(), 6);

        let last = statuses(&rx).pop().unwrap();
        assert_eq!(last.status, LoopStatus::Stopped);
        assert!(last.fatal);
    }

    #[test]
    fn test_open_failure_is_not_retried() {
        let mut source = MockSource::new();
        source.fail_next_open("no camera");
        let counters = source.counters();
        let decoder = decoder_seeing(&["111"]);
        let (tx, rx) = event_channel(64);

        let mut acq = AcquisitionLoop::new(
            &mut source,
            &decoder,
            capture(),
            fast_config(),
            tx,
            SessionState::new(1),
        );
        assert_eq!(acq.run(&AtomicBool::new(false)), LoopStatus::Stopped);
        assert_eq!(acq.step(), LoopStatus::Stopped);
        drop(acq);

        assert_eq!(counters.opens(), 0);
        assert_eq!(counters.reads(), 0);
        assert_eq!(counters.releases(), 0);

        let events = statuses(&rx);
        assert_eq!(events.len(), 2);
        assert!(events[1].fatal);
        assert!(events[1].message.contains("no camera"));
    }

    #[test]
    fn test_code_emitted_once_per_session() {
        let mut source = MockSource::new();
        let decoder = decoder_seeing(&["111", "222"]);
        let (tx, rx) = event_channel(64);

        let mut acq = AcquisitionLoop::new(
            &mut source,
            &decoder,
            capture(),
            fast_config(),
            tx,
            SessionState::new(4),
        );
        acq.start();
        for _ in 0..3 {
            acq.step();
        }
        assert_eq!(acq.state().last_emitted_payload.as_deref(), Some("222"));
        drop(acq);

        let detections: Vec<_> = rx
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ScannerEvent::Detection(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].payload(), "111");
        assert_eq!(detections[1].payload(), "222");
        assert!(detections.iter().all(|d| d.session == 4));
    }

    #[test]
    fn test_cancel_before_first_read() {
        let mut source = MockSource::new();
        let counters = source.counters();
        let decoder = decoder_seeing(&[]);
        let (tx, _rx) = event_channel(64);

        let mut acq = AcquisitionLoop::new(
            &mut source,
            &decoder,
            capture(),
            fast_config(),
            tx,
            SessionState::new(1),
        );
        assert_eq!(acq.run(&AtomicBool::new(true)), LoopStatus::Stopped);
        drop(acq);

        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.reads(), 0);
        assert_eq!(counters.releases(), 1);
    }

    #[test]
    fn test_frame_limit_stops_loop() {
        let mut source = MockSource::new();
        let counters = source.counters();
        let decoder = decoder_seeing(&[]);
        let (tx, _rx) = event_channel(64);
        let shared: SharedStatus = Arc::new(Mutex::new(LoopStatus::Starting));

        let config = LoopConfig {
            frame_limit: 3,
            ..fast_config()
        };
        let mut acq = AcquisitionLoop::new(
            &mut source,
            &decoder,
            capture(),
            config,
            tx,
            SessionState::new(1),
        )
        .with_shared_status(shared.clone());

        assert_eq!(acq.run(&AtomicBool::new(false)), LoopStatus::Stopped);
        assert_eq!(acq.stats().frames_read, 3);
        drop(acq);

        assert_eq!(counters.reads(), 3);
        assert_eq!(counters.releases(), 1);
        assert_eq!(*shared.lock().unwrap(), LoopStatus::Stopped);
    }

    #[test]
    fn test_preview_only_for_frames_with_new_codes() {
        let mut source = MockSource::new();
        let decoder = decoder_seeing(&["111"]);
        let (tx, rx) = event_channel(64);
        let config = LoopConfig {
            preview: true,
            ..fast_config()
        };

        let mut acq = AcquisitionLoop::new(
            &mut source,
            &decoder,
            capture(),
            config,
            tx,
            SessionState::new(2),
        );
        acq.start();
        for _ in 0..3 {
            acq.step();
        }
        drop(acq);

        let previews: Vec<_> = rx
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ScannerEvent::Preview(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].session, 2);
        assert_eq!(previews[0].sequence, 1);
        assert_eq!(previews[0].annotated.labels[0].0, "EAN13: 111");
        assert_eq!(previews[0].annotated.image.dimensions(), (16, 16));
    }
}
