//! Start, stop and restart control over a background acquisition loop.
//!
//! None of the control calls wait on the device. `stop` only raises the
//! cancel flag; the thread is joined once it has published `Stopped`, at
//! which point it no longer touches the source.

use super::worker::{AcquisitionLoop, LoopConfig, SharedStatus};
use crate::capture::{CaptureConfig, FrameSource};
use crate::decode::MultiTransformDecoder;
use crate::events::{EventSender, LoopStatus};
use crate::session::SessionState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from controlling the acquisition thread.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("acquisition thread panicked")]
    WorkerPanicked,
    #[error("frame source was lost by an earlier failure")]
    SourceLost,
}

/// What the acquisition thread owns while running and hands back on exit.
struct Parts {
    source: Box<dyn FrameSource>,
    decoder: MultiTransformDecoder,
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Parts>,
}

/// Runs an [`AcquisitionLoop`] on a dedicated thread.
///
/// `start` and `stop` are idempotent and never block on the device. Every
/// `start` begins a new session generation with empty session state, so
/// codes seen before a restart are reported again.
///
/// A `start` issued while the previous loop is still winding down is
/// deferred; [`Scanner::poll`] launches it once the old thread has handed
/// the source back.
pub struct Scanner {
    parts: Option<Parts>,
    worker: Option<Worker>,
    start_pending: bool,
    capture: CaptureConfig,
    config: LoopConfig,
    events: EventSender,
    status: SharedStatus,
    session: SessionState,
}

impl Scanner {
    pub fn new(
        source: Box<dyn FrameSource>,
        decoder: MultiTransformDecoder,
        capture: CaptureConfig,
        config: LoopConfig,
        events: EventSender,
    ) -> Self {
        Self {
            parts: Some(Parts { source, decoder }),
            worker: None,
            start_pending: false,
            capture,
            config,
            events,
            status: Arc::new(Mutex::new(LoopStatus::Stopped)),
            session: SessionState::new(0),
        }
    }

    /// Current loop status. `Stopped` when no loop is running.
    pub fn status(&self) -> LoopStatus {
        self.status
            .lock()
            .map(|status| *status)
            .unwrap_or(LoopStatus::Stopped)
    }

    /// Generation of the most recently started session, 0 before the first.
    pub fn generation(&self) -> u64 {
        self.session.generation
    }

    /// True while the acquisition thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// True when a deferred `start` is waiting for the old loop to exit.
    pub fn start_pending(&self) -> bool {
        self.start_pending
    }

    /// Starts a new session on a background thread.
    ///
    /// Does nothing if a loop is already running. If the previous loop has
    /// been told to stop but has not exited yet, the start is deferred to
    /// [`Scanner::poll`].
    pub fn start(&mut self) -> Result<(), ScannerError> {
        self.reap_if_done()?;

        if let Some(worker) = &self.worker {
            if worker.cancel.load(Ordering::Acquire) {
                tracing::info!("Previous session still stopping, start deferred");
                self.start_pending = true;
            } else {
                tracing::debug!("Scanner already running");
            }
            return Ok(());
        }

        self.spawn()
    }

    /// Asks the loop to stop and returns immediately.
    ///
    /// The loop finishes its current iteration, releases the source and
    /// publishes `Stopped`. Cancels any deferred start.
    pub fn stop(&mut self) {
        self.start_pending = false;
        if let Some(worker) = &self.worker {
            worker.cancel.store(true, Ordering::Release);
        }
        if let Err(e) = self.reap_if_done() {
            tracing::warn!(error = %e, "Acquisition thread ended abnormally");
        }
    }

    /// Stops the current session and starts a fresh one, deferred if the
    /// old loop has not exited yet.
    pub fn restart(&mut self) -> Result<(), ScannerError> {
        tracing::info!(session = self.session.generation, "Restarting acquisition");
        self.stop();
        self.start()
    }

    /// Reaps an exited loop and launches a deferred start. Never blocks on
    /// the device; call it whenever the presentation context is idle.
    pub fn poll(&mut self) -> Result<(), ScannerError> {
        self.reap_if_done()?;
        if self.start_pending && self.worker.is_none() {
            self.start_pending = false;
            self.spawn()?;
        }
        Ok(())
    }

    /// Waits up to `timeout` for the loop to exit and hands the source back.
    ///
    /// Returns `false` if the thread is still alive at the deadline, e.g.
    /// when the device is stuck in a read.
    pub fn wait_stopped(&mut self, timeout: Duration) -> Result<bool, ScannerError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.reap_if_done()?;
            if self.worker.is_none() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn spawn(&mut self) -> Result<(), ScannerError> {
        let parts = self.parts.take().ok_or(ScannerError::SourceLost)?;
        self.session = self.session.next();
        if let Ok(mut status) = self.status.lock() {
            *status = LoopStatus::Starting;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = cancel.clone();
        let capture = self.capture.clone();
        let config = self.config.clone();
        let events = self.events.clone();
        let status = self.status.clone();
        let session = self.session.clone();

        tracing::info!(session = session.generation, "Starting acquisition");

        let handle = std::thread::Builder::new()
            .name(format!("acquisition-{}", session.generation))
            .spawn(move || {
                let Parts {
                    mut source,
                    decoder,
                } = parts;
                {
                    let mut acquisition = AcquisitionLoop::new(
                        source.as_mut(),
                        &decoder,
                        capture,
                        config,
                        events,
                        session,
                    )
                    .with_shared_status(status);
                    acquisition.run(&thread_cancel);
                }
                Parts { source, decoder }
            })?;

        self.worker = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Joins the thread if it has exited or has published `Stopped`.
    ///
    /// Once `Stopped` is published the loop has released the source and
    /// only returns, so the join is immediate.
    fn reap_if_done(&mut self) -> Result<(), ScannerError> {
        let done = match &self.worker {
            Some(worker) => worker.handle.is_finished() || self.status() == LoopStatus::Stopped,
            None => false,
        };
        if !done {
            return Ok(());
        }
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let result = worker.handle.join();
        if let Ok(mut status) = self.status.lock() {
            *status = LoopStatus::Stopped;
        }

        match result {
            Ok(parts) => {
                self.parts = Some(parts);
                Ok(())
            }
            Err(_) => {
                tracing::error!("Acquisition thread panicked, frame source lost");
                Err(ScannerError::WorkerPanicked)
            }
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.stop();
        match self.wait_stopped(Duration::from_secs(1)) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Acquisition thread still busy, detaching it");
            }
            Err(e) => tracing::warn!(error = %e, "Scanner did not shut down cleanly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, MockSource, SourceError};
    use crate::decode::{BoundingBox, DecodedCode, ScriptedReader, Symbology, Transform};
    use crate::events::{event_channel, EventReceiver, ScannerEvent};
    use crate::session::DetectionEvent;
    use crossbeam::channel::{bounded, Receiver, Sender};
    use std::sync::atomic::AtomicU32;

    fn decoder_seeing(payloads: &[&str]) -> MultiTransformDecoder {
        let codes = payloads
            .iter()
            .map(|p| DecodedCode::new(*p, Symbology::Ean13, BoundingBox::default()))
            .collect();
        MultiTransformDecoder::new(ScriptedReader::new(vec![codes], Transform::ALL.len()))
    }

    fn scanner_over(source: Box<dyn FrameSource>, payloads: &[&str]) -> (Scanner, EventReceiver) {
        let config = LoopConfig {
            throttle: Duration::from_millis(2),
            read_backoff: Duration::from_millis(1),
            max_read_errors: 5,
            frame_limit: 0,
            preview: false,
        };
        let (tx, rx) = event_channel(1024);
        let scanner = Scanner::new(
            source,
            decoder_seeing(payloads),
            CaptureConfig::with_dimensions(16, 16),
            config,
            tx,
        );
        (scanner, rx)
    }

    fn scanner_with(source: MockSource, payloads: &[&str]) -> (Scanner, EventReceiver) {
        scanner_over(Box::new(source), payloads)
    }

    /// Polls the scanner while waiting for the next detection.
    fn next_detection(scanner: &mut Scanner, rx: &EventReceiver) -> Option<DetectionEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            scanner.poll().unwrap();
            if let Some(ScannerEvent::Detection(d)) = rx.recv_timeout(Duration::from_millis(20)) {
                return Some(d);
            }
        }
        None
    }

    /// A source whose reads block until the test opens the gate.
    struct GatedSource {
        open: bool,
        entered: Sender<()>,
        gate: Receiver<()>,
        releases: Arc<AtomicU32>,
    }

    impl FrameSource for GatedSource {
        fn open(&mut self, _config: &CaptureConfig) -> Result<(), SourceError> {
            self.open = true;
            Ok(())
        }

        fn read(&mut self) -> Result<Frame, SourceError> {
            let _ = self.entered.try_send(());
            let _ = self.gate.recv();
            Ok(Frame::gray(vec![0u8; 16 * 16], 16, 16, 0))
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn release(&mut self) {
            if self.open {
                self.open = false;
                self.releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let source = MockSource::new();
        let counters = source.counters();
        let (mut scanner, _rx) = scanner_with(source, &[]);

        scanner.start().unwrap();
        scanner.start().unwrap();
        assert_eq!(scanner.generation(), 1);

        scanner.stop();
        scanner.stop();
        assert!(scanner.wait_stopped(Duration::from_secs(5)).unwrap());

        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.releases(), 1);
        assert_eq!(scanner.status(), LoopStatus::Stopped);
    }

    #[test]
    fn test_restart_reports_seen_code_again() {
        let (mut scanner, rx) = scanner_with(MockSource::new(), &["4006381333931"]);

        scanner.start().unwrap();
        let first = next_detection(&mut scanner, &rx).unwrap();
        assert_eq!(first.session, 1);

        scanner.restart().unwrap();
        let second = loop {
            let event = next_detection(&mut scanner, &rx).unwrap();
            if event.session == 2 {
                break event;
            }
        };
        assert_eq!(second.payload(), "4006381333931");

        scanner.stop();
        assert!(scanner.wait_stopped(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_exhausted_reads_stop_until_restarted() {
        let mut source = MockSource::new();
        source.push_failures(6);
        let counters = source.counters();
        let (mut scanner, rx) = scanner_with(source, &[]);

        scanner.start().unwrap();
        assert!(scanner.wait_stopped(Duration::from_secs(5)).unwrap());
        assert_eq!(scanner.status(), LoopStatus::Stopped);
        assert_eq!(counters.releases(), 1);

        let fatal = rx.drain().into_iter().any(|e| {
            matches!(e, ScannerEvent::Status(s) if s.fatal && s.status == LoopStatus::Stopped)
        });
        assert!(fatal);

        scanner.start().unwrap();
        assert_eq!(scanner.generation(), 2);
        scanner.stop();
        assert!(scanner.wait_stopped(Duration::from_secs(5)).unwrap());
        assert_eq!(counters.opens(), 2);
        assert_eq!(counters.releases(), 2);
    }

    #[test]
    fn test_stop_does_not_wait_for_blocked_read() {
        let (entered_tx, entered_rx) = bounded(1);
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let releases = Arc::new(AtomicU32::new(0));
        let source = GatedSource {
            open: false,
            entered: entered_tx,
            gate: gate_rx,
            releases: Arc::clone(&releases),
        };
        let (mut scanner, _rx) = scanner_over(Box::new(source), &[]);

        scanner.start().unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let started = Instant::now();
        scanner.stop();
        scanner.restart().unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(scanner.start_pending());
        assert_eq!(scanner.generation(), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        // Unblock the read; the old loop sees the cancel flag and exits.
        drop(gate_tx);
        let deadline = Instant::now() + Duration::from_secs(5);
        while scanner.generation() < 2 && Instant::now() < deadline {
            scanner.poll().unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(scanner.generation(), 2);
        assert!(releases.load(Ordering::SeqCst) >= 1);

        scanner.stop();
        assert!(scanner.wait_stopped(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_drop_releases_source() {
        let source = MockSource::new();
        let counters = source.counters();
        let (mut scanner, _rx) = scanner_with(source, &[]);

        scanner.start().unwrap();
        drop(scanner);

        assert_eq!(counters.releases(), counters.opens());
    }
}
