//! Metrics collection and registry.

use crate::events::{EventReceiver, LoopStatus, ScannerEvent};
use crate::lookup::ResolutionOutcome;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Scanner state as seen from the presentation context.
///
/// Built up by feeding it every event drained from the event channel.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Latest loop status, `None` before the first status event.
    pub status: Option<LoopStatus>,
    /// Current session generation.
    pub session: u64,
    /// Frames read in the current session.
    pub frames_read: u64,
    /// Failed reads in the current session.
    pub read_failures: u64,
    /// Detection events received since startup.
    pub codes_detected: u64,
    /// Events evicted from a full channel since startup.
    pub events_dropped: u64,
    /// Events waiting in the channel when last sampled.
    pub queue_depth: u64,
    pub lookups_found: u64,
    pub lookups_not_found: u64,
    pub lookup_errors: u64,
    /// Fatal stops since startup.
    pub fatal_stops: u64,
}

impl MetricsSnapshot {
    /// Folds one event into the snapshot.
    pub fn observe(&mut self, event: &ScannerEvent) {
        match event {
            ScannerEvent::Detection(_) => self.codes_detected += 1,
            ScannerEvent::Status(status) => {
                self.status = Some(status.status);
                self.session = status.session;
                self.frames_read = status.stats.frames_read;
                self.read_failures = status.stats.read_failures;
                if status.fatal {
                    self.fatal_stops += 1;
                }
            }
            ScannerEvent::Resolution(resolution) => match resolution.outcome {
                ResolutionOutcome::Found { .. } => self.lookups_found += 1,
                ResolutionOutcome::NotFoundPromptable { .. }
                | ResolutionOutcome::AlreadyAskedNotFound { .. } => self.lookups_not_found += 1,
                ResolutionOutcome::StoreError { .. } => self.lookup_errors += 1,
            },
            ScannerEvent::Preview(_) => {}
        }
    }

    /// Records the receiver's backlog and overflow count.
    pub fn sample_queue(&mut self, receiver: &EventReceiver) {
        self.queue_depth = receiver.len() as u64;
        self.events_dropped = receiver.dropped();
    }
}

fn status_value(status: Option<LoopStatus>) -> i64 {
    match status {
        None | Some(LoopStatus::Stopped) => 0,
        Some(LoopStatus::Starting) => 1,
        Some(LoopStatus::Running) => 2,
        Some(LoopStatus::ErrorBackoff) => 3,
    }
}

/// Prometheus metrics registry for scanner monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    // Loop metrics
    loop_status: IntGauge,
    session: IntGauge,
    frames_read: IntGauge,
    read_failures: IntGauge,
    fatal_stops: IntCounter,

    // Event metrics
    codes_detected: IntCounter,
    events_dropped: IntCounter,
    queue_depth: IntGauge,

    // Lookup metrics
    lookups_found: IntCounter,
    lookups_not_found: IntCounter,
    lookup_errors: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new registry with all scanner metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let loop_status = IntGauge::new(
            "code_scanner_loop_status",
            "Acquisition loop status (0=stopped, 1=starting, 2=running, 3=error backoff)",
        )?;
        let session = IntGauge::new(
            "code_scanner_session_generation",
            "Generation of the current scan session",
        )?;
        let frames_read = IntGauge::new(
            "code_scanner_session_frames_read",
            "Frames read in the current session",
        )?;
        let read_failures = IntGauge::new(
            "code_scanner_session_read_failures",
            "Failed frame reads in the current session",
        )?;
        let fatal_stops = IntCounter::new(
            "code_scanner_fatal_stops_total",
            "Times the acquisition loop stopped on its own",
        )?;

        let codes_detected = IntCounter::new(
            "code_scanner_codes_detected_total",
            "New codes reported across all sessions",
        )?;
        let events_dropped = IntCounter::new(
            "code_scanner_events_dropped_total",
            "Events evicted from a full event queue",
        )?;
        let queue_depth = IntGauge::new(
            "code_scanner_event_queue_depth",
            "Events waiting for the presentation context",
        )?;

        let lookups_found = IntCounter::new(
            "code_scanner_lookups_found_total",
            "Lookups that matched a product record",
        )?;
        let lookups_not_found = IntCounter::new(
            "code_scanner_lookups_not_found_total",
            "Lookups with no matching product record",
        )?;
        let lookup_errors = IntCounter::new(
            "code_scanner_lookup_errors_total",
            "Lookups that failed with a store error",
        )?;

        registry.register(Box::new(loop_status.clone()))?;
        registry.register(Box::new(session.clone()))?;
        registry.register(Box::new(frames_read.clone()))?;
        registry.register(Box::new(read_failures.clone()))?;
        registry.register(Box::new(fatal_stops.clone()))?;
        registry.register(Box::new(codes_detected.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(lookups_found.clone()))?;
        registry.register(Box::new(lookups_not_found.clone()))?;
        registry.register(Box::new(lookup_errors.clone()))?;

        Ok(Self {
            registry,
            loop_status,
            session,
            frames_read,
            read_failures,
            fatal_stops,
            codes_detected,
            events_dropped,
            queue_depth,
            lookups_found,
            lookups_not_found,
            lookup_errors,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.loop_status.set(status_value(snapshot.status));
        self.session.set(snapshot.session as i64);
        self.frames_read.set(snapshot.frames_read as i64);
        self.read_failures.set(snapshot.read_failures as i64);
        self.queue_depth.set(snapshot.queue_depth as i64);

        // Counters only move forward, by the difference.
        advance(&self.fatal_stops, snapshot.fatal_stops);
        advance(&self.codes_detected, snapshot.codes_detected);
        advance(&self.events_dropped, snapshot.events_dropped);
        advance(&self.lookups_found, snapshot.lookups_found);
        advance(&self.lookups_not_found, snapshot.lookups_not_found);
        advance(&self.lookup_errors, snapshot.lookup_errors);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
