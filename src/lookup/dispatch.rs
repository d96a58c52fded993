//! Background lookup dispatch.
//!
//! Detected codes are looked up on a pool of worker threads so that slow
//! store queries never hold up the presentation context. Queries for
//! different codes run concurrently; their results are applied strictly in
//! the order the codes were submitted.

use super::resolver::{LookupReport, Resolution, Resolver};
use crate::events::{EventSender, ScannerEvent};
use crate::session::{DetectionEvent, SessionState};
use crossbeam::channel::{never, select, unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

struct Job {
    seq: u64,
    detection: DetectionEvent,
    previous: Option<String>,
}

struct Done {
    seq: u64,
    detection: DetectionEvent,
    report: LookupReport,
}

/// Issues lookups in parallel and publishes resolutions in order.
///
/// A sequencer thread owns all resolution state: it numbers submissions,
/// hands them to the workers and re-orders the reports before applying
/// them. Results go out as [`ScannerEvent::Resolution`].
pub struct LookupDispatcher {
    submit_tx: Option<Sender<DetectionEvent>>,
    sequencer: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl LookupDispatcher {
    /// Starts the sequencer and `workers` lookup threads.
    pub fn new(resolver: Resolver, workers: usize, events: EventSender) -> std::io::Result<Self> {
        let resolver = Arc::new(resolver);
        let (submit_tx, submit_rx) = unbounded::<DetectionEvent>();
        let (job_tx, job_rx) = unbounded::<Job>();
        let (done_tx, done_rx) = unbounded::<Done>();

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let resolver = Arc::clone(&resolver);
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("lookup-worker-{}", i))
                .spawn(move || worker_loop(resolver, jobs, done))?;
            handles.push(handle);
        }
        drop(done_tx);

        let sequencer = std::thread::Builder::new()
            .name("lookup-sequencer".into())
            .spawn(move || sequencer_loop(submit_rx, job_tx, done_rx, events))?;

        Ok(Self {
            submit_tx: Some(submit_tx),
            sequencer: Some(sequencer),
            workers: handles,
        })
    }

    /// Queues a detection for resolution. Never blocks.
    pub fn submit(&self, detection: DetectionEvent) {
        if let Some(tx) = &self.submit_tx {
            if tx.send(detection).is_err() {
                tracing::error!("Lookup sequencer is gone; detection not resolved");
            }
        }
    }

    /// Finishes outstanding lookups and stops all threads.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.submit_tx.take();
        if let Some(handle) = self.sequencer.take() {
            if handle.join().is_err() {
                tracing::error!("Lookup sequencer panicked");
            }
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Lookup worker panicked");
            }
        }
    }
}

impl Drop for LookupDispatcher {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop(resolver: Arc<Resolver>, jobs: Receiver<Job>, done: Sender<Done>) {
    for job in jobs.iter() {
        let report = resolver.query(job.detection.payload(), job.previous.as_deref());
        let finished = Done {
            seq: job.seq,
            detection: job.detection,
            report,
        };
        if done.send(finished).is_err() {
            break;
        }
    }
}

fn sequencer_loop(
    submit_rx: Receiver<DetectionEvent>,
    job_tx: Sender<Job>,
    done_rx: Receiver<Done>,
    events: EventSender,
) {
    // Fallback input, advanced at submission time.
    let mut issue_state = SessionState::default();
    // Ask-once bookkeeping, advanced at application time.
    let mut apply_state = SessionState::default();

    let mut next_seq = 0u64;
    let mut next_apply = 0u64;
    let mut pending: BTreeMap<u64, Done> = BTreeMap::new();
    let mut accepting = true;
    let closed = never();

    loop {
        if !accepting && next_apply == next_seq {
            break;
        }
        let submissions = if accepting { &submit_rx } else { &closed };

        select! {
            recv(submissions) -> msg => match msg {
                Ok(detection) => {
                    if detection.session != issue_state.generation {
                        issue_state = SessionState::new(detection.session);
                    }
                    let previous = issue_state
                        .last_emitted_payload
                        .replace(detection.payload().to_string());

                    let job = Job { seq: next_seq, detection, previous };
                    next_seq += 1;
                    if job_tx.send(job).is_err() {
                        tracing::error!("Lookup workers are gone");
                        break;
                    }
                }
                Err(_) => accepting = false,
            },
            recv(done_rx) -> msg => match msg {
                Ok(done) => {
                    pending.insert(done.seq, done);
                    while let Some(done) = pending.remove(&next_apply) {
                        next_apply += 1;
                        if done.detection.session != apply_state.generation {
                            apply_state = SessionState::new(done.detection.session);
                        }
                        let outcome = Resolver::apply(done.report, &mut apply_state);
                        events.send(ScannerEvent::Resolution(Resolution {
                            detection: done.detection,
                            outcome,
                        }));
                    }
                }
                Err(_) => break,
            },
        }
    }
    // Dropping job_tx here lets idle workers exit.
}
