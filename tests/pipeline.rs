//! End-to-end runs: mock capture through decode, dedup, events and lookup.

use code_scanner::acquisition::{LoopConfig, Scanner};
use code_scanner::capture::{CaptureConfig, MockSource};
use code_scanner::decode::{
    BoundingBox, DecodedCode, MultiTransformDecoder, ScriptedReader, Symbology, Transform,
};
use code_scanner::events::{event_channel, EventReceiver, LoopStatus, ScannerEvent};
use code_scanner::lookup::{
    CodeStore, LookupDispatcher, ProductRecord, Resolution, ResolutionOutcome, Resolver,
    SqliteStore, StoreError,
};
use code_scanner::session::DetectionEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn ean(payload: &str) -> DecodedCode {
    DecodedCode::new(payload, Symbology::Ean13, BoundingBox::new(10, 10, 40, 20))
}

fn scanner(script: Vec<Vec<DecodedCode>>, frames: u64, tx: code_scanner::EventSender) -> Scanner {
    let decoder = MultiTransformDecoder::new(ScriptedReader::new(script, Transform::ALL.len()));
    let config = LoopConfig {
        throttle: Duration::from_millis(1),
        read_backoff: Duration::from_millis(1),
        max_read_errors: 5,
        frame_limit: frames,
        preview: false,
    };
    Scanner::new(
        Box::new(MockSource::new()),
        decoder,
        CaptureConfig::with_dimensions(32, 24),
        config,
        tx,
    )
}

#[derive(Default)]
struct Collected {
    detections: Vec<DetectionEvent>,
    resolutions: Vec<Resolution>,
}

impl Collected {
    fn absorb(&mut self, event: ScannerEvent, dispatcher: &LookupDispatcher) -> bool {
        match event {
            ScannerEvent::Detection(detection) => {
                dispatcher.submit(detection.clone());
                self.detections.push(detection);
                false
            }
            ScannerEvent::Resolution(resolution) => {
                self.resolutions.push(resolution);
                false
            }
            ScannerEvent::Status(status) => status.status == LoopStatus::Stopped,
            ScannerEvent::Preview(_) => false,
        }
    }
}

/// Pumps events like the presentation context until the loop stops.
fn pump_until_stopped(rx: &EventReceiver, dispatcher: &LookupDispatcher, out: &mut Collected) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Some(event) = rx.recv_timeout(Duration::from_millis(50)) {
            if out.absorb(event, dispatcher) {
                return;
            }
        }
    }
    panic!("scanner did not stop in time");
}

fn finish(rx: &EventReceiver, dispatcher: LookupDispatcher, out: &mut Collected) {
    dispatcher.shutdown();
    for event in rx.drain() {
        if let ScannerEvent::Resolution(resolution) = event {
            out.resolutions.push(resolution);
        }
    }
}

#[test]
fn test_scan_resolves_with_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("products.db")).unwrap();
    store
        .insert(&ProductRecord::named("4006381333931", "Sparkling water"))
        .unwrap();
    let store: Arc<dyn CodeStore> = Arc::new(store);

    let (tx, rx) = event_channel(256);
    let dispatcher =
        LookupDispatcher::new(Resolver::new(store, Duration::from_secs(2)), 2, tx.clone()).unwrap();
    let script = vec![
        vec![ean("4006381333931")],
        vec![ean("4006381333931"), ean("5901234123457")],
        vec![ean("7622210449283")],
    ];
    let mut scanner = scanner(script, 6, tx);
    let mut collected = Collected::default();

    scanner.start().unwrap();
    pump_until_stopped(&rx, &dispatcher, &mut collected);
    scanner.stop();
    assert!(scanner.wait_stopped(Duration::from_secs(5)).unwrap());
    finish(&rx, dispatcher, &mut collected);

    let payloads: Vec<_> = collected.detections.iter().map(|d| d.payload()).collect();
    assert_eq!(payloads, ["4006381333931", "5901234123457", "7622210449283"]);

    let outcomes: Vec<_> = collected.resolutions.iter().map(|r| &r.outcome).collect();
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(
        outcomes[0],
        ResolutionOutcome::Found { via_fallback: false, .. }
    ));
    match outcomes[1] {
        ResolutionOutcome::Found {
            queried,
            matched,
            via_fallback,
            ..
        } => {
            assert_eq!(queried, "5901234123457");
            assert_eq!(matched, "4006381333931");
            assert!(*via_fallback);
        }
        other => panic!("expected fallback match, got {:?}", other),
    }
    assert!(matches!(
        outcomes[2],
        ResolutionOutcome::NotFoundPromptable { code } if code == "7622210449283"
    ));
}

#[test]
fn test_restart_reopens_prompt_for_unknown_code() {
    let store: Arc<dyn CodeStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let (tx, rx) = event_channel(256);
    let dispatcher =
        LookupDispatcher::new(Resolver::new(store, Duration::from_secs(2)), 1, tx.clone()).unwrap();
    let mut scanner = scanner(vec![vec![ean("7622210449283")]], 3, tx);
    let mut collected = Collected::default();

    scanner.start().unwrap();
    pump_until_stopped(&rx, &dispatcher, &mut collected);
    scanner.start().unwrap();
    pump_until_stopped(&rx, &dispatcher, &mut collected);
    scanner.stop();
    assert!(scanner.wait_stopped(Duration::from_secs(5)).unwrap());
    finish(&rx, dispatcher, &mut collected);

    let sessions: Vec<_> = collected.detections.iter().map(|d| d.session).collect();
    assert_eq!(sessions, [1, 2]);
    assert_eq!(collected.resolutions.len(), 2);
    assert!(collected
        .resolutions
        .iter()
        .all(|r| matches!(r.outcome, ResolutionOutcome::NotFoundPromptable { .. })));
}

struct BrokenStore;

impl CodeStore for BrokenStore {
    fn lookup(&self, _code: &str) -> Result<Option<ProductRecord>, StoreError> {
        Err(StoreError::Unavailable("disk detached".into()))
    }
}

#[test]
fn test_store_failure_is_reported_not_fatal() {
    let (tx, rx) = event_channel(256);
    let dispatcher = LookupDispatcher::new(
        Resolver::new(Arc::new(BrokenStore), Duration::from_secs(2)),
        1,
        tx.clone(),
    )
    .unwrap();
    let mut scanner = scanner(vec![vec![ean("4006381333931")]], 2, tx);
    let mut collected = Collected::default();

    scanner.start().unwrap();
    pump_until_stopped(&rx, &dispatcher, &mut collected);
    scanner.stop();
    assert!(scanner.wait_stopped(Duration::from_secs(5)).unwrap());
    finish(&rx, dispatcher, &mut collected);

    assert_eq!(collected.resolutions.len(), 1);
    assert!(matches!(
        &collected.resolutions[0].outcome,
        ResolutionOutcome::StoreError { code, .. } if code == "4006381333931"
    ));
}
