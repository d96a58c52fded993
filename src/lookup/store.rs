//! Code store abstraction.

use chrono::NaiveDateTime;
use crossbeam::channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Errors a code store can report.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// A product known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductRecord {
    /// GS1 code the record is keyed by.
    pub code: String,
    pub name: Option<String>,
    pub image_path: Option<String>,
    pub packaging_waste_type: Option<String>,
    pub product_waste_type: Option<String>,
    pub packaging_material: Option<String>,
    pub plastic_type: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl ProductRecord {
    /// A record with only code and name set.
    pub fn named(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Name for display, falling back to the code.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.code)
    }
}

/// Outcome of one store query.
#[derive(Debug, Clone)]
pub enum LookupResult {
    Found(ProductRecord),
    NotFound,
    StoreError(StoreError),
}

impl From<Result<Option<ProductRecord>, StoreError>> for LookupResult {
    fn from(result: Result<Option<ProductRecord>, StoreError>) -> Self {
        match result {
            Ok(Some(record)) => LookupResult::Found(record),
            Ok(None) => LookupResult::NotFound,
            Err(e) => LookupResult::StoreError(e),
        }
    }
}

/// A product lookup service.
///
/// Must be safe to call from several threads at once.
pub trait CodeStore: Send + Sync {
    /// Looks up the record for `code`. A missing record is `Ok(None)`.
    fn lookup(&self, code: &str) -> Result<Option<ProductRecord>, StoreError>;
}

/// Store queries with a deadline.
///
/// Each query runs on a helper thread so the caller can stop waiting after
/// `timeout`. A helper that outlives its caller keeps its slot until the
/// store answers, and at most `max_in_flight` helpers exist at once. When
/// every slot is taken the query fails fast with
/// [`StoreError::Unavailable`] instead of piling up more threads.
pub struct TimedLookup {
    store: Arc<dyn CodeStore>,
    timeout: Duration,
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
}

/// Releases one in-flight slot when the helper thread finishes.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl TimedLookup {
    pub fn new(store: Arc<dyn CodeStore>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            store,
            timeout,
            max_in_flight: max_in_flight.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Helper threads currently running, including abandoned ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Option<Slot> {
        let max = self.max_in_flight;
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Slot(Arc::clone(&self.in_flight)))
    }

    /// Runs `store.lookup(code)`, giving up after the timeout.
    ///
    /// A timeout is a [`StoreError::Timeout`], never a not-found. A late
    /// answer is discarded.
    pub fn lookup(&self, code: &str) -> LookupResult {
        let Some(slot) = self.acquire() else {
            tracing::warn!(
                code,
                in_flight = self.max_in_flight,
                "Too many store lookups still pending"
            );
            return LookupResult::StoreError(StoreError::Unavailable(format!(
                "{} earlier lookups still pending",
                self.max_in_flight
            )));
        };

        let (tx, rx) = bounded(1);
        let store = Arc::clone(&self.store);
        let worker_code = code.to_owned();

        let spawned = std::thread::Builder::new()
            .name("code-lookup".into())
            .spawn(move || {
                let result = store.lookup(&worker_code);
                // Free the slot before answering so a waiting caller can reuse it.
                drop(slot);
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return LookupResult::StoreError(StoreError::Unavailable(e.to_string()));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result.into(),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(code, timeout = ?self.timeout, "Code store lookup timed out");
                LookupResult::StoreError(StoreError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => LookupResult::StoreError(
                StoreError::Unavailable("lookup worker exited without answering".into()),
            ),
        }
    }
}

/// In-memory store, for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ProductRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store holding `records`.
    pub fn with_records(records: impl IntoIterator<Item = ProductRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Adds or replaces a record.
    pub fn insert(&self, record: ProductRecord) {
        match self.records.write() {
            Ok(mut records) => {
                records.insert(record.code.clone(), record);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(record.code.clone(), record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CodeStore for MemoryStore {
    fn lookup(&self, code: &str) -> Result<Option<ProductRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(records.get(code).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowStore(Duration);

    impl CodeStore for SlowStore {
        fn lookup(&self, _code: &str) -> Result<Option<ProductRecord>, StoreError> {
            std::thread::sleep(self.0);
            Ok(None)
        }
    }

    #[test]
    fn test_memory_store_lookup() {
        let store = MemoryStore::with_records([ProductRecord::named("111", "Oat milk")]);

        assert_eq!(
            store.lookup("111").unwrap().unwrap().display_name(),
            "Oat milk"
        );
        assert!(store.lookup("222").unwrap().is_none());
    }

    #[test]
    fn test_timed_lookup_found() {
        let store: Arc<dyn CodeStore> =
            Arc::new(MemoryStore::with_records([ProductRecord::named("111", "Tea")]));
        let timed = TimedLookup::new(store, Duration::from_secs(1), 4);

        assert!(matches!(timed.lookup("111"), LookupResult::Found(_)));
        assert!(matches!(timed.lookup("222"), LookupResult::NotFound));
    }

    #[test]
    fn test_timeout_is_store_error_not_not_found() {
        let store: Arc<dyn CodeStore> = Arc::new(SlowStore(Duration::from_millis(500)));
        let timed = TimedLookup::new(store, Duration::from_millis(20), 4);

        assert!(matches!(
            timed.lookup("111"),
            LookupResult::StoreError(StoreError::Timeout(_))
        ));
    }

    #[test]
    fn test_hung_store_does_not_accumulate_threads() {
        let store: Arc<dyn CodeStore> = Arc::new(SlowStore(Duration::from_millis(300)));
        let timed = TimedLookup::new(store, Duration::from_millis(1), 2);

        let results: Vec<_> = (0..20).map(|_| timed.lookup("111")).collect();

        assert!(results
            .iter()
            .all(|r| matches!(r, LookupResult::StoreError(_))));
        assert!(matches!(
            results[2],
            LookupResult::StoreError(StoreError::Unavailable(_))
        ));
        assert!(timed.in_flight() <= 2);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while timed.in_flight() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(timed.in_flight(), 0);
    }

    #[test]
    fn test_slots_are_reused_after_answers() {
        let store: Arc<dyn CodeStore> = Arc::new(MemoryStore::new());
        let timed = TimedLookup::new(store, Duration::from_secs(1), 1);

        for _ in 0..5 {
            assert!(matches!(timed.lookup("111"), LookupResult::NotFound));
        }
    }

    #[test]
    fn test_display_name_falls_back_to_code() {
        let record = ProductRecord {
            code: "999".into(),
            ..Default::default()
        };
        assert_eq!(record.display_name(), "999");
    }
}
