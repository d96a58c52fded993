//! Resolution of detected codes against the code store.
//!
//! A lookup runs in two phases. [`Resolver::query`] talks to the store and
//! may run on any worker thread, concurrently with other queries.
//! [`Resolver::apply`] turns the query report into an outcome and updates
//! the ask-once bookkeeping; it must run in detection order, one report at
//! a time.

use super::{CodeStore, LookupResult, ProductRecord, StoreError, TimedLookup};
use crate::session::{DetectionEvent, SessionState};
use std::sync::Arc;
use std::time::Duration;

/// What the presentation layer should do with a detected code.
#[derive(Debug, Clone)]
pub enum ResolutionOutcome {
    /// A record was found, for the queried code or for the fallback code.
    Found {
        queried: String,
        matched: String,
        record: ProductRecord,
        via_fallback: bool,
    },
    /// Not found, and the operator has not been asked about it yet.
    NotFoundPromptable { code: String },
    /// Not found, and the operator was already asked this session.
    AlreadyAskedNotFound { code: String },
    /// The store failed; distinct from a missing record.
    ///
    /// `code` is always the scanned code. `fallback` names the previous
    /// code when it was that second lookup which failed.
    StoreError {
        code: String,
        fallback: Option<String>,
        error: StoreError,
    },
}

impl ResolutionOutcome {
    /// The code the detection was resolved for.
    pub fn queried(&self) -> &str {
        match self {
            ResolutionOutcome::Found { queried, .. } => queried,
            ResolutionOutcome::NotFoundPromptable { code }
            | ResolutionOutcome::AlreadyAskedNotFound { code }
            | ResolutionOutcome::StoreError { code, .. } => code,
        }
    }
}

/// A resolved detection, as delivered to the presentation layer.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub detection: DetectionEvent,
    pub outcome: ResolutionOutcome,
}

/// Raw store answers for one code, before ask-once is applied.
#[derive(Debug, Clone)]
pub struct LookupReport {
    pub code: String,
    pub primary: LookupResult,
    /// Second lookup against the previously resolved code, if one was made.
    pub fallback: Option<(String, LookupResult)>,
}

/// Store queries allowed to outlive their deadline at once.
const MAX_PENDING_LOOKUPS: usize = 8;

/// Resolves codes with a one-level fallback to the previous code.
pub struct Resolver {
    lookups: TimedLookup,
}

impl Resolver {
    pub fn new(store: Arc<dyn CodeStore>, timeout: Duration) -> Self {
        Self {
            lookups: TimedLookup::new(store, timeout, MAX_PENDING_LOOKUPS),
        }
    }

    /// Queries the store for `code`, falling back to `previous` on a miss.
    ///
    /// The fallback only goes one code back and is skipped when `previous`
    /// equals `code`. A store error never triggers the fallback.
    pub fn query(&self, code: &str, previous: Option<&str>) -> LookupReport {
        let primary = self.lookups.lookup(code);

        let fallback = match (&primary, previous) {
            (LookupResult::NotFound, Some(prev)) if prev != code => {
                tracing::info!(code, previous = prev, "Code not found, trying previous code");
                Some((prev.to_string(), self.lookups.lookup(prev)))
            }
            _ => None,
        };

        LookupReport {
            code: code.to_string(),
            primary,
            fallback,
        }
    }

    /// Turns a report into an outcome, recording not-found prompts in
    /// `state.asked_not_found`.
    pub fn apply(report: LookupReport, state: &mut SessionState) -> ResolutionOutcome {
        let LookupReport {
            code,
            primary,
            fallback,
        } = report;

        match primary {
            LookupResult::Found(record) => {
                tracing::info!(code = %code, "Product found");
                return ResolutionOutcome::Found {
                    matched: code.clone(),
                    queried: code,
                    record,
                    via_fallback: false,
                };
            }
            LookupResult::StoreError(error) => {
                tracing::warn!(code = %code, error = %error, "Code store error");
                return ResolutionOutcome::StoreError {
                    code,
                    fallback: None,
                    error,
                };
            }
            LookupResult::NotFound => {}
        }

        match fallback {
            Some((matched, LookupResult::Found(record))) => {
                tracing::info!(code = %code, matched = %matched, "Product found via previous code");
                return ResolutionOutcome::Found {
                    queried: code,
                    matched,
                    record,
                    via_fallback: true,
                };
            }
            Some((previous, LookupResult::StoreError(error))) => {
                tracing::warn!(
                    code = %code,
                    previous = %previous,
                    error = %error,
                    "Code store error on fallback"
                );
                return ResolutionOutcome::StoreError {
                    code,
                    fallback: Some(previous),
                    error,
                };
            }
            Some((_, LookupResult::NotFound)) | None => {}
        }

        if state.asked_not_found.contains(&code) {
            tracing::debug!(code = %code, "Code not found, already asked");
            ResolutionOutcome::AlreadyAskedNotFound { code }
        } else {
            tracing::info!(code = %code, "Code not found");
            state.asked_not_found.insert(code.clone());
            ResolutionOutcome::NotFoundPromptable { code }
        }
    }

    /// Resolves one code in place.
    ///
    /// `state.last_emitted_payload` supplies the fallback code and is set to
    /// `code` afterwards, whatever the outcome.
    pub fn resolve(&self, code: &str, state: &mut SessionState) -> ResolutionOutcome {
        let previous = state.last_emitted_payload.replace(code.to_string());
        let report = self.query(code, previous.as_deref());
        Self::apply(report, state)
    }
}
