//! Product lookup for detected codes.
//!
//! Newly detected codes are looked up in a [`CodeStore`]. When the store has
//! no record for a code, the previously resolved code is tried once before
//! the code is reported as not found; each not-found code is surfaced for a
//! "create new product" prompt at most once per session.

mod dispatch;
mod resolver;
mod sqlite;
mod store;

pub use dispatch::LookupDispatcher;
pub use resolver::{LookupReport, Resolution, ResolutionOutcome, Resolver};
pub use sqlite::SqliteStore;
pub use store::{CodeStore, LookupResult, MemoryStore, ProductRecord, StoreError, TimedLookup};
