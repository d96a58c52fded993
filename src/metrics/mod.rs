//! Prometheus metrics for the scanner.
//!
//! The presentation context folds every drained event into a
//! [`MetricsSnapshot`] and pushes it into a [`MetricsRegistry`]. With the
//! `metrics` feature the registry is served over HTTP.
//!
//! # Metrics Exposed
//!
//! - `code_scanner_loop_status` - 0 stopped, 1 starting, 2 running, 3 error backoff
//! - `code_scanner_session_generation` - current session
//! - `code_scanner_session_frames_read`, `code_scanner_session_read_failures`
//! - `code_scanner_fatal_stops_total`
//! - `code_scanner_codes_detected_total`, `code_scanner_events_dropped_total`
//! - `code_scanner_lookups_found_total`, `code_scanner_lookups_not_found_total`,
//!   `code_scanner_lookup_errors_total`
//!
//! # Example
//!
//! ```no_run
//! use code_scanner::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let mut snapshot = MetricsSnapshot::default();
//! snapshot.codes_detected = 3;
//!
//! registry.update(&snapshot);
//! println!("{}", registry.encode().unwrap());
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{publish, MetricsServer, MetricsServerConfig, MetricsState, SharedMetrics};
