//! Continuous frame acquisition.
//!
//! [`AcquisitionLoop`] owns one session's state machine over a frame source.
//! [`Scanner`] runs it on a background thread and handles start, stop and
//! restart requests from the presentation context.

mod controller;
mod worker;

pub use controller::{Scanner, ScannerError};
pub use worker::{AcquisitionLoop, LoopConfig, SharedStatus};
