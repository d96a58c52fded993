//! Code Scanner Library
//!
//! Continuous barcode and QR acquisition from a camera, with per-session
//! deduplication and product lookup for the codes it finds.
//!
//! # Architecture
//!
//! Work is split between an acquisition thread and the presentation
//! context that drives it:
//!
//! ```text
//!                 acquisition thread                  │ presentation
//! capture → decode (4 transforms) → session registry ─┼─▶ events ─▶ lookup
//!                                                     │       ▲        │
//!                                                     │       └────────┘
//! ```
//!
//! # Design Principles
//!
//! - **One event per code per session**: a restart begins a fresh session
//! - **Bounded failure tolerance**: a few failed reads back off, more stop the loop
//! - **Scoped device ownership**: the source is released exactly once on every exit
//! - **Typed outcomes**: lookup results are values, not log lines
//!
//! # Example
//!
//! ```no_run
//! use code_scanner::{
//!     acquisition::{LoopConfig, Scanner},
//!     capture::{CaptureConfig, MockSource},
//!     decode::{MultiTransformDecoder, ScriptedReader},
//!     events::{event_channel, ScannerEvent},
//! };
//! use std::time::Duration;
//!
//! let (events, receiver) = event_channel(256);
//! let decoder = MultiTransformDecoder::new(ScriptedReader::new(Vec::new(), 4));
//! let mut scanner = Scanner::new(
//!     Box::new(MockSource::new()),
//!     decoder,
//!     CaptureConfig::default(),
//!     LoopConfig::default(),
//!     events,
//! );
//!
//! scanner.start().unwrap();
//! while let Some(event) = receiver.recv_timeout(Duration::from_millis(500)) {
//!     if let ScannerEvent::Detection(detection) = event {
//!         println!("{}", detection.code.label());
//!     }
//! }
//! scanner.stop();
//! scanner.wait_stopped(Duration::from_secs(1)).unwrap();
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod acquisition;
pub mod capture;
pub mod decode;
pub mod events;
pub mod lookup;
pub mod metrics;
pub mod session;

// Re-export commonly used types at crate root
pub use acquisition::{AcquisitionLoop, LoopConfig, Scanner, ScannerError};
pub use capture::{CaptureConfig, FileConfig, Frame, FrameSource, MockSource};
pub use decode::{CodeReader, DecodedCode, MultiTransformDecoder, Symbology};
pub use events::{event_channel, EventReceiver, EventSender, LoopStatus, ScannerEvent};
pub use lookup::{CodeStore, LookupDispatcher, ResolutionOutcome, Resolver, SqliteStore};
pub use session::{DetectionEvent, SessionRegistry, SessionState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
