//! Frame capture.
//!
//! This module provides the frame source abstraction the acquisition loop
//! reads from, the frame type handed to the decoder, and the scanner
//! configuration file format.

mod config;
#[cfg(feature = "camera")]
mod device;
mod frame;
mod source;

pub use config::{
    CaptureConfig, ConfigError, FileConfig, LookupConfig, OutputConfig, ScannerConfig,
};
#[cfg(feature = "camera")]
pub use device::NokhwaSource;
pub use frame::{Frame, PixelFormat};
pub use source::{FrameSource, MockCounters, MockRead, MockSource, SourceError};
