//! Frame source abstraction.
//!
//! A frame source owns the capture device. The acquisition loop is its only
//! user: it opens the source once per session, reads from it on every
//! iteration and releases it on every way out of the loop.

use super::{CaptureConfig, Frame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during frame source operations.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("capture device not found: {0}")]
    DeviceNotFound(String),
    #[error("failed to open capture device: {0}")]
    OpenFailed(String),
    #[error("failed to configure capture device: {0}")]
    ConfigFailed(String),
    #[error("failed to read frame: {0}")]
    ReadFailed(String),
    #[error("frame source not open")]
    NotOpen,
}

/// Trait for capture device implementations.
///
/// Implementations must tolerate `release` being called on a source that is
/// already released or was never opened.
pub trait FrameSource: Send {
    /// Opens the device and applies the requested configuration.
    fn open(&mut self, config: &CaptureConfig) -> Result<(), SourceError>;

    /// Reads the most recent frame. May block for up to one frame period.
    fn read(&mut self) -> Result<Frame, SourceError>;

    /// Checks if the source is currently open.
    fn is_open(&self) -> bool;

    /// Releases the device. Idempotent.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), SourceError> {
        (**self).open(config)
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        (**self).read()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// One scripted outcome for [`MockSource::read`].
#[derive(Debug, Clone)]
pub enum MockRead {
    /// Return a synthetic frame.
    Frame,
    /// Fail the read with the given reason.
    Fail(String),
}

/// Open/release counters shared with the test that built the source.
#[derive(Debug, Clone, Default)]
pub struct MockCounters {
    opens: Arc<AtomicU32>,
    releases: Arc<AtomicU32>,
    reads: Arc<AtomicU32>,
}

impl MockCounters {
    /// Successful opens.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Releases that actually closed an open device.
    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Read attempts, successful or not.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Mock frame source that generates synthetic frames.
///
/// Reads follow the script pushed with [`MockSource::push_read`]; once the
/// script is exhausted every read returns a frame.
#[derive(Debug, Default)]
pub struct MockSource {
    config: Option<CaptureConfig>,
    sequence: u64,
    open_failures: VecDeque<String>,
    script: VecDeque<MockRead>,
    counters: MockCounters,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `open` fail with `reason`.
    pub fn fail_next_open(&mut self, reason: impl Into<String>) {
        self.open_failures.push_back(reason.into());
    }

    /// Appends a scripted read outcome.
    pub fn push_read(&mut self, step: MockRead) {
        self.script.push_back(step);
    }

    /// Appends `count` consecutive read failures.
    pub fn push_failures(&mut self, count: usize) {
        for i in 0..count {
            self.script
                .push_back(MockRead::Fail(format!("scripted failure {}", i + 1)));
        }
    }

    /// Returns a handle on the lifecycle counters.
    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }

    fn synthesize(&mut self, config: &CaptureConfig) -> Frame {
        let pixel_count = (config.width * config.height) as usize;
        let pixels: Vec<u8> = (0..pixel_count * 3)
            .map(|i| ((i as u64 ^ self.sequence) % 256) as u8)
            .collect();

        self.sequence += 1;
        Frame::rgb(pixels, config.width, config.height, self.sequence)
    }
}

impl FrameSource for MockSource {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), SourceError> {
        if let Some(reason) = self.open_failures.pop_front() {
            return Err(SourceError::OpenFailed(reason));
        }
        config
            .validate()
            .map_err(|e| SourceError::ConfigFailed(e.to_string()))?;
        self.config = Some(config.clone());
        self.sequence = 0;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        tracing::info!(?config, "MockSource opened");
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, SourceError> {
        let config = self.config.clone().ok_or(SourceError::NotOpen)?;
        self.counters.reads.fetch_add(1, Ordering::SeqCst);

        match self.script.pop_front() {
            Some(MockRead::Fail(reason)) => Err(SourceError::ReadFailed(reason)),
            Some(MockRead::Frame) | None => Ok(self.synthesize(&config)),
        }
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }

    fn release(&mut self) {
        if self.config.take().is_some() {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
            tracing::info!("MockSource released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_source_lifecycle() {
        let mut source = MockSource::new();
        let config = CaptureConfig::default();

        assert!(!source.is_open());

        source.open(&config).unwrap();
        assert!(source.is_open());

        let frame = source.read().unwrap();
        assert!(frame.is_valid());
        assert_eq!(frame.sequence(), 1);

        let frame2 = source.read().unwrap();
        assert_eq!(frame2.sequence(), 2);

        source.release();
        assert!(!source.is_open());
    }

    #[test]
    fn test_read_without_open() {
        let mut source = MockSource::new();
        assert!(matches!(source.read(), Err(SourceError::NotOpen)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut source = MockSource::new();
        let counters = source.counters();

        source.release();
        source.open(&CaptureConfig::default()).unwrap();
        source.release();
        source.release();

        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.releases(), 1);
    }

    #[test]
    fn test_scripted_reads() {
        let mut source = MockSource::new();
        source.push_failures(2);
        source.push_read(MockRead::Frame);
        source.open(&CaptureConfig::with_dimensions(8, 8)).unwrap();

        assert!(matches!(source.read(), Err(SourceError::ReadFailed(_))));
        assert!(matches!(source.read(), Err(SourceError::ReadFailed(_))));
        assert!(source.read().is_ok());
        assert!(source.read().is_ok());
        assert_eq!(source.counters().reads(), 4);
    }

    #[test]
    fn test_scripted_open_failure() {
        let mut source = MockSource::new();
        source.fail_next_open("no device");

        assert!(matches!(
            source.open(&CaptureConfig::default()),
            Err(SourceError::OpenFailed(_))
        ));
        assert!(source.open(&CaptureConfig::default()).is_ok());
    }
}
