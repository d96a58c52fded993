//! Decode capability interface.
//!
//! Symbol-level decoding is not done in this crate. A [`CodeReader`] turns
//! one preprocessed image into the codes it can see; the multi-transform
//! decoder decides which images to hand it.

use super::DecodedCode;
use image::GrayImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Errors a reader may report for a single image.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("frame buffer does not match its dimensions")]
    InvalidFrame,
    #[error("reader failed: {0}")]
    Reader(String),
}

/// A symbol decoder.
///
/// Implementations must return an empty list, not an error, for images
/// with no codes in them.
pub trait CodeReader: Send {
    fn decode(&self, image: &GrayImage) -> Result<Vec<DecodedCode>, DecodeError>;
}

impl<F> CodeReader for F
where
    F: Fn(&GrayImage) -> Result<Vec<DecodedCode>, DecodeError> + Send,
{
    fn decode(&self, image: &GrayImage) -> Result<Vec<DecodedCode>, DecodeError> {
        self(image)
    }
}

/// Reader replaying a fixed script, for demos and tests.
///
/// Every `calls_per_frame` decode calls count as one frame. Frame `n` sees
/// script entry `n % len` on every call within that frame, so the same code
/// shows up under each transform just as it would with a real reader.
#[derive(Debug)]
pub struct ScriptedReader {
    script: Vec<Vec<DecodedCode>>,
    calls_per_frame: usize,
    calls: AtomicUsize,
}

impl ScriptedReader {
    pub fn new(script: Vec<Vec<DecodedCode>>, calls_per_frame: usize) -> Self {
        Self {
            script,
            calls_per_frame: calls_per_frame.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of decode calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl CodeReader for ScriptedReader {
    fn decode(&self, _image: &GrayImage) -> Result<Vec<DecodedCode>, DecodeError> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let frame = call / self.calls_per_frame;
        Ok(self.script[frame % self.script.len()].clone())
    }
}
