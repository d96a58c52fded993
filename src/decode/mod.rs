//! Code extraction from frames.
//!
//! The decoder converts each frame to grayscale, derives a fixed set of
//! preprocessed variants from it and runs a [`CodeReader`] over each. The
//! merged, per-frame deduplicated candidates go on to the session registry.

mod code;
mod decoder;
mod reader;
pub mod transform;

pub use code::{BoundingBox, DecodedCode, Symbology};
pub use decoder::{annotate, Annotated, FrameDecode, MultiTransformDecoder};
pub use reader::{CodeReader, DecodeError, ScriptedReader};
pub use transform::Transform;
