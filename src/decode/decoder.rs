//! Multi-transform frame decoder.

use super::transform::{self, Transform};
use super::{CodeReader, DecodeError, DecodedCode};
use crate::capture::Frame;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::collections::HashSet;

/// Box colour used for annotations.
const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Annotation line thickness in pixels.
const ANNOTATION_THICKNESS: u32 = 2;

/// Result of decoding one frame.
#[derive(Debug, Default)]
pub struct FrameDecode {
    /// Unique codes in discovery order.
    pub codes: Vec<DecodedCode>,
    /// Transforms whose decode attempt failed, with the reason.
    pub failures: Vec<(Transform, DecodeError)>,
}

impl FrameDecode {
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Runs a reader over every preprocessing transform of a frame and merges
/// the results.
///
/// A failing transform only loses its own candidates. Duplicate payloads are
/// collapsed, keeping the first occurrence with its symbology and box.
pub struct MultiTransformDecoder {
    reader: Box<dyn CodeReader>,
}

impl MultiTransformDecoder {
    pub fn new(reader: impl CodeReader + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    /// Decodes a single frame. Does not consult session history.
    pub fn decode(&self, frame: &Frame) -> FrameDecode {
        let Some(gray) = frame.to_gray_image() else {
            tracing::warn!(sequence = frame.sequence(), "Malformed frame skipped");
            return FrameDecode {
                codes: Vec::new(),
                failures: vec![(Transform::Grayscale, DecodeError::InvalidFrame)],
            };
        };

        let mut result = FrameDecode::default();
        let mut seen = HashSet::new();

        for (transform, image) in transform::apply_all(&gray) {
            match self.reader.decode(&image) {
                Ok(codes) => {
                    for code in codes {
                        if seen.insert(code.payload.clone()) {
                            tracing::trace!(
                                %transform,
                                payload = %code.payload,
                                symbology = %code.symbology,
                                "Candidate decoded"
                            );
                            result.codes.push(code);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(%transform, error = %e, "Transform decode failed");
                    result.failures.push((transform, e));
                }
            }
        }

        result
    }
}

/// A display copy of a frame with code outlines drawn in.
#[derive(Debug, Clone)]
pub struct Annotated {
    pub image: RgbImage,
    /// Text for each code and where to draw it (above its box).
    pub labels: Vec<(String, u32, u32)>,
}

/// Draws the bounding box of every code onto a copy of `frame`.
///
/// Returns `None` for malformed frames. Text rendering is left to the
/// presentation layer.
pub fn annotate(frame: &Frame, codes: &[DecodedCode]) -> Option<Annotated> {
    let mut image = frame.to_rgb_image()?;
    let mut labels = Vec::with_capacity(codes.len());

    for code in codes {
        draw_rect(&mut image, code);
        labels.push((code.label(), code.bbox.x, code.bbox.y.saturating_sub(10)));
    }

    Some(Annotated { image, labels })
}

fn draw_rect(image: &mut RgbImage, code: &DecodedCode) {
    let bbox = code.bbox;
    // Inset one pixel per pass to thicken the outline.
    for inset in 0..ANNOTATION_THICKNESS {
        let width = bbox.width.saturating_sub(2 * inset);
        let height = bbox.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(image, rect, ANNOTATION_COLOR);
    }
}
