//! Frame type representing a captured image with metadata.

use image::{imageops, DynamicImage, GrayImage, RgbImage};
use std::time::Instant;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One luma byte per pixel.
    Gray,
    /// Three bytes per pixel, R G B.
    Rgb,
}

impl PixelFormat {
    /// Bytes used by one pixel.
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb => 3,
        }
    }
}

/// A single captured frame.
///
/// Frames live for one acquisition iteration. The decoder only ever sees
/// them by shared reference.
#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp: Instant,
    sequence: u64,
}

impl Frame {
    /// Creates a new frame with the given parameters.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Creates a grayscale frame.
    pub fn gray(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self::new(pixels, width, height, PixelFormat::Gray, sequence)
    }

    /// Creates an RGB frame.
    pub fn rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self::new(pixels, width, height, PixelFormat::Rgb, sequence)
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Returns the capture timestamp.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions and format.
    pub fn is_valid(&self) -> bool {
        self.pixels.len() == self.pixel_count() * self.format.channels()
    }

    /// Converts to an owned RGB image. `None` if the buffer is malformed.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        match self.format {
            PixelFormat::Rgb => RgbImage::from_raw(self.width, self.height, self.pixels.clone()),
            PixelFormat::Gray => GrayImage::from_raw(self.width, self.height, self.pixels.clone())
                .map(|gray| DynamicImage::ImageLuma8(gray).to_rgb8()),
        }
    }

    /// Converts to an owned luma image. `None` if the buffer is malformed.
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        match self.format {
            PixelFormat::Gray => GrayImage::from_raw(self.width, self.height, self.pixels.clone()),
            PixelFormat::Rgb => RgbImage::from_raw(self.width, self.height, self.pixels.clone())
                .map(|rgb| DynamicImage::ImageRgb8(rgb).to_luma8()),
        }
    }

    /// Returns a horizontally flipped copy, keeping sequence and timestamp.
    pub fn mirrored(&self) -> Frame {
        let pixels = match self.format {
            PixelFormat::Gray => self
                .to_gray_image()
                .map(|img| imageops::flip_horizontal(&img).into_raw()),
            PixelFormat::Rgb => self
                .to_rgb_image()
                .map(|img| imageops::flip_horizontal(&img).into_raw()),
        };

        Frame {
            pixels: pixels.unwrap_or_else(|| self.pixels.clone()),
            width: self.width,
            height: self.height,
            format: self.format,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
