//! Image preprocessing transforms.
//!
//! Each transform is a deterministic function of the grayscale frame. No
//! single one decodes reliably under every lighting and print condition, so
//! the decoder runs the reader over all of them.

use image::{GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold};
use imageproc::filter::gaussian_blur_f32;
use std::fmt;

/// CLAHE clip limit, relative to a flat histogram.
const CLAHE_CLIP_LIMIT: f32 = 2.0;
/// CLAHE tile grid size along each axis.
const CLAHE_GRID: u32 = 8;
/// Gaussian sigma matching a 3x3 kernel.
const DENOISE_SIGMA: f32 = 0.8;

/// A preprocessing step applied before a decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    /// Plain luma conversion.
    Grayscale,
    /// Contrast-limited adaptive histogram equalization.
    Equalized,
    /// Equalized, then Gaussian-blurred.
    EqualizedDenoised,
    /// Otsu global threshold of the plain grayscale image.
    Binarized,
}

impl Transform {
    /// Fixed decode order.
    pub const ALL: [Transform; 4] = [
        Transform::Grayscale,
        Transform::Equalized,
        Transform::EqualizedDenoised,
        Transform::Binarized,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Transform::Grayscale => "grayscale",
            Transform::Equalized => "equalized",
            Transform::EqualizedDenoised => "equalized_denoised",
            Transform::Binarized => "binarized",
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Produces every transform output for `gray`, in [`Transform::ALL`] order.
///
/// The equalized image is computed once and shared by the two transforms
/// built on it.
pub fn apply_all(gray: &GrayImage) -> Vec<(Transform, GrayImage)> {
    let equalized = equalize(gray, CLAHE_CLIP_LIMIT, CLAHE_GRID);
    let denoised = gaussian_blur_f32(&equalized, DENOISE_SIGMA);
    let binarized = otsu_binarize(gray);

    vec![
        (Transform::Grayscale, gray.clone()),
        (Transform::Equalized, equalized),
        (Transform::EqualizedDenoised, denoised),
        (Transform::Binarized, binarized),
    ]
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a `grid` x `grid` tile layout. Each tile gets its
/// own clipped-histogram lookup table; pixels are mapped by bilinear
/// interpolation between the four nearest tile centres.
pub fn equalize(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tile_w = width.div_ceil(grid.clamp(1, width));
    let tile_h = height.div_ceil(grid.clamp(1, height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(gray, x0, y0, x1, y1, clip_limit));
        }
    }

    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = gray.get_pixel(x, y).0[0] as usize;

        let (tx0, tx1, ax) = neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbours(y, tile_h, tiles_y);

        let at = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][value] as f32;
        let top = at(tx0, ty0) * (1.0 - ax) + at(tx1, ty0) * ax;
        let bottom = at(tx0, ty1) * (1.0 - ax) + at(tx1, ty1) * ax;
        let mapped = top * (1.0 - ay) + bottom * ay;

        *pixel = Luma([mapped.round().clamp(0.0, 255.0) as u8]);
    }

    out
}

/// Tile indices either side of `pos` and the weight of the second one.
fn neighbours(pos: u32, tile_size: u32, tiles: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile_size as f32 - 0.5;
    let first = (f.floor().max(0.0) as u32).min(tiles - 1);
    let second = (first + 1).min(tiles - 1);
    let weight = (f - first as f32).clamp(0.0, 1.0);
    (first, second, weight)
}

fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[gray.get_pixel(x, y).0[0] as usize] += 1;
        }
    }

    let area = (x1 - x0) * (y1 - y0);
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let per_bin = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += per_bin + u32::from(i < remainder);
    }

    let mut lut = [0u8; 256];
    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, &count) in histogram.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Otsu global threshold binarization: pixels above the threshold become
/// white (255), the rest black (0).
pub fn otsu_binarize(gray: &GrayImage) -> GrayImage {
    threshold(gray, otsu_threshold(gray))
}

/// Threshold maximising between-class variance. 0 for an empty image.
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0;
    }
    otsu_level(gray)
}
