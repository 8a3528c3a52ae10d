// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Non-local means denoising for grayscale page rasters.

use image::GrayImage;
use medicord_core::error::MedicordError;
use rayon::prelude::*;
use tracing::{debug, instrument};

/// Non-local means filter.
///
/// Each output pixel is a weighted average of the pixels in a
/// `(2 * search_radius + 1)^2` window, weighted by how similar the
/// `(2 * patch_radius + 1)^2` patches around them are. Strokes survive
/// because patches across an edge look nothing alike. Rows are processed in
/// parallel.
#[instrument(skip(gray), fields(width = gray.width(), height = gray.height()))]
pub fn non_local_means(
    gray: &GrayImage,
    strength: f32,
    search_radius: u32,
    patch_radius: u32,
) -> Result<GrayImage, MedicordError> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(MedicordError::ImageError("cannot denoise an empty image".into()));
    }

    let src: Vec<f32> = gray.as_raw().iter().map(|v| *v as f32).collect();
    let (w, h) = (width as i64, height as i64);
    let (sr, pr) = (search_radius as i64, patch_radius as i64);
    let patch_area = ((2 * pr + 1) * (2 * pr + 1)) as f32;
    let h2 = (strength * strength).max(f32::EPSILON);

    let mut out = vec![0u8; width as usize * height as usize];
    out.par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(row_index, row)| {
            let y = row_index as i64;
            for x in 0..w {
                let mut weight_sum = 0.0f32;
                let mut value_sum = 0.0f32;
                for qy in (y - sr).max(0)..=(y + sr).min(h - 1) {
                    for qx in (x - sr).max(0)..=(x + sr).min(w - 1) {
                        let mut distance = 0.0f32;
                        for py in -pr..=pr {
                            for px in -pr..=pr {
                                let d = sample(&src, w, h, x + px, y + py)
                                    - sample(&src, w, h, qx + px, qy + py);
                                distance += d * d;
                            }
                        }
                        let weight = (-(distance / patch_area) / h2).exp();
                        weight_sum += weight;
                        value_sum += weight * sample(&src, w, h, qx, qy);
                    }
                }
                // weight_sum >= 1: the pixel always matches its own patch.
                row[x as usize] = (value_sum / weight_sum).round().clamp(0.0, 255.0) as u8;
            }
        });

    debug!(strength, search_radius, patch_radius, "Denoise complete");
    GrayImage::from_raw(width, height, out)
        .ok_or_else(|| MedicordError::ImageError("denoise buffer size mismatch".into()))
}

/// Pixel lookup with edge clamping.
#[inline]
fn sample(src: &[f32], w: i64, h: i64, x: i64, y: i64) -> f32 {
    let x = x.clamp(0, w - 1);
    let y = y.clamp(0, h - 1);
    src[(y * w + x) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn variance(img: &GrayImage) -> f64 {
        let values: Vec<f64> = img.pixels().map(|p| p.0[0] as f64).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
    }

    /// Salt-and-pepper-like speckle on a flat background is smoothed out.
    #[test]
    fn reduces_speckle() {
        let noisy = GrayImage::from_fn(32, 32, |x, y| {
            let jitter = ((x * 7 + y * 13) % 5) as i32 * 6 - 12;
            Luma([(180 + jitter) as u8])
        });
        let clean = non_local_means(&noisy, 10.0, 3, 1).expect("denoise");
        assert_eq!(clean.dimensions(), noisy.dimensions());
        assert!(variance(&clean) < variance(&noisy));
    }

    /// A sharp black/white edge stays sharp.
    #[test]
    fn preserves_edges() {
        let edge = GrayImage::from_fn(24, 24, |x, _| Luma([if x < 12 { 0u8 } else { 255u8 }]));
        let out = non_local_means(&edge, 10.0, 3, 1).expect("denoise");
        assert!(out.get_pixel(5, 10).0[0] < 10);
        assert!(out.get_pixel(18, 10).0[0] > 245);
    }

    /// Empty images are rejected rather than producing garbage.
    #[test]
    fn empty_image_is_error() {
        assert!(non_local_means(&GrayImage::new(0, 0), 10.0, 3, 1).is_err());
    }
}
