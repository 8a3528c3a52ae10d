// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page enhancement pipeline: grayscale, deskew, denoise, local contrast and
// adaptive binarization, tuned for recognising scanned or photographed pages.

use image::{DynamicImage, GrayImage, Luma};
use medicord_core::EnhanceConfig;
use medicord_core::error::MedicordError;
use tracing::{debug, info, instrument, warn};

use crate::image::processor::ImageProcessor;
use crate::page::{EnhanceStage, EnhancedPage, Page};
use crate::scan::clahe::clahe;
use crate::scan::denoise::non_local_means;
use crate::scan::deskew::deskew;

/// Pages smaller than this on either side are passed through untouched.
pub const MIN_DIMENSION: u32 = 8;

/// Runs the enhancement stages over one page at a time.
///
/// Enhancement never fails: a degenerate page comes back unchanged, and a
/// stage that cannot be applied ends the run with the best image so far.
#[derive(Debug, Clone, Default)]
pub struct PageEnhancer {
    config: EnhanceConfig,
}

impl PageEnhancer {
    pub fn new(config: EnhanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    // -- Pipeline -------------------------------------------------------------

    /// Enhance one page.
    ///
    /// ## Stages
    ///
    /// 0. Upscale to a minimum height (only when configured)
    /// 1. Grayscale reduction
    /// 2. Deskew (skipped when no reliable angle is found)
    /// 3. Non-local means denoise
    /// 4. Tiled, contrast-limited histogram equalisation
    /// 5. Adaptive binarization
    #[instrument(skip(self, page), fields(page = page.index))]
    pub fn enhance(&self, page: Page) -> EnhancedPage {
        let (width, height) = (page.image.width(), page.image.height());
        if width < MIN_DIMENSION || height < MIN_DIMENSION {
            warn!(width, height, "Degenerate page dimensions; skipping enhancement");
            return EnhancedPage::unchanged(page);
        }

        let index = page.index;
        let mut stages = Vec::with_capacity(6);
        let mut processor = ImageProcessor::from_dynamic(page.image);

        match self.config.upscale_min_height {
            Some(min_height) if height < min_height => {
                processor = processor.upscale_to_height(min_height);
                stages.push(EnhanceStage::Upscale);
            }
            _ => {}
        }

        let gray = processor.grayscale().into_dynamic().to_luma8();
        stages.push(EnhanceStage::Grayscale);

        let gray = match deskew(&gray, &self.config) {
            Some(rotated) => {
                stages.push(EnhanceStage::Deskew);
                rotated
            }
            None => gray,
        };

        let cfg = &self.config;
        let denoised = match non_local_means(
            &gray,
            cfg.denoise_strength,
            cfg.denoise_search_radius,
            cfg.denoise_patch_radius,
        ) {
            Ok(img) => img,
            Err(err) => return stopped(index, gray, None, stages, EnhanceStage::Denoise, err),
        };
        stages.push(EnhanceStage::Denoise);

        let contrast = match clahe(&denoised, cfg.clahe_clip_limit, cfg.clahe_grid) {
            Ok(img) => img,
            Err(err) => {
                return stopped(index, denoised, None, stages, EnhanceStage::LocalContrast, err);
            }
        };
        stages.push(EnhanceStage::LocalContrast);

        let binary = binarize(&contrast, cfg.binarize_block_radius, cfg.binarize_offset);
        stages.push(EnhanceStage::Binarize);

        info!(?stages, "Page enhanced");
        EnhancedPage {
            index,
            primary: DynamicImage::ImageLuma8(binary),
            contrast: Some(DynamicImage::ImageLuma8(contrast)),
            stages,
        }
    }
}

/// Finish early with the best image produced so far.
fn stopped(
    index: usize,
    best: GrayImage,
    contrast: Option<GrayImage>,
    stages: Vec<EnhanceStage>,
    failed: EnhanceStage,
    err: MedicordError,
) -> EnhancedPage {
    warn!(?failed, %err, "Enhancement stage failed; keeping best image so far");
    EnhancedPage {
        index,
        primary: DynamicImage::ImageLuma8(best),
        contrast: contrast.map(DynamicImage::ImageLuma8),
        stages,
    }
}

// -- Binarization -------------------------------------------------------------

/// Adaptive thresholding to a black-and-white image.
///
/// A pixel is ink when it is darker than the mean of its `block_radius`
/// window minus `offset`. Ink becomes black, everything else white.
#[instrument(skip(gray), fields(width = gray.width(), height = gray.height()))]
pub fn binarize(gray: &GrayImage, block_radius: u32, offset: i32) -> GrayImage {
    let window = WindowMeans::new(gray);
    let radius = block_radius as usize;

    let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let threshold = (window.mean(x as usize, y as usize, radius) as i32 - offset).clamp(0, 255);
        let ink = i32::from(gray.get_pixel(x, y).0[0]) < threshold;
        Luma([if ink { 0 } else { 255 }])
    });

    debug!(block_radius, offset, "Binarization complete");
    binary
}

/// Summed-area table over a grayscale page, giving the mean of any
/// axis-aligned window in constant time.
struct WindowMeans {
    /// `(width + 1) x (height + 1)`, zero first row and column.
    sums: Vec<u64>,
    width: usize,
    height: usize,
}

impl WindowMeans {
    fn new(gray: &GrayImage) -> Self {
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let stride = width + 1;
        let mut sums = vec![0u64; stride * (height + 1)];
        for (y, row) in gray.rows().enumerate() {
            let mut running = 0u64;
            for (x, pixel) in row.enumerate() {
                running += u64::from(pixel.0[0]);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + running;
            }
        }
        Self {
            sums,
            width,
            height,
        }
    }

    fn at(&self, x: usize, y: usize) -> u64 {
        self.sums[y * (self.width + 1) + x]
    }

    /// Mean of the `2 * radius + 1` square around (x, y), cut to the page.
    fn mean(&self, x: usize, y: usize, radius: usize) -> u32 {
        let (left, top) = (x.saturating_sub(radius), y.saturating_sub(radius));
        let right = x.saturating_add(radius).saturating_add(1).min(self.width);
        let bottom = y.saturating_add(radius).saturating_add(1).min(self.height);
        let count = ((right - left) * (bottom - top)) as u64;
        if count == 0 {
            return 128;
        }
        let total = self.at(right, bottom) + self.at(left, top)
            - self.at(right, top)
            - self.at(left, bottom);
        (total / count) as u32
    }
}

// -- Tests --------------------------------------------------------------------
