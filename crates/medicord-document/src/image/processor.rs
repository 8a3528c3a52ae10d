// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor: decoding, upscaling, grayscale reduction, rotation and
// PNG encoding for page rasters. Operates on in-memory images using the
// `image` and `imageproc` crates.

use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, Luma};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use medicord_core::error::MedicordError;
use tracing::{debug, info, instrument};

/// Processing steps applied to a single in-memory page raster.
///
/// Each method consumes `self` and returns a new `ImageProcessor`, enabling
/// method chaining.
///
/// ```ignore
/// let png = ImageProcessor::from_bytes(&bytes)?
///     .upscale_to_height(1000)
///     .to_png_bytes()?;
/// ```
pub struct ImageProcessor {
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Decode raw image bytes (JPEG, PNG, TIFF, BMP).
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self, MedicordError> {
        let img = image::load_from_memory(data).map_err(|err| {
            MedicordError::UnreadableDocument(format!("failed to decode image: {}", err))
        })?;
        debug!(
            width = img.width(),
            height = img.height(),
            "Image decoded from bytes"
        );
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Scale up (cubic) so the image is at least `min_height` tall.
    /// Taller images are returned untouched.
    #[instrument(skip(self), fields(min_height))]
    pub fn upscale_to_height(self, min_height: u32) -> Self {
        let (w, h) = (self.image.width(), self.image.height());
        if h == 0 || h >= min_height {
            return self;
        }
        let scale = min_height as f64 / h as f64;
        let new_w = ((w as f64) * scale).round().max(1.0) as u32;
        info!(from_h = h, to_h = min_height, scale, "Upscaling page");
        let resized = self.image.resize_exact(
            new_w,
            min_height,
            image::imageops::FilterType::CatmullRom,
        );
        Self { image: resized }
    }

    /// Collapse colour channels to a single 8-bit intensity channel.
    pub fn grayscale(self) -> Self {
        Self {
            image: DynamicImage::ImageLuma8(self.image.to_luma8()),
        }
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, MedicordError> {
        encode_png(&self.image)
    }
}

/// Encode a `DynamicImage` as PNG, returning the raw bytes.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, MedicordError> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|err| MedicordError::ImageError(format!("PNG encoding failed: {}", err)))?;
    Ok(buffer)
}

/// Rotate a grayscale page by `degrees` (positive is clockwise) about its
/// centre, filling uncovered corners with white.
pub fn rotate_gray(gray: &GrayImage, degrees: f32) -> GrayImage {
    rotate_about_center(
        gray,
        degrees.to_radians(),
        Interpolation::Bilinear,
        Luma([255u8]),
    )
}

/// Read image dimensions from the header without decoding pixel data.
pub fn header_dimensions(data: &[u8]) -> Result<(u32, u32), MedicordError> {
    ImageReader::new(std::io::Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| MedicordError::UnreadableDocument(format!("unreadable image: {}", err)))?
        .into_dimensions()
        .map_err(|err| {
            MedicordError::UnreadableDocument(format!("unreadable image header: {}", err))
        })
}
