// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// medicord-document: Getting pages ready for recognition.
//
// Provides intake validation, image decoding, PDF page rasterization, the
// page enhancement pipeline (deskew, denoise, local contrast, binarization)
// and the recognition engine adapters.

pub mod image;
pub mod intake;
pub mod page;
pub mod pdf;
pub mod scan;

// Re-export the primary types so callers can use `medicord_document::PageEnhancer` etc.
pub use self::image::processor::ImageProcessor;
pub use intake::{IntakeReport, decode, inspect};
pub use page::{Document, EnhanceStage, EnhancedPage, Page};
pub use pdf::rasterizer::{EmbeddedImageRasterizer, PageRasterizer};
pub use scan::engine::{EngineLineup, EngineRole, EngineSlot, RecognitionEngine};
pub use scan::enhance::PageEnhancer;
pub use scan::tesseract::TesseractEngine;
