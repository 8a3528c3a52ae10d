// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Documents, pages and enhanced pages as they move through the pipeline.

use image::DynamicImage;
use medicord_core::{DocumentType, EngineInput, ScriptHint, SourceFormat};
use serde::{Deserialize, Serialize};

/// One raster page. `index` is 0-based and follows document order.
#[derive(Debug, Clone)]
pub struct Page {
    pub index: usize,
    pub image: DynamicImage,
}

/// A decoded input document: its pages in order plus what the caller told us.
#[derive(Debug, Clone)]
pub struct Document {
    pub file_type: DocumentType,
    pub script_hint: ScriptHint,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(file_type: DocumentType, script_hint: ScriptHint, rasters: Vec<DynamicImage>) -> Self {
        let pages = rasters
            .into_iter()
            .enumerate()
            .map(|(index, image)| Page { index, image })
            .collect();
        Self {
            file_type,
            script_hint,
            pages,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn source_format(&self) -> SourceFormat {
        self.file_type.source_format()
    }
}

/// Enhancement stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhanceStage {
    Upscale,
    Grayscale,
    Deskew,
    Denoise,
    LocalContrast,
    Binarize,
}

/// A page after enhancement, carrying the same index as its source page.
#[derive(Debug, Clone)]
pub struct EnhancedPage {
    pub index: usize,
    /// Output of the last stage that succeeded.
    pub primary: DynamicImage,
    /// Grayscale image after local contrast enhancement, before binarization.
    pub contrast: Option<DynamicImage>,
    pub stages: Vec<EnhanceStage>,
}

impl EnhancedPage {
    /// The original page, passed through untouched.
    pub fn unchanged(page: Page) -> Self {
        Self {
            index: page.index,
            primary: page.image,
            contrast: None,
            stages: Vec::new(),
        }
    }

    /// True when no stage was applied.
    pub fn is_original(&self) -> bool {
        self.stages.is_empty()
    }

    /// The image an engine configured for `input` should receive.
    pub fn variant(&self, input: EngineInput) -> &DynamicImage {
        match (input, &self.contrast) {
            (EngineInput::Contrast, Some(contrast)) => contrast,
            _ => &self.primary,
        }
    }
}
