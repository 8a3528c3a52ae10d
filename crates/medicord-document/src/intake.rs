// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Intake: validate raw input bytes before anything enters the pipeline, and
// decode validated input into pages.

use std::path::Path;

use medicord_core::config::PipelineConfig;
use medicord_core::error::MedicordError;
use medicord_core::types::{DocumentType, ScriptHint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::image::processor::{ImageProcessor, header_dimensions};
use crate::page::Document;
use crate::pdf::rasterizer::PageRasterizer;

/// What intake learned about an accepted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeReport {
    pub file_type: DocumentType,
    pub page_count: usize,
    /// Hex SHA-256 of the raw input.
    pub sha256: String,
    pub size: usize,
}

/// Validate an input document.
///
/// Checks size, magic bytes, the declared file name (when given), and that
/// the content can actually be opened. Every rejection is an input error.
#[instrument(skip(bytes, config, rasterizer), fields(size = bytes.len()))]
pub fn inspect(
    bytes: &[u8],
    file_name: Option<&str>,
    config: &PipelineConfig,
    rasterizer: &dyn PageRasterizer,
) -> Result<IntakeReport, MedicordError> {
    if bytes.is_empty() {
        return Err(MedicordError::EmptyDocument);
    }
    let limit = config.max_file_size_bytes();
    if bytes.len() as u64 > limit {
        return Err(MedicordError::DocumentTooLarge {
            size: bytes.len() as u64,
            limit,
        });
    }

    let file_type = DocumentType::sniff(bytes).ok_or_else(|| {
        MedicordError::UnsupportedDocument("content is not a PDF, PNG, JPEG, TIFF or BMP".into())
    })?;

    if let Some(name) = file_name {
        check_declared_name(name, file_type)?;
    }
    if !config.allowed_types.contains(&file_type) {
        return Err(MedicordError::UnsupportedDocument(format!(
            "{} documents are not accepted",
            file_type
        )));
    }

    let page_count = if file_type.is_paginated() {
        let pages = rasterizer.page_count(bytes)?;
        if pages == 0 {
            return Err(MedicordError::UnreadableDocument(
                "document has no pages".into(),
            ));
        }
        pages
    } else {
        let (width, height) = header_dimensions(bytes)?;
        if width == 0 || height == 0 {
            return Err(MedicordError::UnreadableDocument(format!(
                "image has zero dimension ({}x{})",
                width, height
            )));
        }
        1
    };

    let sha256 = sha256_hex(bytes);
    info!(%file_type, page_count, sha256 = %sha256, "Input accepted");
    Ok(IntakeReport {
        file_type,
        page_count,
        sha256,
        size: bytes.len(),
    })
}

/// Decode accepted input into ordered raster pages.
#[instrument(skip(bytes, report, rasterizer), fields(file_type = %report.file_type))]
pub fn decode(
    bytes: &[u8],
    report: &IntakeReport,
    script_hint: ScriptHint,
    rasterizer: &dyn PageRasterizer,
) -> Result<Document, MedicordError> {
    let rasters = if report.file_type.is_paginated() {
        rasterizer.rasterize(bytes)?
    } else {
        vec![ImageProcessor::from_bytes(bytes)?.into_dynamic()]
    };
    debug!(pages = rasters.len(), "Document decoded");
    Ok(Document::new(report.file_type, script_hint, rasters))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A declared file name must carry an extension that names the sniffed type.
fn check_declared_name(name: &str, sniffed: DocumentType) -> Result<(), MedicordError> {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            MedicordError::UnsupportedDocument(format!("'{}' has no file extension", name))
        })?;
    let declared = DocumentType::from_extension(extension).ok_or_else(|| {
        MedicordError::UnsupportedDocument(format!("unsupported extension '.{}'", extension))
    })?;
    if declared != sniffed {
        return Err(MedicordError::UnsupportedDocument(format!(
            "'{}' is named as {} but contains {}",
            name, declared, sniffed
        )));
    }
    Ok(())
}
