// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document processor: one document from bytes to DocumentResult.
//
// Decode, enhance and recognise every page, restore page order, normalise
// each page's text, join the pages, then structure the whole text and pull
// out metadata. The same procedure serves synchronous requests and deferred
// jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::Utc;
use medicord_core::config::PipelineConfig;
use medicord_core::error::Result;
use medicord_core::types::{
    DocumentResult, JobProgress, JobStage, MergedPageResult, PAGE_BREAK, ScriptHint,
};
use medicord_document::{
    Document, EmbeddedImageRasterizer, EngineLineup, IntakeReport, Page, PageEnhancer,
    PageRasterizer, decode, inspect,
};
use medicord_extract::{Structurer, extract_metadata, normalize, script_profile};
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::page::recognize_page;
use crate::request::{AcceptedDocument, DocumentRequest};

/// Receives progress while a document is processed. Called from page
/// workers, possibly out of order.
pub type ProgressFn<'a> = &'a (dyn Fn(JobProgress) + Sync);

pub struct DocumentProcessor {
    config: PipelineConfig,
    lineup: EngineLineup,
    enhancer: PageEnhancer,
    structurer: Structurer,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl DocumentProcessor {
    /// Processor with an explicit engine lineup.
    pub fn new(config: PipelineConfig, lineup: EngineLineup) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            enhancer: PageEnhancer::new(config.enhancement.clone()),
            structurer: Structurer::default(),
            rasterizer: Arc::new(EmbeddedImageRasterizer),
            config,
            lineup,
        })
    }

    /// Processor whose engines come from `config.engines`.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let lineup = EngineLineup::from_specs(&config.engines)?;
        Self::new(config, lineup)
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_structurer(mut self, structurer: Structurer) -> Self {
        self.structurer = structurer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn lineup(&self) -> &EngineLineup {
        &self.lineup
    }

    /// Validate a request without touching any page.
    #[instrument(skip_all, fields(size = request.bytes.len(), correlation_id = ?request.correlation_id))]
    pub fn accept(&self, request: DocumentRequest) -> Result<AcceptedDocument> {
        let hint = request
            .script_hint
            .as_deref()
            .unwrap_or(&self.config.default_script_hint);
        let script_hint = ScriptHint::parse(hint)?;

        let report: IntakeReport = inspect(
            &request.bytes,
            request.file_name.as_deref(),
            &self.config,
            self.rasterizer.as_ref(),
        )?;

        Ok(AcceptedDocument {
            bytes: request.bytes,
            report,
            script_hint,
            correlation_id: request.correlation_id,
        })
    }

    /// Decode and process an accepted document.
    pub fn process(&self, document: &AcceptedDocument) -> Result<DocumentResult> {
        self.process_tracked(document, &|_| {})
    }

    /// [`process`](Self::process), reporting each stage and every finished
    /// page to `progress`.
    #[instrument(skip_all, fields(file_type = %document.report.file_type, pages = document.page_count()))]
    pub fn process_tracked(
        &self,
        document: &AcceptedDocument,
        progress: ProgressFn<'_>,
    ) -> Result<DocumentResult> {
        progress(JobProgress::at(JobStage::Decoding, 0, document.page_count()));
        let decoded = decode(
            &document.bytes,
            &document.report,
            document.script_hint.clone(),
            self.rasterizer.as_ref(),
        )?;
        self.run(decoded, document.correlation_id.clone(), progress)
    }

    /// Run every page of a decoded document through the pipeline.
    ///
    /// Fails only when some page had no engine that could run at all.
    pub fn process_document(
        &self,
        document: Document,
        correlation_id: Option<String>,
    ) -> Result<DocumentResult> {
        self.run(document, correlation_id, &|_| {})
    }

    fn run(
        &self,
        document: Document,
        correlation_id: Option<String>,
        progress: ProgressFn<'_>,
    ) -> Result<DocumentResult> {
        let started = Instant::now();
        let Document {
            file_type,
            script_hint,
            pages,
        } = document;
        let page_count = pages.len();
        let pages_done = AtomicUsize::new(0);
        progress(JobProgress::at(JobStage::Recognizing, 0, page_count));

        let recognize = |page: Page| -> Result<MergedPageResult> {
            let enhanced = self.enhancer.enhance(page);
            debug!(page = enhanced.index, stages = ?enhanced.stages, "Page enhanced");
            let merged = recognize_page(
                &enhanced,
                &self.lineup,
                &script_hint,
                self.config.confidence_threshold,
            )?;
            let done = pages_done.fetch_add(1, Ordering::Relaxed) + 1;
            progress(JobProgress::at(JobStage::Recognizing, done, page_count));
            Ok(merged)
        };

        let mut merged: Vec<MergedPageResult> = if self.config.parallel_pages && page_count > 1 {
            pages.into_par_iter().map(recognize).collect::<Result<_>>()?
        } else {
            pages.into_iter().map(recognize).collect::<Result<_>>()?
        };
        // Completion order is irrelevant; the page index decides.
        merged.sort_by_key(|page| page.page_index);

        let text = merged
            .iter()
            .map(|page| normalize(&page.winner.text()))
            .collect::<Vec<_>>()
            .join(PAGE_BREAK);
        let confidence = mean_confidence(&merged);
        progress(JobProgress::at(JobStage::Structuring, page_count, page_count));

        let categories = self.structurer.categorize(&text);
        let metadata = extract_metadata(&text);
        let script_profile = script_profile(&text);

        info!(
            %file_type,
            page_count,
            confidence = ?confidence,
            lab_results = categories.lab_results.len(),
            prescriptions = categories.prescriptions.len(),
            imaging = categories.imaging.len(),
            other = categories.other.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document processed"
        );

        Ok(DocumentResult {
            text,
            confidence,
            page_count,
            file_type,
            extracted_at: Utc::now(),
            categories,
            metadata,
            script_profile,
            pages: merged.iter().map(MergedPageResult::diagnostics).collect(),
            correlation_id,
        })
    }
}

/// Mean of the page confidences; `None` when there are no pages.
fn mean_confidence(pages: &[MergedPageResult]) -> Option<f32> {
    if pages.is_empty() {
        return None;
    }
    let total: f32 = pages.iter().map(MergedPageResult::confidence).sum();
    Some(total / pages.len() as f32)
}

impl std::fmt::Debug for DocumentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentProcessor")
            .field("engines", &self.lineup)
            .field("confidence_threshold", &self.config.confidence_threshold)
            .field("parallel_pages", &self.config.parallel_pages)
            .finish()
    }
}
