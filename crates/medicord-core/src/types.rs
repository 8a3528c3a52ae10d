// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Medicord recognition pipeline.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MedicordError;
use crate::records::{Categories, DocumentMetadata, ScriptProfile};

/// Separator placed between page texts in a [`DocumentResult`].
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// Unique identifier for a deferred recognition job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = MedicordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|err| MedicordError::JobStore(format!("invalid job id '{}': {}", s, err)))
    }
}

/// Lifecycle states of a deferred job.
///
/// Transitions only move forward: `Pending -> Running -> {Completed | Failed}`,
/// plus `Pending -> Failed` when work could not be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States a job must be in before it may enter `self`.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[],
            Self::Running => &[Self::Pending],
            Self::Completed => &[Self::Running],
            Self::Failed => &[Self::Pending, Self::Running],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = MedicordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(MedicordError::JobStore(format!(
                "unknown job status '{}'",
                other
            ))),
        }
    }
}

/// Whether a document is a single raster image or a paginated container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Image,
    Paginated,
}

/// Supported input document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Jpeg,
    Png,
    Tiff,
    Bmp,
}

impl DocumentType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
        }
    }

    /// Short name used in results and the job store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
        }
    }

    /// Infer document type from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Identify the type from leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF-") {
            Some(Self::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(Self::Tiff)
        } else if bytes.starts_with(b"BM") {
            Some(Self::Bmp)
        } else {
            None
        }
    }

    pub fn source_format(&self) -> SourceFormat {
        match self {
            Self::Pdf => SourceFormat::Paginated,
            _ => SourceFormat::Image,
        }
    }

    pub fn is_paginated(&self) -> bool {
        self.source_format() == SourceFormat::Paginated
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-declared writing systems, e.g. `khm+eng`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptHint {
    languages: Vec<String>,
}

impl ScriptHint {
    pub fn parse(hint: &str) -> Result<Self, MedicordError> {
        let languages: Vec<String> = hint
            .split('+')
            .map(|lang| lang.trim().to_ascii_lowercase())
            .collect();

        let valid = |lang: &String| {
            !lang.is_empty()
                && lang
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if languages.is_empty() || !languages.iter().all(valid) {
            return Err(MedicordError::InvalidScriptHint(hint.to_string()));
        }
        Ok(Self { languages })
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// The hint in `a+b` form, as recognition backends expect it.
    pub fn joined(&self) -> String {
        self.languages.join("+")
    }

    pub fn includes(&self, language: &str) -> bool {
        self.languages.iter().any(|lang| lang == language)
    }
}

impl Default for ScriptHint {
    fn default() -> Self {
        Self {
            languages: vec!["khm".to_string(), "eng".to_string()],
        }
    }
}

impl std::fmt::Display for ScriptHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.joined())
    }
}

/// One recognised word with its own confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub text: String,
    pub confidence: f32,
    /// Line number within the page, used to rebuild line structure.
    pub line: u32,
}

/// Output of a single engine invocation on a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub engine: String,
    pub units: Vec<TextUnit>,
    /// Arithmetic mean of unit confidences, 0 when there are no units.
    pub confidence: f32,
    pub elapsed_ms: u64,
}

impl RecognitionResult {
    pub fn new(engine: impl Into<String>, units: Vec<TextUnit>, elapsed_ms: u64) -> Self {
        let confidence = if units.is_empty() {
            0.0
        } else {
            units.iter().map(|u| u.confidence).sum::<f32>() / units.len() as f32
        };
        Self {
            engine: engine.into(),
            units,
            confidence,
            elapsed_ms,
        }
    }

    /// Empty text, zero confidence.
    pub fn empty(engine: impl Into<String>) -> Self {
        Self::new(engine, Vec::new(), 0)
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Words joined by spaces, lines joined by newlines.
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut current_line = None;
        for unit in &self.units {
            match current_line {
                None => {}
                Some(line) if line == unit.line => out.push(' '),
                Some(_) => out.push('\n'),
            }
            out.push_str(&unit.text);
            current_line = Some(unit.line);
        }
        out
    }
}

/// Aggregate confidence an engine produced that lost the selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineScore {
    pub engine: String,
    pub confidence: f32,
}

/// A hard failure of one engine on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFailureNote {
    pub engine: String,
    pub reason: String,
}

/// The orchestrator's decision for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedPageResult {
    pub page_index: usize,
    pub winner: RecognitionResult,
    pub discarded: Vec<EngineScore>,
    pub failures: Vec<EngineFailureNote>,
    pub fallback_invoked: bool,
}

impl MergedPageResult {
    pub fn confidence(&self) -> f32 {
        self.winner.confidence
    }

    pub fn diagnostics(&self) -> PageDiagnostics {
        PageDiagnostics {
            index: self.page_index,
            engine: self.winner.engine.clone(),
            confidence: self.winner.confidence,
            fallback_invoked: self.fallback_invoked,
            discarded: self.discarded.clone(),
            failures: self.failures.clone(),
            elapsed_ms: self.winner.elapsed_ms,
        }
    }
}

/// Per-page record kept on the document result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDiagnostics {
    pub index: usize,
    pub engine: String,
    pub confidence: f32,
    pub fallback_invoked: bool,
    pub discarded: Vec<EngineScore>,
    pub failures: Vec<EngineFailureNote>,
    pub elapsed_ms: u64,
}

/// Final output of the pipeline for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    /// Normalised page texts joined with [`PAGE_BREAK`], in page order.
    pub text: String,
    /// Mean page confidence; absent for a document with no pages.
    pub confidence: Option<f32>,
    pub page_count: usize,
    pub file_type: DocumentType,
    pub extracted_at: DateTime<Utc>,
    pub categories: Categories,
    pub metadata: DocumentMetadata,
    pub script_profile: ScriptProfile,
    pub pages: Vec<PageDiagnostics>,
    /// Opaque caller identifier, returned unchanged.
    pub correlation_id: Option<String>,
}

// -- Job progress -------------------------------------------------------------

/// Where a deferred job is in the pipeline. Stages only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    Queued,
    Decoding,
    Recognizing,
    Structuring,
    Done,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Decoding => "decoding",
            Self::Recognizing => "recognizing",
            Self::Structuring => "structuring",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Progress of a deferred job, as seen by a poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub stage: JobStage,
    /// Pages whose recognition has finished.
    pub pages_done: usize,
    pub page_count: usize,
}

impl JobProgress {
    pub fn queued(page_count: usize) -> Self {
        Self {
            stage: JobStage::Queued,
            pages_done: 0,
            page_count,
        }
    }

    pub fn at(stage: JobStage, pages_done: usize, page_count: usize) -> Self {
        Self {
            stage,
            pages_done: pages_done.min(page_count),
            page_count,
        }
    }

    /// Rough completion in percent. Recognition covers 10..=70.
    pub fn percent(&self) -> u8 {
        match self.stage {
            JobStage::Queued => 0,
            JobStage::Decoding => 5,
            JobStage::Recognizing => {
                if self.page_count == 0 {
                    70
                } else {
                    let done = self.pages_done.min(self.page_count);
                    (10 + 60 * done / self.page_count) as u8
                }
            }
            JobStage::Structuring => 90,
            JobStage::Done => 100,
        }
    }

    /// True when `self` is strictly further along than `other`.
    pub fn is_ahead_of(&self, other: &JobProgress) -> bool {
        (self.stage, self.pages_done) > (other.stage, other.pages_done)
    }
}

/// Persisted state of a deferred job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub file_type: DocumentType,
    pub page_count: usize,
    /// SHA-256 of the submitted bytes (hex).
    pub document_sha256: String,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub progress: JobProgress,
    pub result: Option<DocumentResult>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn pending(
        id: JobId,
        file_type: DocumentType,
        page_count: usize,
        document_sha256: String,
        correlation_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            file_type,
            page_count,
            document_sha256,
            correlation_id,
            created_at: now,
            updated_at: now,
            progress: JobProgress::queued(page_count),
            result: None,
            error: None,
        }
    }
}

/// Handle returned when a document is routed to deferred processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: JobId,
    pub status: JobStatus,
    pub page_count: usize,
    pub correlation_id: Option<String>,
}

/// What a submission produced: a finished result or a job to poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Submission {
    Completed(Box<DocumentResult>),
    Deferred(JobTicket),
}
