// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Medicord.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Top-level error type for all Medicord operations.
#[derive(Debug, Error)]
pub enum MedicordError {
    // -- Input errors --
    #[error("empty document")]
    EmptyDocument,

    #[error("document is {size} bytes, limit is {limit} bytes")]
    DocumentTooLarge { size: u64, limit: u64 },

    #[error("unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("unreadable document: {0}")]
    UnreadableDocument(String),

    #[error("invalid script hint: {0}")]
    InvalidScriptHint(String),

    // -- Image errors --
    #[error("image processing failed: {0}")]
    ImageError(String),

    // -- Recognition errors --
    #[error("recognition engine {engine} is unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("recognition engine {engine} failed: {reason}")]
    EngineFailure { engine: String, reason: String },

    #[error("recognition engine {engine} timed out after {after_ms} ms")]
    EngineTimeout { engine: String, after_ms: u64 },

    #[error("every recognition engine failed on page {page}: {reasons}")]
    AllEnginesFailed { page: usize, reasons: String },

    // -- Job errors --
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidJobTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job store error: {0}")]
    JobStore(String),

    #[error("work dispatch failed: {0}")]
    Dispatch(String),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where an error sits in the pipeline's failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rejected before any page entered the pipeline.
    Input,
    /// A recognition backend crashed, hung, or is missing.
    Engine,
    /// Job state could not be written, read, or dispatched.
    Infrastructure,
    /// Local I/O, serialization, or configuration problems.
    Internal,
}

impl MedicordError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyDocument
            | Self::DocumentTooLarge { .. }
            | Self::UnsupportedDocument(_)
            | Self::UnreadableDocument(_)
            | Self::InvalidScriptHint(_) => ErrorClass::Input,

            Self::EngineUnavailable { .. }
            | Self::EngineFailure { .. }
            | Self::EngineTimeout { .. }
            | Self::AllEnginesFailed { .. } => ErrorClass::Engine,

            Self::JobNotFound(_)
            | Self::InvalidJobTransition { .. }
            | Self::JobStore(_)
            | Self::Dispatch(_) => ErrorClass::Infrastructure,

            Self::ImageError(_) | Self::Config(_) | Self::Io(_) | Self::Serialization(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Stable machine-readable code, suitable for logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyDocument => "EMPTY_DOCUMENT",
            Self::DocumentTooLarge { .. } => "FILE_TOO_LARGE",
            Self::UnsupportedDocument(_) => "INVALID_FILE_TYPE",
            Self::UnreadableDocument(_) => "UNREADABLE_DOCUMENT",
            Self::InvalidScriptHint(_) => "INVALID_SCRIPT_HINT",
            Self::ImageError(_) => "IMAGE_ERROR",
            Self::EngineUnavailable { .. } => "ENGINE_UNAVAILABLE",
            Self::EngineFailure { .. } => "ENGINE_FAILURE",
            Self::EngineTimeout { .. } => "ENGINE_TIMEOUT",
            Self::AllEnginesFailed { .. } => "OCR_FAILED",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::InvalidJobTransition { .. } => "INVALID_JOB_TRANSITION",
            Self::JobStore(_) => "JOB_STORE_ERROR",
            Self::Dispatch(_) => "DISPATCH_FAILED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Hard failures of a single engine that the orchestrator may route around.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Self::EngineUnavailable { .. } | Self::EngineFailure { .. } | Self::EngineTimeout { .. }
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MedicordError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Input validation failures are reported as input errors.
    #[test]
    fn input_errors_classified() {
        assert_eq!(MedicordError::EmptyDocument.class(), ErrorClass::Input);
        assert_eq!(
            MedicordError::UnreadableDocument("bad xref".into()).class(),
            ErrorClass::Input
        );
        assert_eq!(
            MedicordError::DocumentTooLarge { size: 20, limit: 10 }.code(),
            "FILE_TOO_LARGE"
        );
    }

    /// Job store problems are infrastructure errors, distinct from engine failures.
    #[test]
    fn job_store_is_infrastructure() {
        let err = MedicordError::JobStore("disk full".into());
        assert_eq!(err.class(), ErrorClass::Infrastructure);
        assert!(!err.is_engine_failure());
    }

    /// Timeouts count as a hard engine failure.
    #[test]
    fn timeout_is_engine_failure() {
        let err = MedicordError::EngineTimeout {
            engine: "tesseract-lstm".into(),
            after_ms: 500,
        };
        assert!(err.is_engine_failure());
        assert_eq!(err.class(), ErrorClass::Engine);
        assert!(err.to_string().contains("500 ms"));
    }
}
