// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// What a caller submits, and what intake turns it into.

use medicord_core::types::ScriptHint;
use medicord_document::IntakeReport;

/// Raw input as received from a caller.
#[derive(Debug, Clone, Default)]
pub struct DocumentRequest {
    pub bytes: Vec<u8>,
    /// Declared file name; its extension must agree with the content.
    pub file_name: Option<String>,
    /// e.g. `khm+eng`. The configured default applies when absent.
    pub script_hint: Option<String>,
    /// Opaque caller identifier copied onto the result.
    pub correlation_id: Option<String>,
}

impl DocumentRequest {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Self::default()
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_script_hint(mut self, hint: impl Into<String>) -> Self {
        self.script_hint = Some(hint.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// A request that passed intake. Decoding happens later, on whichever
/// thread processes it.
#[derive(Debug, Clone)]
pub struct AcceptedDocument {
    pub bytes: Vec<u8>,
    pub report: IntakeReport,
    pub script_hint: ScriptHint,
    pub correlation_id: Option<String>,
}

impl AcceptedDocument {
    pub fn page_count(&self) -> usize {
        self.report.page_count
    }
}
