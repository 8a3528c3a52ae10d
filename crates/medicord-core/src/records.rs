// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structured records extracted from recognised text.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The four category buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    LabResult,
    Prescription,
    Imaging,
    Other,
}

/// A laboratory measurement line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub test_name: String,
    /// English name when the test name is a known Khmer term.
    pub test_name_en: Option<String>,
    /// Value as it appeared in the text.
    pub raw_value: String,
    /// Parsed value, absent when the raw text is not numeric.
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    /// Value outside the reference range. Absent when either side is unknown.
    pub abnormal: Option<bool>,
    /// Printed flag such as `H` or `Low`.
    pub flag: Option<String>,
    pub confidence: f32,
    pub lines: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    pub medication: String,
    pub strength: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub duration: Option<String>,
    pub confidence: f32,
    pub lines: Vec<usize>,
}

/// An imaging study, possibly assembled from several lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagingFinding {
    pub modality: Option<String>,
    pub body_part: Option<String>,
    pub findings: Option<String>,
    pub impression: Option<String>,
    pub confidence: f32,
    pub lines: Vec<usize>,
}

/// Text that matched no template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherContent {
    pub content: String,
    pub confidence: f32,
    pub lines: Vec<usize>,
}

/// All records, grouped by bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Categories {
    pub lab_results: Vec<LabResult>,
    pub prescriptions: Vec<Prescription>,
    pub imaging: Vec<ImagingFinding>,
    pub other: Vec<OtherContent>,
}

impl Categories {
    pub fn is_empty(&self) -> bool {
        self.lab_results.is_empty()
            && self.prescriptions.is_empty()
            && self.imaging.is_empty()
            && self.other.is_empty()
    }

    /// Every line number consumed by any record, with its bucket.
    pub fn line_assignments(&self) -> Vec<(usize, Category)> {
        let mut out = Vec::new();
        let tag = |lines: &[usize], category: Category, out: &mut Vec<(usize, Category)>| {
            out.extend(lines.iter().map(|line| (*line, category)));
        };
        for record in &self.lab_results {
            tag(&record.lines, Category::LabResult, &mut out);
        }
        for record in &self.prescriptions {
            tag(&record.lines, Category::Prescription, &mut out);
        }
        for record in &self.imaging {
            tag(&record.lines, Category::Imaging, &mut out);
        }
        for record in &self.other {
            tag(&record.lines, Category::Other, &mut out);
        }
        out.sort_by_key(|(line, _)| *line);
        out
    }
}

/// Best-effort document metadata. Every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub report_date: Option<NaiveDate>,
    pub facility: Option<String>,
    pub clinician: Option<String>,
}

/// Share of each script among non-whitespace characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptProfile {
    pub khmer: f32,
    pub latin: f32,
    pub digits: f32,
}
