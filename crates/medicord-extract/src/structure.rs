// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structuring engine: turns normalized document text into categorized
// records, one line at a time.

use medicord_core::records::{
    Categories, Category, ImagingFinding, LabResult, OtherContent, Prescription,
};
use medicord_core::types::PAGE_BREAK;
use tracing::{debug, instrument};

use crate::glossary::english_for;
use crate::measurement::{is_abnormal, parse_measurement};
use crate::metadata::is_metadata_line;
use crate::rules::{RuleMatch, RuleTable};

/// Narrative fields of an imaging record that can run over several lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Narrative {
    Findings,
    Impression,
}

/// Where an unmatched line should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Nothing,
    Other(usize),
    Imaging(usize, Narrative),
}

/// Applies a rule table to document text.
///
/// Every non-blank line lands in exactly one record of exactly one bucket.
/// Blank lines and page-break markers separate records but belong to none.
#[derive(Debug, Clone, Default)]
pub struct Structurer {
    rules: RuleTable,
}

impl Structurer {
    pub fn new(rules: RuleTable) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RuleTable {
        &mut self.rules
    }

    /// Categorize `text`. Line numbers in the records are 0-based positions
    /// in `text`.
    #[instrument(skip_all, fields(text_len = text.len()))]
    pub fn categorize(&self, text: &str) -> Categories {
        let marker = PAGE_BREAK.trim();
        let mut categories = Categories::default();
        let mut open = Open::Nothing;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line == marker {
                open = Open::Nothing;
                continue;
            }

            open = match self.rules.classify(line) {
                Some(matched) => place(&mut categories, matched, number, line),
                None => attach_unmatched(&mut categories, open, number, line),
            };
        }

        for record in &mut categories.imaging {
            record.confidence = imaging_completeness(record);
        }

        debug!(
            lab_results = categories.lab_results.len(),
            prescriptions = categories.prescriptions.len(),
            imaging = categories.imaging.len(),
            other = categories.other.len(),
            "Text categorized"
        );
        categories
    }
}

/// Turn a rule match into a record and report what stays open.
fn place(categories: &mut Categories, matched: RuleMatch, number: usize, line: &str) -> Open {
    match matched.category {
        Category::LabResult => {
            categories.lab_results.push(lab_record(&matched, number));
            Open::Nothing
        }
        Category::Prescription => {
            categories.prescriptions.push(Prescription {
                medication: field(&matched, "medication").unwrap_or_default(),
                strength: field(&matched, "strength").unwrap_or_default(),
                dosage: field(&matched, "dosage"),
                frequency: field(&matched, "frequency"),
                duration: field(&matched, "duration"),
                confidence: matched.completeness,
                lines: vec![number],
            });
            Open::Nothing
        }
        Category::Imaging => place_imaging(categories, &matched, number),
        Category::Other => {
            categories.other.push(OtherContent {
                content: line.to_string(),
                confidence: matched.completeness,
                lines: vec![number],
            });
            Open::Nothing
        }
    }
}

fn lab_record(matched: &RuleMatch, number: usize) -> LabResult {
    let test_name = field(matched, "test").unwrap_or_default();
    let raw_value = field(matched, "value").unwrap_or_default();
    let value = parse_measurement(&raw_value);
    let reference_range = field(matched, "reference");
    let flag = field(matched, "flag");

    // A printed flag says "abnormal" when no range is there to check.
    let abnormal = match is_abnormal(value, reference_range.as_deref()) {
        Some(outside) => Some(outside),
        None if flag.is_some() => Some(true),
        None => None,
    };

    LabResult {
        test_name_en: english_for(&test_name).map(str::to_string),
        test_name,
        raw_value,
        value,
        unit: field(matched, "unit"),
        reference_range,
        abnormal,
        flag,
        confidence: matched.completeness,
        lines: vec![number],
    }
}

fn place_imaging(categories: &mut Categories, matched: &RuleMatch, number: usize) -> Open {
    let narrative = if matched.declares("findings") {
        Some(Narrative::Findings)
    } else if matched.declares("impression") {
        Some(Narrative::Impression)
    } else {
        None
    };

    // Continuations join the last study unless it already has this section.
    let target = match (matched.continuation, narrative, categories.imaging.last()) {
        (true, Some(section), Some(last)) if narrative_text(last, section).is_none() => {
            Some(categories.imaging.len() - 1)
        }
        _ => None,
    };
    let index = match target {
        Some(index) => index,
        None => {
            categories.imaging.push(ImagingFinding::default());
            categories.imaging.len() - 1
        }
    };

    let record = &mut categories.imaging[index];
    record.lines.push(number);
    if let Some(modality) = field(matched, "modality") {
        record.modality = Some(modality);
    }
    if let Some(body_part) = field(matched, "body_part") {
        record.body_part = Some(body_part);
    }
    if let Some(text) = field(matched, "findings") {
        append(&mut record.findings, &text);
    }
    if let Some(text) = field(matched, "impression") {
        append(&mut record.impression, &text);
    }

    match narrative {
        Some(section) => Open::Imaging(index, section),
        None => Open::Nothing,
    }
}

/// Unmatched lines continue an open narrative section or an open run of
/// other text, or start a new run. Signature, facility and date lines and
/// bare section labels close a narrative.
fn attach_unmatched(categories: &mut Categories, open: Open, number: usize, line: &str) -> Open {
    let open = match open {
        Open::Imaging(..) if is_metadata_line(line) || is_section_label(line) => Open::Nothing,
        other => other,
    };
    match open {
        Open::Imaging(index, section) => {
            let record = &mut categories.imaging[index];
            record.lines.push(number);
            match section {
                Narrative::Findings => append(&mut record.findings, line),
                Narrative::Impression => append(&mut record.impression, line),
            }
            open
        }
        Open::Other(index) => {
            let record = &mut categories.other[index];
            record.content.push('\n');
            record.content.push_str(line);
            record.lines.push(number);
            open
        }
        Open::Nothing => {
            categories.other.push(OtherContent {
                content: line.to_string(),
                confidence: 0.0,
                lines: vec![number],
            });
            Open::Other(categories.other.len() - 1)
        }
    }
}

/// A short heading such as `Recommendation:` with nothing after it.
fn is_section_label(line: &str) -> bool {
    line.strip_suffix(':').is_some_and(|label| {
        let label = label.trim();
        !label.is_empty()
            && label.chars().count() <= 40
            && label.chars().all(|c| c.is_alphabetic() || c == ' ' || is_khmer_mark(c))
    })
}

/// Khmer dependent vowels and diacritics.
fn is_khmer_mark(c: char) -> bool {
    ('\u{17B4}'..='\u{17D3}').contains(&c)
}

fn narrative_text(record: &ImagingFinding, section: Narrative) -> Option<&String> {
    match section {
        Narrative::Findings => record.findings.as_ref(),
        Narrative::Impression => record.impression.as_ref(),
    }
}

fn append(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(text);
        }
        None => *slot = Some(text.to_string()),
    }
}

fn field(matched: &RuleMatch, name: &str) -> Option<String> {
    matched.field(name).map(str::to_string)
}

/// Share of the four imaging fields that are filled in.
fn imaging_completeness(record: &ImagingFinding) -> f32 {
    let filled = [
        record.modality.is_some(),
        record.body_part.is_some(),
        record.findings.is_some(),
        record.impression.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    filled as f32 / 4.0
}
