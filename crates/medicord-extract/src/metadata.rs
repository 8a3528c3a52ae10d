// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metadata extractor: report date, facility and clinician.
//
// One pass over the lines; the first plausible value of each field wins.
// Nothing is guessed: a field with no match stays absent.

use std::sync::LazyLock;

use chrono::NaiveDate;
use medicord_core::records::DocumentMetadata;
use regex::{Captures, Regex};
use tracing::{debug, instrument};

/// Longest facility name kept, in characters.
const MAX_FACILITY_CHARS: usize = 100;

const EARLIEST_YEAR: i32 = 1900;
const LATEST_YEAR: i32 = 2100;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\b").expect("valid iso date regex")
});

static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})\b").expect("valid numeric date regex")
});

static DAY_MONTH_NAME_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?[\s\-]*(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?[\s\-]*(\d{4})\b")
        .expect("valid day-month date regex")
});

static MONTH_NAME_DAY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b")
        .expect("valid month-day date regex")
});

/// Lines about the patient's birth never carry the report date.
static BIRTH_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:dob|d\.o\.b|date\s+of\s+birth|birth|born)\b|ថ្ងៃខែឆ្នាំកំណើត")
        .expect("valid birth label regex")
});

static LABELLED_FACILITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:hospital|clinic|facility|centre|center|laboratory|lab|institution)(?:\s+name)?\s*[:\-–]\s*(?P<name>.+)$")
        .expect("valid labelled facility regex")
});

static NAMED_FACILITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<name>\p{Lu}[\p{L}'.&\-]*(?:\s+\p{Lu}[\p{L}'.&\-]*)*\s+(?:Hospital|Clinic|Polyclinic|Centre|Center|Laboratory|HOSPITAL|CLINIC|POLYCLINIC|CENTRE|CENTER|LABORATORY))\b")
        .expect("valid named facility regex")
});

static KHMER_FACILITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<name>(?:មន្ទីរពេទ្យ|គ្លីនិក|មណ្ឌលសុខភាព)[^:\n]+)")
        .expect("valid khmer facility regex")
});

/// A line that only states a date, such as `Report Date: 20/01/2026`.
static DATE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(?:report|exam(?:ination)?|study|collection|signed|printed|visit)\s+)?(?:date|dated|on)\s*[:\-]|^[\d/.\-\s]+$|កាលបរិច្ឆេទ")
        .expect("valid date line regex")
});

static CLINICIAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\p{L}\p{M}])(?:(?i:doctor|physician|dr|prof)\.?|វេជ្ជបណ្ឌិត)\s*[:\-]?\s*(?P<name>[\p{Lu}\p{Lo}][\p{L}\p{M}.'\-]*(?:\s+[\p{Lu}\p{Lo}][\p{L}\p{M}.'\-]*){0,3})")
        .expect("valid clinician regex")
});

/// Scan normalized text for report metadata.
#[instrument(skip_all, fields(text_len = text.len()))]
pub fn extract_metadata(text: &str) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::default();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if metadata.report_date.is_none() && !BIRTH_LABEL.is_match(line) {
            metadata.report_date = find_date(line);
        }
        if metadata.facility.is_none() {
            metadata.facility = find_facility(line);
        }
        if metadata.clinician.is_none() {
            metadata.clinician = find_clinician(line);
        }
        if metadata.report_date.is_some()
            && metadata.facility.is_some()
            && metadata.clinician.is_some()
        {
            break;
        }
    }

    debug!(
        report_date = ?metadata.report_date,
        facility = ?metadata.facility,
        clinician = ?metadata.clinician,
        "Metadata extracted"
    );
    metadata
}

/// Whether a line carries report metadata (clinician, facility or a
/// stand-alone date) rather than clinical text.
pub fn is_metadata_line(line: &str) -> bool {
    let line = line.trim();
    find_clinician(line).is_some()
        || find_facility(line).is_some()
        || (DATE_LINE.is_match(line) && find_date(line).is_some())
}

// -- Dates --------------------------------------------------------------------

/// First valid calendar date on the line.
pub fn find_date(line: &str) -> Option<NaiveDate> {
    for caps in ISO_DATE.captures_iter(line) {
        if let Some(date) = ymd(number(&caps, 1), number(&caps, 2), number(&caps, 3)) {
            return Some(date);
        }
    }
    for caps in NUMERIC_DATE.captures_iter(line) {
        let (first, second, year) = (number(&caps, 1), number(&caps, 2), number(&caps, 3));
        // Day first; month first only when that cannot be a date.
        if let Some(date) = ymd(year, second, first).or_else(|| ymd(year, first, second)) {
            return Some(date);
        }
    }
    for caps in DAY_MONTH_NAME_DATE.captures_iter(line) {
        if let Some(date) = ymd(number(&caps, 3), month(&caps, 2), number(&caps, 1)) {
            return Some(date);
        }
    }
    for caps in MONTH_NAME_DAY_DATE.captures_iter(line) {
        if let Some(date) = ymd(number(&caps, 3), month(&caps, 1), number(&caps, 2)) {
            return Some(date);
        }
    }
    None
}

fn number(caps: &Captures<'_>, group: usize) -> Option<u32> {
    caps.get(group)?.as_str().parse().ok()
}

fn month(caps: &Captures<'_>, group: usize) -> Option<u32> {
    let name = caps.get(group)?.as_str().to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == name)
        .map(|index| index as u32 + 1)
}

fn ymd(year: Option<u32>, month: Option<u32>, day: Option<u32>) -> Option<NaiveDate> {
    let year = i32::try_from(year?).ok()?;
    if !(EARLIEST_YEAR..=LATEST_YEAR).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month?, day?)
}

// -- Facility -----------------------------------------------------------------

pub fn find_facility(line: &str) -> Option<String> {
    let name = LABELLED_FACILITY
        .captures(line)
        .or_else(|| NAMED_FACILITY.captures(line))
        .or_else(|| KHMER_FACILITY.captures(line))
        .and_then(|caps| caps.name("name"))
        .map(|m| m.as_str().trim().trim_end_matches([',', ';', '.']).trim())?;

    if name.chars().count() <= 3 {
        return None;
    }
    Some(name.chars().take(MAX_FACILITY_CHARS).collect::<String>().trim_end().to_string())
}

// -- Clinician ----------------------------------------------------------------

/// Clinician name, reported as `Dr. <name>`.
pub fn find_clinician(line: &str) -> Option<String> {
    let name = CLINICIAN.captures(line)?.name("name")?.as_str().trim();
    let name = name.trim_end_matches([',', ';', '.']);
    if name.chars().count() <= 2 {
        return None;
    }
    Some(format!("Dr. {}", name))
}
