// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Numeric parsing that tolerates recognition noise, and reference ranges.

use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::khmer_digit_to_ascii;

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([\dOo][\dOo.,]*)\s*(?:-|–|—|~|to)\s*([\dOo][\dOo.,]*)\s*$")
        .expect("valid range regex")
});

static BOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([<>≤≥]=?)\s*([\dOo][\dOo.,]*)\s*$").expect("valid bound regex")
});

/// Parse a measured value such as `5.8`, `12,5`, `<0.5` or `1O.2`.
///
/// Khmer digits are accepted, a comma is read as a decimal point, comparison
/// prefixes are dropped and a letter O standing among digits is read as zero.
/// Returns `None` for anything that is not a number after that cleanup.
pub fn parse_measurement(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .map(khmer_digit_to_ascii)
        .filter(|c| !c.is_whitespace() && !matches!(c, '<' | '>' | '≤' | '≥' | '='))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut number: String = cleaned
        .chars()
        .map(|c| if c == 'O' || c == 'o' { '0' } else { c })
        .collect();
    if number.contains(',') {
        number = if number.contains('.') {
            // 1,234.5 style grouping.
            number.replace(',', "")
        } else {
            number.replace(',', ".")
        };
    }

    number
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Reference interval. At least one side is always present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl ReferenceRange {
    /// Parse `3.9-5.6`, `3.9 – 5.6`, `70 to 110`, `<5.0` or `>= 60`.
    pub fn parse(raw: &str) -> Option<Self> {
        let text: String = raw.chars().map(khmer_digit_to_ascii).collect();

        if let Some(caps) = RANGE.captures(&text) {
            let low = parse_measurement(&caps[1])?;
            let high = parse_measurement(&caps[2])?;
            return (low <= high).then_some(Self {
                low: Some(low),
                high: Some(high),
            });
        }

        let caps = BOUND.captures(&text)?;
        let bound = parse_measurement(&caps[2])?;
        match &caps[1] {
            "<" | "<=" | "≤" => Some(Self {
                low: None,
                high: Some(bound),
            }),
            _ => Some(Self {
                low: Some(bound),
                high: None,
            }),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.low.is_none_or(|low| value >= low) && self.high.is_none_or(|high| value <= high)
    }
}

/// Whether `value` falls outside `range`. `None` when either is unknown or
/// the range cannot be read.
pub fn is_abnormal(value: Option<f64>, range: Option<&str>) -> Option<bool> {
    let value = value?;
    let range = ReferenceRange::parse(range?)?;
    Some(!range.contains(value))
}
