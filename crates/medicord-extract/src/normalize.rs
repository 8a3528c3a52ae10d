// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Script normalizer: one-way digit mapping, canonical composition and
// whitespace cleanup for mixed Khmer/Latin recognised text.

use medicord_core::records::ScriptProfile;
use unicode_normalization::UnicodeNormalization;

/// Zero-width and invisible joiner characters left behind by recognition.
const INVISIBLE: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}', '\u{2060}'];

/// KHMER DIGIT ZERO. The ten digits are contiguous.
const KHMER_DIGIT_ZERO: u32 = 0x17E0;

/// Main Khmer block and the Khmer symbols block.
const KHMER_BLOCKS: [(u32, u32); 2] = [(0x1780, 0x17FF), (0x19E0, 0x19FF)];

/// Normalize recognised text.
///
/// In order: strip invisible characters, map Khmer digits to ASCII digits,
/// NFC-compose, fold line endings to `\n`, collapse runs of spaces and tabs,
/// trim every line and then the whole text. Line count is preserved apart
/// from leading and trailing blank lines.
///
/// `normalize(normalize(x)) == normalize(x)` for every input.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .filter(|c| !INVISIBLE.contains(c))
        .map(khmer_digit_to_ascii)
        .collect();
    let composed: String = mapped.nfc().collect();
    let unified = composed.replace("\r\n", "\n").replace('\r', "\n");

    let lines: Vec<String> = unified.split('\n').map(collapse_blanks).collect();
    lines.join("\n").trim().to_string()
}

/// Map a single Khmer digit to its ASCII counterpart. Other characters pass
/// through. The reverse mapping is never applied.
pub fn khmer_digit_to_ascii(c: char) -> char {
    let code = c as u32;
    if (KHMER_DIGIT_ZERO..KHMER_DIGIT_ZERO + 10).contains(&code) {
        char::from_digit(code - KHMER_DIGIT_ZERO, 10).unwrap_or(c)
    } else {
        c
    }
}

pub fn is_khmer(c: char) -> bool {
    let code = c as u32;
    KHMER_BLOCKS
        .iter()
        .any(|(start, end)| (*start..=*end).contains(&code))
}

/// Share of Khmer, Latin and digit characters among non-whitespace
/// characters. Khmer digits count as Khmer; run this before or after
/// [`normalize`] depending on which view is wanted.
pub fn script_profile(text: &str) -> ScriptProfile {
    let (mut khmer, mut latin, mut digits, mut total) = (0usize, 0usize, 0usize, 0usize);
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if is_khmer(c) {
            khmer += 1;
        } else if c.is_ascii_alphabetic() {
            latin += 1;
        } else if c.is_numeric() {
            digits += 1;
        }
    }
    if total == 0 {
        return ScriptProfile::default();
    }
    let share = |count: usize| ((count as f32 / total as f32) * 1000.0).round() / 1000.0;
    ScriptProfile {
        khmer: share(khmer),
        latin: share(latin),
        digits: share(digits),
    }
}

/// Collapse space/tab runs to one space and trim the line.
fn collapse_blanks(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out.trim().to_string()
}
