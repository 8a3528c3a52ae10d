// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Khmer medical vocabulary with English equivalents.

/// (Khmer, English) pairs. Longer phrases are listed alongside their parts;
/// lookup always prefers the longest match.
const TERMS: &[(&str, &str)] = &[
    ("គ្លុយកូស", "Glucose"),
    ("ឈាម", "Blood"),
    ("ទឹកនោម", "Urine"),
    ("កម្រិត", "Level"),
    ("ធម្មតា", "Normal"),
    ("មិនធម្មតា", "Abnormal"),
    ("អ្នកជំងឺ", "Patient"),
    ("វេជ្ជបណ្ឌិត", "Doctor"),
    ("មន្ទីរពេទ្យ", "Hospital"),
    ("ថ្នាំ", "Medicine"),
    ("កម្រិតថ្នាំ", "Dosage"),
    ("រោគវិនិច្ឆ័យ", "Diagnosis"),
    ("លទ្ធផល", "Result"),
    ("ការពិនិត្យ", "Examination"),
    ("សម្ពាធឈាម", "Blood Pressure"),
    ("កម្ដៅខ្លួន", "Temperature"),
    ("ជំងឺទឹកនោមផ្អែម", "Diabetes"),
    ("សម្ពាធឈាមខ្ពស់", "Hypertension"),
    ("រូបភាពអេកូ", "Ultrasound"),
    ("កោសិកាឈាមក្រហម", "Red Blood Cells"),
    ("កោសិកាឈាមស", "White Blood Cells"),
    ("ប្លាកែត", "Platelets"),
    ("ហេម៉ូក្លូប៊ីន", "Hemoglobin"),
    ("ខ្លាញ់", "Lipids"),
    ("កូឡេស្តេរ៉ុល", "Cholesterol"),
    ("ក្រេអាទីនីន", "Creatinine"),
    ("អ៊ុយរ៉េ", "Urea"),
];

/// English equivalent of a Khmer term.
///
/// An exact match wins; otherwise the longest known term contained in the
/// text is used, so `គ្លុយកូស ក្នុងឈាម` still maps to Glucose.
pub fn english_for(term: &str) -> Option<&'static str> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    if let Some(english) = TERMS
        .iter()
        .find(|(khmer, _)| *khmer == term)
        .map(|(_, english)| *english)
    {
        return Some(english);
    }
    TERMS
        .iter()
        .filter(|(khmer, _)| term.contains(khmer))
        .max_by_key(|(khmer, _)| khmer.len())
        .map(|(_, english)| *english)
}

/// Every known term, for callers building their own lookups.
pub fn terms() -> &'static [(&'static str, &'static str)] {
    TERMS
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exact terms map directly.
    #[test]
    fn exact_terms() {
        assert_eq!(english_for("គ្លុយកូស"), Some("Glucose"));
        assert_eq!(english_for(" ប្លាកែត "), Some("Platelets"));
    }

    /// The longest contained term wins over its parts.
    #[test]
    fn longest_contained_term() {
        assert_eq!(english_for("សម្ពាធឈាមខ្ពស់"), Some("Hypertension"));
        assert_eq!(english_for("កោសិកាឈាមក្រហម (RBC)"), Some("Red Blood Cells"));
        assert_eq!(english_for("គ្លុយកូស ក្នុងឈាម"), Some("Glucose"));
    }

    /// Latin text and blanks have no translation.
    #[test]
    fn unknown_terms() {
        assert_eq!(english_for("Hemoglobin"), None);
        assert_eq!(english_for(""), None);
        assert!(!terms().is_empty());
    }
}
