// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Declarative rule table for line categorization.
//
// A rule is a category, a pattern with named capture groups, the groups that
// must be present for the rule to apply, and the optional groups that raise
// its completeness. Rules are tried in table order; the first one that
// applies claims the line.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use medicord_core::error::MedicordError;
use medicord_core::records::Category;
use regex::Regex;

// -- Vocabulary ---------------------------------------------------------------

const LAB_UNITS: &[&str] = &[
    "mg/dL", "mmol/L", "µmol/L", "μmol/L", "umol/L", "g/dL", "g/L", "mg/L", "ng/mL", "ng/dL",
    "pg/mL", "µg/dL", "ug/dL", "U/L", "IU/L", "mIU/L", "mU/L", "µIU/mL", "uIU/mL", "mEq/L",
    "cells/µL", "cells/uL", "cells/mm3", "×10³/µL", "×10⁹/L", "×10¹²/L", "x10³/µL", "x10^3/uL",
    "x10^3/µL", "x10^9/L", "x10^12/L", "10^3/µL", "10^3/uL", "10^9/L", "10^12/L", "/µL",
    "/uL", "/mm3", "/mm³", "/HPF", "/LPF", "mm/hr", "mm/h", "mL/min", "mL/min/1.73m2", "mmHg",
    "sec", "fL", "pg", "%",
];

const MODALITIES: &[&str] = &[
    "x-ray", "x ray", "xray", "radiograph", "radiography", "ultrasound", "ultrasonography",
    "sonography", "usg", "doppler", "echocardiogram", "echocardiography", "echo", "ct scan",
    "ct", "mri", "mammogram", "mammography", "fluoroscopy", "រូបភាពអេកូ", "អេកូ", "អ៊ិចស្រាយ",
];

const BODY_PARTS: &[&str] = &[
    "whole abdomen", "upper abdomen", "lower abdomen", "abdomen", "pelvis", "chest", "thorax",
    "brain", "head", "neck", "cervical spine", "thoracic spine", "lumbar spine", "spine",
    "thyroid", "breast", "breasts", "heart", "kidney", "kidneys", "liver", "lungs", "lung",
    "knee", "hip", "shoulder", "elbow", "wrist", "hand", "ankle", "foot", "skull", "sinuses",
    "sinus", "prostate", "uterus", "ពោះ", "ទ្រូង", "ក្បាល",
];

/// Alternation over `words`, longest first so no entry shadows a longer one.
fn alternation(words: &[&str]) -> String {
    let mut sorted: Vec<&str> = words.to_vec();
    sorted.sort_by_key(|word| std::cmp::Reverse(word.chars().count()));
    sorted
        .iter()
        .map(|word| regex::escape(word))
        .collect::<Vec<_>>()
        .join("|")
}

// -- Default patterns ---------------------------------------------------------

static LAB_LINE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        concat!(
            r"(?i)^(?P<test>[\p{{L}}(][\p{{L}}\p{{M}}\d()/%.,'\-]*(?:\s+[\p{{L}}(][\p{{L}}\p{{M}}\d()/%.,'\-]*)*?)",
            r"\s*[:=]?\s*",
            r"(?P<value>[<>≤≥]?\s?\d[\dOo]*(?:[.,]\d[\dOo]*)?)",
            r"(?:\s*(?P<unit>{units}))?",
            r"(?:\s*[(\[]?\s*(?:(?:ref(?:erence)?|normal|range|N)\s*(?:range|values?)?\s*[.:]?\s*)?",
            r"(?P<reference>\d[\d.,]*\s*(?:-|–|—|~|to)\s*\d[\d.,]*|[<>≤≥]=?\s?\d[\d.,]*)\s*[)\]]?)?",
            r"(?:\s*(?P<flag>HH|LL|High|Low|H|L|\*|↑|↓))?",
            r"[\s.]*$"
        ),
        units = alternation(LAB_UNITS)
    );
    Regex::new(&pattern).expect("valid lab regex")
});

static NOT_A_TEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:age|sex|tel|phone|mobile|id|no|bed|room|page|ward|hn|mrn|patient(?:\s+id)?|អាយុ)\.?$")
        .expect("valid exclusion regex")
});

static PRESCRIPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:\d{1,2}[.)]\s*)?",
        r"(?P<medication>\p{L}[\p{L}\p{M}\-]*(?:\s+\p{L}[\p{L}\p{M}\-]*)*?)\s*",
        r"(?P<strength>\d+(?:[.,]\d+)?\s*(?:mcg|µg|μg|mg|g|ml|iu|units?)(?:\s*/\s*\d*(?:[.,]\d+)?\s*ml)?)",
        r"(?:[\s,;:)\-–]|$)",
        r"(?:.*?(?P<dosage>\b\d+(?:[.,/]\d+)?\s*(?:tablets?|tabs?|capsules?|caps?|ml|drops?|puffs?|doses?|sachets?|units?|គ្រាប់)\b))?",
        r"(?:.*?\b(?P<frequency>\d+\s*(?:times?|x)\s*(?:daily|a\s+day|per\s+day|/\s*day)|(?:once|twice)\s+(?:daily|a\s+day)|(?:every|q)\s*\d+\s*(?:hours?|hrs?|h)|bid|tid|qid|prn|od|bd|tds|qds|qhs|nocte|mane|stat|daily)\b)?",
        r"(?:.*?(?:\bfor|\bx|×)\s*(?P<duration>\d+\s*(?:days?|weeks?|months?|wks?|d)\b))?",
        r".*$"
    ))
    .expect("valid prescription regex")
});

static IMAGING_STUDY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    let body = alternation(BODY_PARTS);
    let pattern = format!(
        concat!(
            r"(?i)^(?:(?:exam(?:ination)?|study|procedure|investigation)\s*[:\-–]\s*)?",
            r"(?:(?P<body_lead>{body})\s+)?",
            r"(?P<modality>{modality})",
            r"(?:\s+(?:of\s+(?:the\s+)?)?(?P<body_part>{body}))?",
            r"(?:[\s,:;\-–(/].*)?$"
        ),
        body = body,
        modality = alternation(MODALITIES)
    );
    Regex::new(&pattern).expect("valid imaging study regex")
});

static IMAGING_FINDINGS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(?:findings?|observations?)\b|របាយការណ៍)\s*[:\-–]?\s*(?P<findings>.*)$")
        .expect("valid findings regex")
});

static IMAGING_IMPRESSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:(?:impressions?|conclusions?|opinion)\b|សន្និដ្ឋាន)\s*[:\-–]?\s*(?P<impression>.*)$",
    )
    .expect("valid impression regex")
});

// -- Rule ---------------------------------------------------------------------

/// One categorization template.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    category: Category,
    pattern: Regex,
    required: Vec<String>,
    optional: Vec<String>,
    /// Capture group → field name, for patterns that capture one field in
    /// more than one place.
    aliases: Vec<(String, String)>,
    /// Field → pattern that disqualifies the match.
    exclusions: Vec<(String, Regex)>,
    continuation: bool,
}

impl Rule {
    /// Build a rule from a pattern string.
    pub fn new(name: &str, category: Category, pattern: &str) -> Result<Self, MedicordError> {
        let pattern = Regex::new(pattern)
            .map_err(|err| MedicordError::Config(format!("rule '{}': {}", name, err)))?;
        Ok(Self::from_regex(name, category, pattern))
    }

    pub fn from_regex(name: &str, category: Category, pattern: Regex) -> Self {
        Self {
            name: name.to_string(),
            category,
            pattern,
            required: Vec::new(),
            optional: Vec::new(),
            aliases: Vec::new(),
            exclusions: Vec::new(),
            continuation: false,
        }
    }

    pub fn required(mut self, fields: &[&str]) -> Self {
        self.required = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn optional(mut self, fields: &[&str]) -> Self {
        self.optional = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn alias(mut self, group: &str, field: &str) -> Self {
        self.aliases.push((group.to_string(), field.to_string()));
        self
    }

    pub fn exclude(mut self, field: &str, pattern: Regex) -> Self {
        self.exclusions.push((field.to_string(), pattern));
        self
    }

    /// Matches attach to the most recent record of the same category.
    pub fn continuation(mut self) -> Self {
        self.continuation = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn is_continuation(&self) -> bool {
        self.continuation
    }

    /// Fields this rule knows about, required first.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .map(String::as_str)
    }

    /// Try the rule on one line.
    pub fn apply(&self, line: &str) -> Option<RuleMatch> {
        let caps = self.pattern.captures(line)?;

        let mut fields = BTreeMap::new();
        for group in self.pattern.capture_names().flatten() {
            let Some(value) = caps.name(group).map(|m| m.as_str().trim()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let field = self
                .aliases
                .iter()
                .find(|(alias, _)| alias == group)
                .map(|(_, field)| field.as_str())
                .unwrap_or(group);
            fields
                .entry(field.to_string())
                .or_insert_with(|| value.to_string());
        }

        if !self.required.iter().all(|f| fields.contains_key(f)) {
            return None;
        }
        let excluded = self.exclusions.iter().any(|(field, pattern)| {
            fields
                .get(field)
                .is_some_and(|value| pattern.is_match(value))
        });
        if excluded {
            return None;
        }

        let declared = self.required.len() + self.optional.len();
        let present =
            self.required.len() + self.optional.iter().filter(|f| fields.contains_key(*f)).count();
        let completeness = if declared == 0 {
            1.0
        } else {
            present as f32 / declared as f32
        };

        Some(RuleMatch {
            rule: self.name.clone(),
            category: self.category,
            continuation: self.continuation,
            declared: self.fields().map(str::to_string).collect(),
            fields,
            completeness,
        })
    }
}

/// A rule that applied to a line, with the field values it captured.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule: String,
    pub category: Category,
    pub continuation: bool,
    /// Every field the rule declares, present or not.
    pub declared: Vec<String>,
    pub fields: BTreeMap<String, String>,
    /// Share of declared fields that were captured.
    pub completeness: f32,
}

impl RuleMatch {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.declared.iter().any(|f| f == name)
    }
}

// -- Rule table ---------------------------------------------------------------

/// Ordered rules. The first rule that applies to a line wins.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Medical report rules: imaging findings, imaging impression,
    /// prescription, imaging study, lab result.
    pub fn default_medical() -> Self {
        Self::new(vec![
            Rule::from_regex(
                "imaging-findings",
                Category::Imaging,
                IMAGING_FINDINGS_LINE.clone(),
            )
            .optional(&["findings"])
            .continuation(),
            Rule::from_regex(
                "imaging-impression",
                Category::Imaging,
                IMAGING_IMPRESSION_LINE.clone(),
            )
            .optional(&["impression"])
            .continuation(),
            Rule::from_regex(
                "prescription",
                Category::Prescription,
                PRESCRIPTION_LINE.clone(),
            )
            .required(&["medication", "strength"])
            .optional(&["dosage", "frequency", "duration"]),
            Rule::from_regex("imaging-study", Category::Imaging, IMAGING_STUDY_LINE.clone())
                .required(&["modality"])
                .optional(&["body_part"])
                .alias("body_lead", "body_part"),
            Rule::from_regex("lab-result", Category::LabResult, LAB_LINE.clone())
                .required(&["test", "value"])
                .optional(&["unit", "reference"])
                .exclude("test", NOT_A_TEST.clone()),
        ])
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Insert at `index`, clamped to the end of the table.
    pub fn insert(&mut self, index: usize, rule: Rule) {
        let index = index.min(self.rules.len());
        self.rules.insert(index, rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule that applies to `line`.
    pub fn classify(&self, line: &str) -> Option<RuleMatch> {
        self.rules.iter().find_map(|rule| rule.apply(line))
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::default_medical()
    }
}
