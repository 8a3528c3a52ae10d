// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// medicord-extract: From recognised text to structured records.
//
// Normalizes mixed Khmer/Latin text, classifies lines against a declarative
// rule table (lab results, prescriptions, imaging, other) and pulls out
// report metadata.

pub mod glossary;
pub mod measurement;
pub mod metadata;
pub mod normalize;
pub mod rules;
pub mod structure;

pub use measurement::{ReferenceRange, is_abnormal, parse_measurement};
pub use metadata::extract_metadata;
pub use normalize::{normalize, script_profile};
pub use rules::{Rule, RuleMatch, RuleTable};
pub use structure::Structurer;
