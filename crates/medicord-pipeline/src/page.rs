// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-page engine policy.
//
// The primary engine always runs. A result at or above the confidence
// threshold is accepted as is; anything below it (or a primary failure)
// sends the page through every fallback in declaration order and the best
// scoring result wins.

use medicord_core::error::{MedicordError, Result};
use medicord_core::types::{
    EngineFailureNote, EngineScore, MergedPageResult, RecognitionResult, ScriptHint,
};
use medicord_document::{EngineLineup, EngineSlot, EnhancedPage};
use tracing::{debug, error, info, instrument, warn};

/// Recognise one enhanced page with the engine lineup.
///
/// Returns an error only when every engine failed outright. A page on
/// which every engine ran but found nothing is an empty, zero-confidence
/// result.
#[instrument(skip(page, lineup, hint), fields(page = page.index))]
pub fn recognize_page(
    page: &EnhancedPage,
    lineup: &EngineLineup,
    hint: &ScriptHint,
    threshold: f32,
) -> Result<MergedPageResult> {
    let mut failures = Vec::new();
    let mut discarded = Vec::new();

    let mut best = match run(page, lineup.primary(), hint) {
        Ok(result) if result.confidence >= threshold => {
            debug!(
                engine = %result.engine,
                confidence = result.confidence,
                "Primary result accepted"
            );
            return Ok(MergedPageResult {
                page_index: page.index,
                winner: result,
                discarded,
                failures,
                fallback_invoked: false,
            });
        }
        Ok(result) => Some(result),
        Err(note) => {
            failures.push(note);
            None
        }
    };

    let fallback_invoked = !lineup.fallbacks().is_empty();
    for slot in lineup.fallbacks() {
        let result = match run(page, slot, hint) {
            Ok(result) => result,
            Err(note) => {
                failures.push(note);
                continue;
            }
        };
        // Strictly greater: on a tie the earlier engine keeps the page.
        match &best {
            Some(current) if result.confidence <= current.confidence => {
                discarded.push(score(&result));
            }
            _ => {
                if let Some(previous) = best.replace(result) {
                    discarded.push(score(&previous));
                }
            }
        }
    }

    let Some(mut winner) = best else {
        let reasons = failures
            .iter()
            .map(|note| format!("{}: {}", note.engine, note.reason))
            .collect::<Vec<_>>()
            .join("; ");
        error!(page = page.index, reasons = %reasons, "Every engine failed");
        return Err(MedicordError::AllEnginesFailed {
            page: page.index,
            reasons,
        });
    };

    if winner.confidence <= 0.0 && !winner.units.is_empty() {
        // Nothing any engine trusted: report the page as empty.
        winner.units.clear();
        winner.confidence = 0.0;
    }

    info!(
        page = page.index,
        engine = %winner.engine,
        confidence = winner.confidence,
        fallback_invoked,
        discarded = discarded.len(),
        failures = failures.len(),
        "Page recognised"
    );
    Ok(MergedPageResult {
        page_index: page.index,
        winner,
        discarded,
        failures,
        fallback_invoked,
    })
}

fn run(
    page: &EnhancedPage,
    slot: &EngineSlot,
    hint: &ScriptHint,
) -> std::result::Result<RecognitionResult, EngineFailureNote> {
    let engine = slot.engine.id().to_string();
    match slot.engine.recognize(page.variant(slot.input), hint) {
        Ok(result) => {
            debug!(
                engine = %engine,
                role = ?slot.role,
                confidence = result.confidence,
                units = result.units.len(),
                elapsed_ms = result.elapsed_ms,
                "Engine finished"
            );
            Ok(result)
        }
        Err(err) => {
            if err.is_engine_failure() {
                warn!(engine = %engine, role = ?slot.role, error = %err, "Engine failed");
            } else {
                error!(engine = %engine, role = ?slot.role, error = %err, "Engine errored");
            }
            Err(EngineFailureNote {
                engine,
                reason: err.to_string(),
            })
        }
    }
}

fn score(result: &RecognitionResult) -> EngineScore {
    EngineScore {
        engine: result.engine.clone(),
        confidence: result.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubEngine, blank_page, lineup};

    const THRESHOLD: f32 = 0.75;

    /// A low primary loses to a better fallback.
    #[test]
    fn fallback_wins_when_primary_is_weak() {
        let primary = StubEngine::text("primary", "Glucose 5.8", 0.60);
        let fallback = StubEngine::text("fallback", "Glucose 5.8 mmol/L", 0.90);
        let engines = lineup(&[&primary, &fallback]);

        let merged = recognize_page(&blank_page(0), &engines, &ScriptHint::default(), THRESHOLD)
            .expect("recognised");

        assert_eq!(merged.winner.engine, "fallback");
        assert_eq!(merged.winner.text(), "Glucose 5.8 mmol/L");
        assert!(merged.fallback_invoked);
        assert_eq!(
            merged.discarded,
            vec![EngineScore {
                engine: "primary".into(),
                confidence: 0.60
            }]
        );
        assert_eq!(fallback.calls(), 1);
    }

    /// A confident primary never wakes the fallback.
    #[test]
    fn confident_primary_skips_fallback() {
        let primary = StubEngine::text("primary", "Hemoglobin 13.5", 0.80);
        let fallback = StubEngine::text("fallback", "Hemoglobin 13.5 g/dL", 0.95);
        let engines = lineup(&[&primary, &fallback]);

        let merged = recognize_page(&blank_page(0), &engines, &ScriptHint::default(), THRESHOLD)
            .expect("recognised");

        assert_eq!(merged.winner.engine, "primary");
        assert!(!merged.fallback_invoked);
        assert_eq!(fallback.calls(), 0);
    }

    /// The threshold itself counts as confident.
    #[test]
    fn threshold_is_inclusive() {
        let primary = StubEngine::text("primary", "WBC 6.0", THRESHOLD);
        let fallback = StubEngine::text("fallback", "WBC 6.0", 0.99);
        let engines = lineup(&[&primary, &fallback]);

        recognize_page(&blank_page(0), &engines, &ScriptHint::default(), THRESHOLD)
            .expect("recognised");
        assert_eq!(fallback.calls(), 0);
    }

    /// Equal scores keep the first-declared engine.
    #[test]
    fn ties_go_to_declaration_order() {
        let primary = StubEngine::text("primary", "from primary", 0.50);
        let first = StubEngine::text("fallback-1", "from first", 0.70);
        let second = StubEngine::text("fallback-2", "from second", 0.70);
        let engines = lineup(&[&primary, &first, &second]);

        let merged = recognize_page(&blank_page(0), &engines, &ScriptHint::default(), THRESHOLD)
            .expect("recognised");

        assert_eq!(merged.winner.engine, "fallback-1");
        assert_eq!(merged.discarded.len(), 2);
        assert_eq!(second.calls(), 1);
    }

    /// A weak primary with nothing better still wins.
    #[test]
    fn weak_primary_kept_over_weaker_fallback() {
        let primary = StubEngine::text("primary", "Creatinine 88", 0.55);
        let fallback = StubEngine::text("fallback", "Creat1n1ne", 0.30);
        let engines = lineup(&[&primary, &fallback]);

        let merged = recognize_page(&blank_page(0), &engines, &ScriptHint::default(), THRESHOLD)
            .expect("recognised");
        assert_eq!(merged.winner.engine, "primary");
        assert_eq!(merged.discarded[0].engine, "fallback");
    }

    /// Zero confidence everywhere is an empty page, not an error.
    #[test]
    fn all_zero_is_empty_page() {
        let primary = StubEngine::text("primary", "noise", 0.0);
        let fallback = StubEngine::text("fallback", "", 0.0);
        let engines = lineup(&[&primary, &fallback]);

        let merged = recognize_page(&blank_page(3), &engines, &ScriptHint::default(), THRESHOLD)
            .expect("not an error");

        assert_eq!(merged.page_index, 3);
        assert_eq!(merged.winner.text(), "");
        assert_eq!(merged.confidence(), 0.0);
        assert!(merged.failures.is_empty());
    }

    /// A crashed primary is routed around and recorded.
    #[test]
    fn primary_failure_uses_fallback() {
        let primary = StubEngine::failing("primary");
        let fallback = StubEngine::text("fallback", "Amoxicillin 500mg", 0.65);
        let engines = lineup(&[&primary, &fallback]);

        let merged = recognize_page(&blank_page(0), &engines, &ScriptHint::default(), THRESHOLD)
            .expect("fallback rescued the page");

        assert_eq!(merged.winner.engine, "fallback");
        assert_eq!(merged.failures.len(), 1);
        assert_eq!(merged.failures[0].engine, "primary");
    }

    /// Every engine failing is fatal for the page.
    #[test]
    fn all_failures_escalate() {
        let primary = StubEngine::failing("primary");
        let fallback = StubEngine::failing("fallback");
        let engines = lineup(&[&primary, &fallback]);

        let err = recognize_page(&blank_page(2), &engines, &ScriptHint::default(), THRESHOLD)
            .unwrap_err();
        match err {
            MedicordError::AllEnginesFailed { page, reasons } => {
                assert_eq!(page, 2);
                assert!(reasons.contains("primary"));
                assert!(reasons.contains("fallback"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// A lone primary that fails has nothing to fall back to.
    #[test]
    fn single_engine_failure() {
        let primary = StubEngine::failing("primary");
        let engines = lineup(&[&primary]);
        assert!(matches!(
            recognize_page(&blank_page(0), &engines, &ScriptHint::default(), THRESHOLD),
            Err(MedicordError::AllEnginesFailed { .. })
        ));
    }
}
