// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition engine abstraction and the ordered engine lineup.

use std::sync::Arc;

use image::DynamicImage;
use medicord_core::config::{EngineInput, EngineSpec};
use medicord_core::error::MedicordError;
use medicord_core::types::{RecognitionResult, ScriptHint};

use crate::scan::tesseract::TesseractEngine;

/// Anything that can turn a page raster into scored words.
///
/// Implementations must be shareable across the page workers.
pub trait RecognitionEngine: Send + Sync {
    /// Stable identifier used in diagnostics.
    fn id(&self) -> &str;

    /// Recognise one page.
    ///
    /// Errors are hard failures (the engine could not run). Legitimately
    /// empty output is an `Ok` result with no units and zero confidence.
    fn recognize(
        &self,
        image: &DynamicImage,
        hint: &ScriptHint,
    ) -> Result<RecognitionResult, MedicordError>;
}

/// Position of an engine in the lineup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRole {
    Primary,
    /// Fallback with its declaration order, starting at 1.
    Fallback(usize),
}

/// An engine plus the enhanced variant it should be fed.
#[derive(Clone)]
pub struct EngineSlot {
    pub role: EngineRole,
    pub input: EngineInput,
    pub engine: Arc<dyn RecognitionEngine>,
}

impl std::fmt::Debug for EngineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSlot")
            .field("id", &self.engine.id())
            .field("role", &self.role)
            .field("input", &self.input)
            .finish()
    }
}

/// Primary engine followed by fallbacks in declaration order.
#[derive(Debug, Clone)]
pub struct EngineLineup {
    slots: Vec<EngineSlot>,
}

impl EngineLineup {
    /// The first engine is the primary; the rest are fallbacks.
    pub fn new(engines: Vec<(Arc<dyn RecognitionEngine>, EngineInput)>) -> Result<Self, MedicordError> {
        if engines.is_empty() {
            return Err(MedicordError::Config(
                "at least one recognition engine is required".into(),
            ));
        }
        let slots = engines
            .into_iter()
            .enumerate()
            .map(|(position, (engine, input))| EngineSlot {
                role: if position == 0 {
                    EngineRole::Primary
                } else {
                    EngineRole::Fallback(position)
                },
                input,
                engine,
            })
            .collect();
        Ok(Self { slots })
    }

    /// Instantiate every configured engine.
    pub fn from_specs(specs: &[EngineSpec]) -> Result<Self, MedicordError> {
        Self::new(
            specs
                .iter()
                .map(|spec| {
                    let engine: Arc<dyn RecognitionEngine> =
                        Arc::new(TesseractEngine::from_spec(spec));
                    (engine, spec.input)
                })
                .collect(),
        )
    }

    pub fn primary(&self) -> &EngineSlot {
        &self.slots[0]
    }

    pub fn fallbacks(&self) -> &[EngineSlot] {
        &self.slots[1..]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineSlot> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl RecognitionEngine for Fixed {
        fn id(&self) -> &str {
            self.0
        }

        fn recognize(
            &self,
            _image: &DynamicImage,
            _hint: &ScriptHint,
        ) -> Result<RecognitionResult, MedicordError> {
            Ok(RecognitionResult::empty(self.0))
        }
    }

    /// The first engine is primary and the rest keep their order.
    #[test]
    fn roles_follow_declaration_order() {
        let lineup = EngineLineup::new(vec![
            (Arc::new(Fixed("a")) as Arc<dyn RecognitionEngine>, EngineInput::Binarized),
            (Arc::new(Fixed("b")), EngineInput::Contrast),
            (Arc::new(Fixed("c")), EngineInput::Binarized),
        ])
        .expect("lineup");
        assert_eq!(lineup.primary().engine.id(), "a");
        assert_eq!(lineup.primary().role, EngineRole::Primary);
        let fallbacks: Vec<_> = lineup
            .fallbacks()
            .iter()
            .map(|s| (s.engine.id().to_string(), s.role))
            .collect();
        assert_eq!(
            fallbacks,
            vec![
                ("b".to_string(), EngineRole::Fallback(1)),
                ("c".to_string(), EngineRole::Fallback(2)),
            ]
        );
    }

    /// An empty lineup is a configuration error.
    #[test]
    fn empty_lineup_rejected() {
        assert!(matches!(
            EngineLineup::new(Vec::new()),
            Err(MedicordError::Config(_))
        ));
    }

    /// The default configuration yields a primary and one fallback.
    #[test]
    fn default_specs_build() {
        let config = medicord_core::PipelineConfig::default();
        let lineup = EngineLineup::from_specs(&config.engines).expect("lineup");
        assert_eq!(lineup.len(), 2);
        assert_eq!(lineup.primary().input, EngineInput::Binarized);
        assert_eq!(lineup.fallbacks()[0].input, EngineInput::Contrast);
    }
}
