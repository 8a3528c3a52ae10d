// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted recognition engines for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use medicord_core::config::EngineInput;
use medicord_core::error::MedicordError;
use medicord_core::types::{RecognitionResult, ScriptHint, TextUnit};
use medicord_document::image::processor::encode_png;
use medicord_document::{EngineLineup, EnhancedPage, Page, RecognitionEngine};

pub(crate) enum Behaviour {
    /// Words of the text, each with the same confidence, on one line.
    Text(&'static str, f32),
    /// `page-<width>` so tests can tell pages apart.
    EchoWidth,
    Fail,
    Panic,
}

pub(crate) struct StubEngine {
    id: &'static str,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl StubEngine {
    pub(crate) fn text(id: &'static str, text: &'static str, confidence: f32) -> Arc<Self> {
        Self::with(id, Behaviour::Text(text, confidence))
    }

    pub(crate) fn echo_width(id: &'static str) -> Arc<Self> {
        Self::with(id, Behaviour::EchoWidth)
    }

    pub(crate) fn failing(id: &'static str) -> Arc<Self> {
        Self::with(id, Behaviour::Fail)
    }

    pub(crate) fn panicking(id: &'static str) -> Arc<Self> {
        Self::with(id, Behaviour::Panic)
    }

    fn with(id: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            id,
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecognitionEngine for StubEngine {
    fn id(&self) -> &str {
        self.id
    }

    fn recognize(
        &self,
        image: &DynamicImage,
        _hint: &ScriptHint,
    ) -> Result<RecognitionResult, MedicordError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let words = |text: &str, confidence: f32| {
            text.split_whitespace()
                .map(|word| TextUnit {
                    text: word.to_string(),
                    confidence,
                    line: 0,
                })
                .collect::<Vec<_>>()
        };
        match &self.behaviour {
            Behaviour::Text(text, confidence) => {
                Ok(RecognitionResult::new(self.id, words(text, *confidence), 1))
            }
            Behaviour::EchoWidth => {
                let text = format!("page-{}", image.dimensions().0);
                Ok(RecognitionResult::new(self.id, words(&text, 0.9), 1))
            }
            Behaviour::Fail => Err(MedicordError::EngineFailure {
                engine: self.id.to_string(),
                reason: "exit status 1".into(),
            }),
            Behaviour::Panic => panic!("{} crashed", self.id),
        }
    }
}

/// Lineup of stub engines, all fed the binarized page.
pub(crate) fn lineup(engines: &[&Arc<StubEngine>]) -> EngineLineup {
    let slots = engines
        .iter()
        .map(|engine| {
            let engine: Arc<dyn RecognitionEngine> = Arc::<StubEngine>::clone(*engine);
            (engine, EngineInput::Binarized)
        })
        .collect();
    EngineLineup::new(slots).expect("non-empty lineup")
}

pub(crate) fn blank_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([255])))
}

pub(crate) fn blank_page(index: usize) -> EnhancedPage {
    EnhancedPage::unchanged(Page {
        index,
        image: blank_image(64, 48),
    })
}

/// PNG bytes of a blank scan.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_png(&blank_image(width, height)).expect("encode png")
}
