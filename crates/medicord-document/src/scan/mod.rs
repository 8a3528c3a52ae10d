// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanning pipeline: page enhancement (deskew, denoise, local contrast,
// binarization) and text recognition engines.

pub mod clahe;
pub mod denoise;
pub mod deskew;
pub mod engine;
pub mod enhance;
pub mod tesseract;

pub use engine::{EngineLineup, EngineRole, EngineSlot, RecognitionEngine};
pub use enhance::PageEnhancer;
pub use tesseract::TesseractEngine;
