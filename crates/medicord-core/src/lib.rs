// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Medicord: Core types, records, configuration and errors shared across all crates.

pub mod config;
pub mod error;
pub mod records;
pub mod types;

pub use config::{EngineBackend, EngineInput, EngineSpec, EnhanceConfig, PipelineConfig};
pub use error::{ErrorClass, MedicordError, Result};
pub use records::*;
pub use types::*;
