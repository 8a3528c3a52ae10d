// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MedicordError, Result};
use crate::types::DocumentType;

/// Settings passed to the orchestrator at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Primary results at or above this confidence skip the fallbacks.
    pub confidence_threshold: f32,
    /// Documents with more pages than this are processed as deferred jobs.
    pub async_page_threshold: usize,
    /// Engines in declaration order. The first one is the primary.
    pub engines: Vec<EngineSpec>,
    /// Used when the caller does not supply a script hint.
    pub default_script_hint: String,
    pub max_file_size_mb: u64,
    pub allowed_types: Vec<DocumentType>,
    /// Recognise the pages of one document in parallel.
    pub parallel_pages: bool,
    pub enhancement: EnhanceConfig,
    /// SQLite job database. In-memory job tracking when absent.
    pub job_db_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            async_page_threshold: 5,
            engines: vec![
                EngineSpec::tesseract("tesseract-lstm", 6, EngineInput::Binarized),
                EngineSpec::tesseract("tesseract-sparse", 11, EngineInput::Contrast),
            ],
            default_script_hint: "khm+eng".to_string(),
            max_file_size_mb: 10,
            allowed_types: vec![
                DocumentType::Jpeg,
                DocumentType::Png,
                DocumentType::Pdf,
                DocumentType::Tiff,
                DocumentType::Bmp,
            ],
            parallel_pages: true,
            enhancement: EnhanceConfig::default(),
            job_db_path: None,
        }
    }
}

/// One recognition backend and how it should be fed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSpec {
    pub id: String,
    pub backend: EngineBackend,
    #[serde(default)]
    pub input: EngineInput,
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

fn default_engine_timeout() -> u64 {
    120
}

impl EngineSpec {
    /// A Tesseract LSTM engine with the given page segmentation mode.
    pub fn tesseract(id: &str, psm: u8, input: EngineInput) -> Self {
        Self {
            id: id.to_string(),
            backend: EngineBackend::Tesseract {
                binary: PathBuf::from("tesseract"),
                psm,
                oem: 1,
                tessdata_dir: None,
            },
            input,
            timeout_secs: default_engine_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineBackend {
    /// The `tesseract` command line program.
    Tesseract {
        binary: PathBuf,
        psm: u8,
        oem: u8,
        tessdata_dir: Option<PathBuf>,
    },
}

/// Which enhanced variant of a page an engine receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineInput {
    /// Output of adaptive binarization.
    #[default]
    Binarized,
    /// Denoised, contrast-equalised grayscale before binarization.
    Contrast,
}

/// Parameters for the image enhancement stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    /// Upscale pages shorter than this before enhancing.
    pub upscale_min_height: Option<u32>,
    /// Lines steeper than this are not text lines.
    pub deskew_max_angle: f32,
    /// Smaller estimated skews are left alone.
    pub deskew_min_angle: f32,
    /// Fraction of candidate lines that must agree with the median angle.
    pub deskew_min_agreement: f32,
    /// Non-local means filter strength.
    pub denoise_strength: f32,
    pub denoise_search_radius: u32,
    pub denoise_patch_radius: u32,
    pub clahe_clip_limit: f32,
    /// Tiles per side for local histogram equalisation.
    pub clahe_grid: u32,
    pub binarize_block_radius: u32,
    /// Subtracted from the local mean before thresholding.
    pub binarize_offset: i32,
}

impl EnhanceConfig {
    /// Largest accepted binarization window radius, in pixels.
    pub const MAX_BLOCK_RADIUS: u32 = 255;
    /// Largest accepted denoise search radius. Cost grows with its square.
    pub const MAX_SEARCH_RADIUS: u32 = 21;
    pub const MAX_PATCH_RADIUS: u32 = 7;
    pub const MAX_CLAHE_GRID: u32 = 64;
    pub const MAX_UPSCALE_HEIGHT: u32 = 10_000;

    /// Reject values that would make a stage unbounded in time or memory.
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("binarize_block_radius", self.binarize_block_radius, 1, Self::MAX_BLOCK_RADIUS),
            ("denoise_search_radius", self.denoise_search_radius, 1, Self::MAX_SEARCH_RADIUS),
            ("denoise_patch_radius", self.denoise_patch_radius, 0, Self::MAX_PATCH_RADIUS),
            ("clahe_grid", self.clahe_grid, 1, Self::MAX_CLAHE_GRID),
            (
                "upscale_min_height",
                self.upscale_min_height.unwrap_or(1),
                1,
                Self::MAX_UPSCALE_HEIGHT,
            ),
        ];
        for (name, value, min, max) in limits {
            if !(min..=max).contains(&value) {
                return Err(MedicordError::Config(format!(
                    "enhancement.{name} must be within [{min}, {max}], got {value}"
                )));
            }
        }
        if !self.denoise_strength.is_finite() || self.denoise_strength < 0.0 {
            return Err(MedicordError::Config(format!(
                "enhancement.denoise_strength must be a non-negative number, got {}",
                self.denoise_strength
            )));
        }
        Ok(())
    }
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            upscale_min_height: None,
            deskew_max_angle: 15.0,
            deskew_min_angle: 0.5,
            deskew_min_agreement: 0.6,
            denoise_strength: 10.0,
            denoise_search_radius: 5,
            denoise_patch_radius: 1,
            clahe_clip_limit: 2.0,
            clahe_grid: 8,
            binarize_block_radius: 15,
            binarize_offset: 11,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        info!(path = %path.display(), "Loaded pipeline configuration");
        Ok(config)
    }

    /// Apply `MEDICORD_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("MEDICORD_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_override("MEDICORD_CONFIDENCE_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("MEDICORD_ASYNC_PAGE_THRESHOLD") {
            self.async_page_threshold = parse_override("MEDICORD_ASYNC_PAGE_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("MEDICORD_MAX_FILE_SIZE_MB") {
            self.max_file_size_mb = parse_override("MEDICORD_MAX_FILE_SIZE_MB", &raw)?;
        }
        if let Some(raw) = lookup("MEDICORD_DEFAULT_LANGUAGES") {
            self.default_script_hint = raw;
        }
        if let Some(raw) = lookup("MEDICORD_JOB_DB") {
            self.job_db_path = Some(PathBuf::from(raw));
        }
        let tesseract_cmd = lookup("MEDICORD_TESSERACT_CMD");
        let tessdata = lookup("MEDICORD_TESSDATA_PREFIX");
        for spec in &mut self.engines {
            let EngineBackend::Tesseract {
                binary,
                tessdata_dir,
                ..
            } = &mut spec.backend;
            if let Some(cmd) = &tesseract_cmd {
                *binary = PathBuf::from(cmd);
            }
            if let Some(dir) = &tessdata {
                *tessdata_dir = Some(PathBuf::from(dir));
            }
        }
        debug!("Applied environment overrides");
        Ok(self)
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(MedicordError::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.engines.is_empty() {
            return Err(MedicordError::Config(
                "at least one recognition engine is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for spec in &self.engines {
            if !seen.insert(spec.id.as_str()) {
                return Err(MedicordError::Config(format!(
                    "duplicate engine id '{}'",
                    spec.id
                )));
            }
            if spec.timeout_secs == 0 {
                return Err(MedicordError::Config(format!(
                    "engine '{}' has a zero timeout",
                    spec.id
                )));
            }
        }
        if self.allowed_types.is_empty() {
            return Err(MedicordError::Config("allowed_types is empty".into()));
        }
        self.enhancement.validate()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| MedicordError::Config(format!("{} has an invalid value '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Defaults match the documented thresholds.
    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.confidence_threshold, 0.75);
        assert_eq!(config.async_page_threshold, 5);
        assert_eq!(config.engines.len(), 2);
        assert_eq!(config.engines[0].id, "tesseract-lstm");
        assert_eq!(config.max_file_size_bytes(), 10 * 1024 * 1024);
        config.validate().expect("defaults are valid");
    }

    /// Environment overrides replace thresholds and the tesseract binary.
    #[test]
    fn overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("MEDICORD_CONFIDENCE_THRESHOLD", "0.6"),
            ("MEDICORD_ASYNC_PAGE_THRESHOLD", "10"),
            ("MEDICORD_TESSERACT_CMD", "/usr/bin/tesseract"),
        ]
        .into_iter()
        .collect();
        let config = PipelineConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(config.confidence_threshold, 0.6);
        assert_eq!(config.async_page_threshold, 10);
        let EngineBackend::Tesseract { binary, .. } = &config.engines[1].backend;
        assert_eq!(binary, &PathBuf::from("/usr/bin/tesseract"));
    }

    /// Garbage in an override is a configuration error.
    #[test]
    fn bad_override_rejected() {
        let result = PipelineConfig::default().with_overrides(|key| {
            (key == "MEDICORD_ASYNC_PAGE_THRESHOLD").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(MedicordError::Config(_))));
    }

    /// Invalid settings are caught by validate().
    #[test]
    fn validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.engines.clear();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.engines[1].id = config.engines[0].id.clone();
        assert!(config.validate().is_err());
    }

    /// Enhancement windows are bounded so no stage can overflow or stall.
    #[test]
    fn validate_bounds_enhancement() {
        assert!(EnhanceConfig::default().validate().is_ok());

        let oversized = [
            EnhanceConfig {
                binarize_block_radius: u32::MAX,
                ..EnhanceConfig::default()
            },
            EnhanceConfig {
                denoise_search_radius: 1_000,
                ..EnhanceConfig::default()
            },
            EnhanceConfig {
                denoise_patch_radius: 64,
                ..EnhanceConfig::default()
            },
            EnhanceConfig {
                clahe_grid: 0,
                ..EnhanceConfig::default()
            },
            EnhanceConfig {
                upscale_min_height: Some(1_000_000),
                ..EnhanceConfig::default()
            },
            EnhanceConfig {
                denoise_strength: f32::NAN,
                ..EnhanceConfig::default()
            },
        ];
        for enhancement in oversized {
            let config = PipelineConfig {
                enhancement,
                ..PipelineConfig::default()
            };
            assert!(matches!(config.validate(), Err(MedicordError::Config(_))));
        }
    }

    /// A partial JSON file fills the rest from defaults.
    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("medicord.json");
        std::fs::write(&path, r#"{ "async_page_threshold": 2 }"#).expect("write");
        let config = PipelineConfig::load(&path).expect("load");
        assert_eq!(config.async_page_threshold, 2);
        assert_eq!(config.confidence_threshold, 0.75);
        assert_eq!(config.enhancement.clahe_grid, 8);
    }
}
