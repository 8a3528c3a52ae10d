// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tesseract recognition engine.
//
// Drives the `tesseract` command line program in TSV mode, which reports one
// row per recognised word together with its confidence and its position in
// the block/paragraph/line hierarchy.
//
// # Setup
//
// The program and the language data for every script in the hint must be
// installed, e.g. on Debian:
//
// ```sh
// apt install tesseract-ocr tesseract-ocr-khm tesseract-ocr-eng
// ```
//
// A non-standard data directory is passed through `TESSDATA_PREFIX`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::DynamicImage;
use medicord_core::config::{EngineBackend, EngineSpec};
use medicord_core::error::MedicordError;
use medicord_core::types::{RecognitionResult, ScriptHint, TextUnit};
use tracing::{debug, info, instrument, warn};

use crate::image::processor::encode_png;
use crate::scan::engine::RecognitionEngine;

/// How often a running child process is checked for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// TSV row level for a single word.
const WORD_LEVEL: &str = "5";

/// One configured `tesseract` invocation.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    id: String,
    binary: PathBuf,
    psm: u8,
    oem: u8,
    tessdata_dir: Option<PathBuf>,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(id: impl Into<String>, binary: impl Into<PathBuf>, psm: u8, oem: u8) -> Self {
        Self {
            id: id.into(),
            binary: binary.into(),
            psm,
            oem,
            tessdata_dir: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Build an engine from its configuration entry.
    pub fn from_spec(spec: &EngineSpec) -> Self {
        let EngineBackend::Tesseract {
            binary,
            psm,
            oem,
            tessdata_dir,
        } = &spec.backend;
        Self {
            id: spec.id.clone(),
            binary: binary.clone(),
            psm: *psm,
            oem: *oem,
            tessdata_dir: tessdata_dir.clone(),
            timeout: Duration::from_secs(spec.timeout_secs),
        }
    }

    pub fn with_tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tessdata_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // -- Process handling -----------------------------------------------------

    /// Run the program on a PNG file and return its stdout.
    fn run(&self, png: &[u8], hint: &ScriptHint) -> Result<String, MedicordError> {
        let mut input = tempfile::Builder::new()
            .prefix("medicord-page-")
            .suffix(".png")
            .tempfile()?;
        input.write_all(png)?;
        input.flush()?;

        let mut command = Command::new(&self.binary);
        command
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(hint.joined())
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("--oem")
            .arg(self.oem.to_string())
            .arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.tessdata_dir {
            command.env("TESSDATA_PREFIX", dir);
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|err| MedicordError::EngineUnavailable {
                engine: self.id.clone(),
                reason: format!("cannot start {}: {}", self.binary.display(), err),
            })?;

        // Drain both pipes while waiting so a chatty child never blocks.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(engine = %self.id, timeout_ms = self.timeout.as_millis() as u64, "Engine timed out");
                    return Err(MedicordError::EngineTimeout {
                        engine: self.id.clone(),
                        after_ms: self.timeout.as_millis() as u64,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    return Err(self.failure(format!("wait failed: {}", err)));
                }
            }
        };

        let stdout = stdout
            .join()
            .map_err(|_| self.failure("stdout reader panicked".into()))?;
        let stderr = stderr
            .join()
            .map_err(|_| self.failure("stderr reader panicked".into()))?;

        if !status.success() {
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no diagnostic output");
            return Err(self.failure(format!("exited with {}: {}", status, detail.trim())));
        }
        Ok(stdout)
    }

    fn failure(&self, reason: String) -> MedicordError {
        MedicordError::EngineFailure {
            engine: self.id.clone(),
            reason,
        }
    }
}

impl RecognitionEngine for TesseractEngine {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip_all, fields(engine = %self.id, width = image.width(), height = image.height()))]
    fn recognize(
        &self,
        image: &DynamicImage,
        hint: &ScriptHint,
    ) -> Result<RecognitionResult, MedicordError> {
        if image.width() == 0 || image.height() == 0 {
            debug!("Empty raster; nothing to recognise");
            return Ok(RecognitionResult::empty(&self.id));
        }

        let started = Instant::now();
        let png = encode_png(image)?;
        let tsv = self.run(&png, hint)?;
        let units = parse_tsv(&tsv);
        let result = RecognitionResult::new(&self.id, units, started.elapsed().as_millis() as u64);

        info!(
            words = result.units.len(),
            confidence = result.confidence,
            elapsed_ms = result.elapsed_ms,
            "Recognition complete"
        );
        Ok(result)
    }
}

/// Read a child pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

// -- TSV parsing --------------------------------------------------------------

/// Turn Tesseract TSV output into words.
///
/// Only word rows with a positive confidence and non-blank text are kept.
/// Confidences are rescaled from 0..100 to 0..1. Lines are numbered in
/// order of first appearance across blocks and paragraphs.
pub fn parse_tsv(tsv: &str) -> Vec<TextUnit> {
    let mut units = Vec::new();
    let mut line_numbers: HashMap<(&str, &str, &str, &str), u32> = HashMap::new();

    for row in tsv.lines() {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 || columns[0] != WORD_LEVEL {
            continue;
        }
        let confidence = match columns[10].trim().parse::<f32>() {
            Ok(conf) if conf > 0.0 => (conf / 100.0).min(1.0),
            _ => continue,
        };
        // Text is the last column and may itself contain tabs.
        let text = columns[11..].join("\t");
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let key = (columns[1], columns[2], columns[3], columns[4]);
        let next = line_numbers.len() as u32;
        let line = *line_numbers.entry(key).or_insert(next);

        units.push(TextUnit {
            text: text.to_string(),
            confidence,
            line,
        });
    }

    units
}
