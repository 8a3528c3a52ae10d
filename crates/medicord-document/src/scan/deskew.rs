// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Skew estimation from dominant text lines (Canny + Hough) and rotation.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hough::{LineDetectionOptions, PolarLine, detect_lines};
use medicord_core::EnhanceConfig;
use tracing::{debug, instrument};

use crate::image::processor::rotate_gray;

/// Lines within this many degrees of the median count as agreeing.
const AGREEMENT_TOLERANCE: f32 = 1.0;

/// Fewest near-horizontal lines needed before an angle is trusted.
const MIN_SUPPORTING_LINES: usize = 2;

/// Estimated rotation of the text lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    /// Clockwise tilt of the text lines in degrees.
    pub angle: f32,
    /// Fraction of candidate lines within tolerance of `angle`.
    pub agreement: f32,
    pub support: usize,
}

/// Estimate the dominant text-line angle.
///
/// Returns `None` when too few near-horizontal lines are found or they
/// disagree with each other.
#[instrument(skip(gray), fields(width = gray.width(), height = gray.height()))]
pub fn estimate_skew(gray: &GrayImage, max_angle: f32, min_agreement: f32) -> Option<SkewEstimate> {
    let blurred = gaussian_blur_f32(gray, 1.0);
    let edges = canny(&blurred, 50.0, 150.0);

    // Text lines should span a good part of the page width.
    let vote_threshold = ((gray.width() as f32) * 0.25).max(30.0) as u32;
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold,
            suppression_radius: 8,
        },
    );

    let mut angles = near_horizontal_skews(&lines, max_angle);
    debug!(
        line_count = lines.len(),
        candidates = angles.len(),
        vote_threshold,
        "Hough lines detected"
    );
    if angles.len() < MIN_SUPPORTING_LINES {
        return None;
    }

    angles.sort_by(|a, b| a.total_cmp(b));
    let median = angles[angles.len() / 2];
    let support = angles
        .iter()
        .filter(|a| (*a - median).abs() <= AGREEMENT_TOLERANCE)
        .count();
    let agreement = support as f32 / angles.len() as f32;

    if agreement < min_agreement {
        debug!(median, agreement, "Line angles disagree; no reliable skew");
        return None;
    }
    Some(SkewEstimate {
        angle: median,
        agreement,
        support,
    })
}

/// Rotate the page so its text lines are level.
///
/// Returns `None` (leave the page alone) when no reliable angle was found or
/// the correction would be smaller than `deskew_min_angle`.
pub fn deskew(gray: &GrayImage, config: &EnhanceConfig) -> Option<GrayImage> {
    let estimate = estimate_skew(gray, config.deskew_max_angle, config.deskew_min_agreement)?;
    if estimate.angle.abs() < config.deskew_min_angle {
        return None;
    }
    debug!(angle = estimate.angle, agreement = estimate.agreement, "Correcting skew");
    Some(rotate_gray(gray, -estimate.angle))
}

/// Convert Hough normals to line tilts, keeping lines close to horizontal.
///
/// A horizontal line has its normal at 90 degrees, so the tilt is the
/// normal's offset from 90.
fn near_horizontal_skews(lines: &[PolarLine], max_angle: f32) -> Vec<f32> {
    lines
        .iter()
        .map(|line| line.angle_in_degrees as f32 - 90.0)
        .filter(|skew| skew.abs() <= max_angle)
        .collect()
}
