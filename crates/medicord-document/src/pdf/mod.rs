// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF module: page counting and page rasterization for scanned PDFs.

pub mod rasterizer;

pub use rasterizer::{EmbeddedImageRasterizer, PageRasterizer};
