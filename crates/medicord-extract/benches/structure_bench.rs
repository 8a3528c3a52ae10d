// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for normalization and structuring in medicord-extract.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use medicord_extract::{Structurer, extract_metadata, normalize};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A two-column-style lab report with Khmer digits and zero-width noise,
/// repeated to roughly the size of a multi-page document.
fn sample_report() -> String {
    let page = "មន្ទីរពេទ្យកាល់ម៉ែត / Calmette Hospital
Report Date: ២០/០១/២០២៦

Hemoglobin   ១៣.៥ g/dL (12.0-16.0)
WBC\u{200B} 11.2 x10^9/L 4.0-10.0 H
Fasting Blood Sugar: 6.0 mmol/L Ref: 3.9-5.6
គ្លុយកូស ៥.៨ mmol/L 3.9-5.6

Paracetamol 500mg 1 tab 3 times daily for 5 days
Amoxicillin 250 mg/5 ml BID x 7 days

ULTRASOUND OF THE WHOLE ABDOMEN
Findings: Liver normal in size.
Mild fatty infiltration.
Impression: Fatty liver grade I.

Dr. Socheat Nhem";
    vec![page; 8].join("\n\n--- Page Break ---\n\n")
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_normalize(c: &mut Criterion) {
    let raw = sample_report();
    c.bench_function("normalize (8 pages)", |b| {
        b.iter(|| black_box(normalize(black_box(&raw))));
    });
}

fn bench_categorize(c: &mut Criterion) {
    let text = normalize(&sample_report());
    let structurer = Structurer::default();
    c.bench_function("categorize (8 pages)", |b| {
        b.iter(|| black_box(structurer.categorize(black_box(&text))));
    });
    c.bench_function("metadata (8 pages)", |b| {
        b.iter(|| black_box(extract_metadata(black_box(&text))));
    });
}

criterion_group!(benches, bench_normalize, bench_categorize);
criterion_main!(benches);
