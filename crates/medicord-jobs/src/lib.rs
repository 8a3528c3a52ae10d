// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Medicord: Job status store for documents processed out of band.

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteJobStore;
pub use store::{JobStore, MemoryJobStore, check_transition, finished_progress};
