// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// medicord-pipeline: Recognition orchestration.
//
// Decides which engines see each page, reconciles their results, assembles
// the document result and routes large documents to deferred jobs.

pub mod orchestrator;
pub mod page;
pub mod processor;
pub mod request;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::Orchestrator;
pub use page::recognize_page;
pub use processor::{DocumentProcessor, ProgressFn};
pub use request::{AcceptedDocument, DocumentRequest};
pub use worker::{DeferredWorker, TaskExecutor, TokioExecutor, Work, WorkHandler};
