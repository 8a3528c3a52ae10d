// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Orchestrator: routes each accepted document to synchronous processing or
// a deferred job.
//
// The routing decision is made once, from the page count intake reports,
// before any page is enhanced or recognised.

use std::sync::Arc;

use medicord_core::error::{MedicordError, Result};
use medicord_core::types::{JobId, JobRecord, JobTicket, Submission};
use medicord_jobs::JobStore;
use tracing::{error, info, instrument};

use crate::processor::DocumentProcessor;
use crate::request::DocumentRequest;
use crate::worker::{TaskExecutor, Work};

pub struct Orchestrator {
    processor: Arc<DocumentProcessor>,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn TaskExecutor>,
}

impl Orchestrator {
    pub fn new(
        processor: Arc<DocumentProcessor>,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            processor,
            store,
            executor,
        }
    }

    pub fn processor(&self) -> &Arc<DocumentProcessor> {
        &self.processor
    }

    /// Accept a document and either process it now or defer it.
    ///
    /// Input errors are returned before any job exists. Documents with more
    /// pages than `async_page_threshold` come back as a pending job ticket.
    #[instrument(skip_all, fields(correlation_id = ?request.correlation_id))]
    pub fn submit(&self, request: DocumentRequest) -> Result<Submission> {
        let document = self.processor.accept(request)?;
        let page_count = document.page_count();
        let threshold = self.processor.config().async_page_threshold;

        if page_count <= threshold {
            info!(page_count, threshold, "Processing synchronously");
            let result = self.processor.process(&document)?;
            return Ok(Submission::Completed(Box::new(result)));
        }

        let record = JobRecord::pending(
            JobId::new(),
            document.report.file_type,
            page_count,
            document.report.sha256.clone(),
            document.correlation_id.clone(),
        );
        self.store.create(&record)?;
        let ticket = JobTicket {
            job_id: record.id,
            status: record.status,
            page_count,
            correlation_id: record.correlation_id.clone(),
        };

        if let Err(err) = self.executor.submit(Work {
            job_id: record.id,
            document,
        }) {
            error!(job_id = %record.id, error = %err, "Dispatch failed");
            if let Err(store_err) = self.store.fail(&record.id, &format!("dispatch failed: {err}")) {
                error!(job_id = %record.id, error = %store_err, "Could not record dispatch failure");
            }
            return Err(match err {
                MedicordError::Dispatch(_) => err,
                other => MedicordError::Dispatch(other.to_string()),
            });
        }

        info!(job_id = %record.id, page_count, threshold, "Deferred to background job");
        Ok(Submission::Deferred(ticket))
    }

    /// Current state of a deferred job. Read-only.
    pub fn job_status(&self, id: &JobId) -> Result<JobRecord> {
        self.store.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use medicord_core::config::PipelineConfig;
    use medicord_core::types::{DocumentType, JobStatus};
    use medicord_jobs::MemoryJobStore;
    use tokio::runtime::Handle;

    use crate::testing::{StubEngine, lineup, png_bytes};
    use crate::worker::{DeferredWorker, TokioExecutor};

    /// Executor whose queue is always closed.
    #[derive(Default)]
    struct ClosedExecutor {
        seen: Mutex<Option<JobId>>,
    }

    impl TaskExecutor for ClosedExecutor {
        fn submit(&self, work: Work) -> Result<()> {
            *self.seen.lock().expect("lock") = Some(work.job_id);
            Err(MedicordError::Dispatch("queue closed".into()))
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        store: Arc<MemoryJobStore>,
    }

    fn config(async_page_threshold: usize) -> PipelineConfig {
        PipelineConfig {
            async_page_threshold,
            ..PipelineConfig::default()
        }
    }

    fn fixture(
        config: PipelineConfig,
        engines: &[&Arc<StubEngine>],
        executor: impl FnOnce(Arc<DocumentProcessor>, Arc<MemoryJobStore>) -> Arc<dyn TaskExecutor>,
    ) -> Fixture {
        let processor = Arc::new(DocumentProcessor::new(config, lineup(engines)).expect("processor"));
        let store = Arc::new(MemoryJobStore::new());
        let executor = executor(Arc::clone(&processor), Arc::clone(&store));
        Fixture {
            orchestrator: Orchestrator::new(processor, store.clone(), executor),
            store,
        }
    }

    fn tokio_executor(
        processor: Arc<DocumentProcessor>,
        store: Arc<MemoryJobStore>,
    ) -> Arc<dyn TaskExecutor> {
        let worker = Arc::new(DeferredWorker::new(processor, store));
        Arc::new(TokioExecutor::start(&Handle::current(), worker))
    }

    async fn wait_terminal(orchestrator: &Orchestrator, id: &JobId) -> JobRecord {
        for _ in 0..500 {
            let record = orchestrator.job_status(id).expect("job exists");
            if matches!(record.status, JobStatus::Completed | JobStatus::Failed) {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never finished");
    }

    /// Small documents are processed in the caller and never create a job.
    #[test]
    fn small_document_is_synchronous() {
        let engine = StubEngine::text("primary", "Hemoglobin 13.5 g/dL", 0.9);
        let fixture = fixture(config(5), &[&engine], |_, _| {
            Arc::new(ClosedExecutor::default())
        });

        let submission = fixture
            .orchestrator
            .submit(
                DocumentRequest::new(png_bytes(64, 48))
                    .with_file_name("cbc.png")
                    .with_correlation_id("visit-9"),
            )
            .expect("submitted");

        let Submission::Completed(result) = submission else {
            panic!("expected a synchronous result");
        };
        assert_eq!(result.text, "Hemoglobin 13.5 g/dL");
        assert_eq!(result.page_count, 1);
        assert_eq!(result.correlation_id.as_deref(), Some("visit-9"));
        assert!(fixture.store.is_empty());
    }

    /// Input errors short-circuit before any engine or job.
    #[test]
    fn input_errors_short_circuit() {
        let engine = StubEngine::text("primary", "x", 0.9);
        let fixture = fixture(config(0), &[&engine], |_, _| {
            Arc::new(ClosedExecutor::default())
        });

        let err = fixture
            .orchestrator
            .submit(DocumentRequest::new(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, MedicordError::EmptyDocument));

        let err = fixture
            .orchestrator
            .submit(DocumentRequest::new(png_bytes(16, 16)).with_file_name("scan.pdf"))
            .unwrap_err();
        assert_eq!(err.class(), medicord_core::error::ErrorClass::Input);

        assert_eq!(engine.calls(), 0);
        assert!(fixture.store.is_empty());
    }

    /// Large documents return a pending ticket; the job completes later.
    #[tokio::test(flavor = "multi_thread")]
    async fn large_document_is_deferred() {
        let engine = StubEngine::text("primary", "Amoxicillin 500mg 3 times daily", 0.85);
        let fixture = fixture(config(0), &[&engine], tokio_executor);

        let submission = fixture
            .orchestrator
            .submit(DocumentRequest::new(png_bytes(64, 48)).with_correlation_id("visit-3"))
            .expect("submitted");

        let Submission::Deferred(ticket) = submission else {
            panic!("expected a deferred job");
        };
        assert_eq!(ticket.status, JobStatus::Pending);
        assert_eq!(ticket.page_count, 1);
        assert_eq!(ticket.correlation_id.as_deref(), Some("visit-3"));

        let record = wait_terminal(&fixture.orchestrator, &ticket.job_id).await;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.file_type, DocumentType::Png);
        let result = record.result.expect("result stored");
        assert_eq!(result.categories.prescriptions.len(), 1);
        assert_eq!(result.correlation_id.as_deref(), Some("visit-3"));

        // Terminal state is stable across queries.
        let again = fixture.orchestrator.job_status(&ticket.job_id).expect("job");
        assert_eq!(again.status, JobStatus::Completed);
        assert_eq!(again.result.map(|r| r.text), Some(result.text));
    }

    /// Hard engine failure on every engine fails the job with a reason.
    #[tokio::test(flavor = "multi_thread")]
    async fn engine_failure_fails_job() {
        let primary = StubEngine::failing("primary");
        let fallback = StubEngine::failing("fallback");
        let fixture = fixture(config(0), &[&primary, &fallback], tokio_executor);

        let Submission::Deferred(ticket) = fixture
            .orchestrator
            .submit(DocumentRequest::new(png_bytes(64, 48)))
            .expect("submitted")
        else {
            panic!("expected a deferred job");
        };

        let record = wait_terminal(&fixture.orchestrator, &ticket.job_id).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.expect("reason").contains("every recognition engine failed"));
        assert!(record.result.is_none());
    }

    /// An engine that panics fails the job instead of leaving it running.
    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_engine_fails_job() {
        let engine = StubEngine::panicking("primary");
        let fixture = fixture(config(0), &[&engine], tokio_executor);

        let Submission::Deferred(ticket) = fixture
            .orchestrator
            .submit(DocumentRequest::new(png_bytes(64, 48)))
            .expect("submitted")
        else {
            panic!("expected a deferred job");
        };

        let record = wait_terminal(&fixture.orchestrator, &ticket.job_id).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.expect("reason").starts_with("worker panicked"));
    }

    /// A dispatch failure marks the job failed and is reported as such.
    #[test]
    fn dispatch_failure_fails_job() {
        let engine = StubEngine::text("primary", "x", 0.9);
        let executor = Arc::new(ClosedExecutor::default());
        let shared = Arc::clone(&executor);
        let fixture = fixture(config(0), &[&engine], move |_, _| shared);

        let err = fixture
            .orchestrator
            .submit(DocumentRequest::new(png_bytes(16, 16)))
            .unwrap_err();
        assert!(matches!(err, MedicordError::Dispatch(_)));

        let job_id = executor.seen.lock().expect("lock").expect("work was offered");
        let record = fixture.orchestrator.job_status(&job_id).expect("job");
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.expect("reason").starts_with("dispatch failed"));
        assert_eq!(engine.calls(), 0);
    }

    /// Unknown job ids are a distinct not-found condition.
    #[test]
    fn unknown_job_status() {
        let engine = StubEngine::text("primary", "x", 0.9);
        let fixture = fixture(config(5), &[&engine], |_, _| {
            Arc::new(ClosedExecutor::default())
        });
        assert!(matches!(
            fixture.orchestrator.job_status(&JobId::new()),
            Err(MedicordError::JobNotFound(_))
        ));
    }
}
