// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Deferred work: the message, the executor seam and the tokio executor.

use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use medicord_core::error::{MedicordError, Result};
use medicord_core::types::{JobId, JobProgress};
use medicord_jobs::JobStore;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::processor::DocumentProcessor;
use crate::request::AcceptedDocument;

/// One document to process out of band, tagged with its job.
#[derive(Debug)]
pub struct Work {
    pub job_id: JobId,
    pub document: AcceptedDocument,
}

/// Accepts work and runs it later, somewhere else.
///
/// `submit` must return promptly; it only hands the work over.
pub trait TaskExecutor: Send + Sync {
    fn submit(&self, work: Work) -> Result<()>;
}

/// What an executor calls to actually run a piece of work.
pub trait WorkHandler: Send + Sync + 'static {
    /// Run the work to completion, recording the outcome.
    fn handle(&self, work: Work);

    /// The work died without recording an outcome (e.g. it panicked).
    fn abandon(&self, job_id: &JobId, reason: &str);
}

// -- Deferred worker ----------------------------------------------------------

/// Tries at recording a failed outcome before giving up.
const SETTLE_ATTEMPTS: u32 = 2;
const SETTLE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Runs deferred documents through the processor and records the job outcome.
pub struct DeferredWorker {
    processor: Arc<DocumentProcessor>,
    store: Arc<dyn JobStore>,
}

impl DeferredWorker {
    pub fn new(processor: Arc<DocumentProcessor>, store: Arc<dyn JobStore>) -> Self {
        Self { processor, store }
    }
}

impl DeferredWorker {
    /// Report progress. A job that cannot record progress can still finish,
    /// so a store error here is only logged.
    fn report(&self, job_id: &JobId, progress: JobProgress) {
        if let Err(err) = self.store.progress(job_id, progress) {
            warn!(%job_id, error = %err, stage = %progress.stage, "Could not record job progress");
        }
    }

    /// Move the job to failed, retrying transient store errors.
    ///
    /// Returns false when the job could not be settled; it then stays in its
    /// last state until `fail_interrupted` or a restart picks it up.
    fn settle_failure(&self, job_id: &JobId, reason: &str) -> bool {
        for attempt in 1..=SETTLE_ATTEMPTS {
            match self.store.fail(job_id, reason) {
                Ok(()) => return true,
                Err(err @ (MedicordError::InvalidJobTransition { .. } | MedicordError::JobNotFound(_))) => {
                    // Already terminal or gone; nothing left to record.
                    warn!(%job_id, error = %err, "Job not failed");
                    return true;
                }
                Err(err) => {
                    error!(%job_id, attempt, error = %err, "Could not record job failure");
                    if attempt < SETTLE_ATTEMPTS {
                        thread::sleep(SETTLE_RETRY_DELAY);
                    }
                }
            }
        }
        error!(%job_id, reason, "Job left without a terminal state");
        false
    }
}

impl WorkHandler for DeferredWorker {
    fn handle(&self, work: Work) {
        let Work { job_id, document } = work;
        let _span = info_span!("deferred_job", %job_id, pages = document.page_count()).entered();

        if let Err(err) = self.store.mark_running(&job_id) {
            error!(error = %err, "Could not mark job running");
            self.settle_failure(&job_id, &format!("could not start job: {err}"));
            return;
        }

        let outcome = self
            .processor
            .process_tracked(&document, &|progress| self.report(&job_id, progress));

        match outcome {
            Ok(result) => {
                info!(confidence = ?result.confidence, "Deferred job completed");
                if let Err(err) = self.store.complete(&job_id, &result) {
                    error!(error = %err, "Could not store job result");
                    self.settle_failure(&job_id, &format!("could not store result: {err}"));
                }
            }
            Err(err) => {
                warn!(error = %err, code = err.code(), "Deferred job failed");
                self.settle_failure(&job_id, &err.to_string());
            }
        }
    }

    fn abandon(&self, job_id: &JobId, reason: &str) {
        self.settle_failure(job_id, reason);
    }
}

// -- Tokio executor -----------------------------------------------------------

/// Executor backed by a tokio runtime.
///
/// Submitted work goes onto an unbounded channel; a dispatcher task starts a
/// blocking task per job, so jobs run concurrently and never block the
/// runtime's async workers.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    sender: mpsc::UnboundedSender<Work>,
}

impl TokioExecutor {
    /// Start the dispatcher on `runtime`.
    pub fn start(runtime: &Handle, handler: Arc<dyn WorkHandler>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Work>();
        let spawner = runtime.clone();

        runtime.spawn(
            async move {
                while let Some(work) = receiver.recv().await {
                    spawner.spawn(run(Arc::clone(&handler), work));
                }
                debug!("Work queue closed");
            }
            .instrument(info_span!("work_dispatcher")),
        );

        Self { sender }
    }
}

impl TaskExecutor for TokioExecutor {
    fn submit(&self, work: Work) -> Result<()> {
        let job_id = work.job_id;
        self.sender.send(work).map_err(|_| {
            MedicordError::Dispatch(format!("work queue closed before job {job_id} was queued"))
        })?;
        debug!(%job_id, "Work queued");
        Ok(())
    }
}

async fn run(handler: Arc<dyn WorkHandler>, work: Work) {
    let job_id = work.job_id;
    let worker = Arc::clone(&handler);
    let outcome = tokio::task::spawn_blocking(move || worker.handle(work)).await;

    if let Err(err) = outcome {
        let reason = if err.is_panic() {
            format!("worker panicked: {}", panic_message(err.into_panic()))
        } else {
            "worker cancelled".to_string()
        };
        error!(%job_id, reason = %reason, "Deferred job aborted");
        handler.abandon(&job_id, &reason);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::request::DocumentRequest;
    use crate::testing::{StubEngine, lineup, png_bytes};
    use medicord_core::config::PipelineConfig;
    use medicord_core::types::{DocumentResult, JobRecord, JobStage, JobStatus};
    use medicord_jobs::MemoryJobStore;

    #[derive(Default)]
    struct Recorder {
        handled: Mutex<Vec<JobId>>,
        abandoned: Mutex<Vec<(JobId, String)>>,
    }

    impl WorkHandler for Recorder {
        fn handle(&self, work: Work) {
            if work.document.correlation_id.as_deref() == Some("boom") {
                panic!("handler exploded");
            }
            self.handled.lock().expect("lock").push(work.job_id);
        }

        fn abandon(&self, job_id: &JobId, reason: &str) {
            self.abandoned
                .lock()
                .expect("lock")
                .push((*job_id, reason.to_string()));
        }
    }

    fn work(correlation_id: &str) -> Work {
        let engine = StubEngine::text("primary", "x", 0.9);
        let processor =
            DocumentProcessor::new(PipelineConfig::default(), lineup(&[&engine])).expect("processor");
        let document = processor
            .accept(DocumentRequest::new(png_bytes(16, 16)).with_correlation_id(correlation_id))
            .expect("accepted");
        Work {
            job_id: JobId::new(),
            document,
        }
    }

    async fn settle(recorder: &Recorder) {
        for _ in 0..200 {
            let done = recorder.handled.lock().expect("lock").len()
                + recorder.abandoned.lock().expect("lock").len();
            if done > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Submitted work reaches the handler.
    #[tokio::test(flavor = "multi_thread")]
    async fn runs_submitted_work() {
        let recorder = Arc::new(Recorder::default());
        let executor = TokioExecutor::start(&Handle::current(), recorder.clone());

        let item = work("ok");
        let job_id = item.job_id;
        executor.submit(item).expect("submitted");
        settle(&recorder).await;

        assert_eq!(*recorder.handled.lock().expect("lock"), vec![job_id]);
        assert!(recorder.abandoned.lock().expect("lock").is_empty());
    }

    /// A panicking handler is reported as abandoned with the panic message.
    #[tokio::test(flavor = "multi_thread")]
    async fn panics_are_abandoned() {
        let recorder = Arc::new(Recorder::default());
        let executor = TokioExecutor::start(&Handle::current(), recorder.clone());

        let item = work("boom");
        let job_id = item.job_id;
        executor.submit(item).expect("submitted");
        settle(&recorder).await;

        let abandoned = recorder.abandoned.lock().expect("lock");
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].0, job_id);
        assert!(abandoned[0].1.contains("handler exploded"));
    }

    // -- Store failures -------------------------------------------------------

    /// Memory store whose writes can be made to fail on demand.
    #[derive(Default)]
    struct UnreliableStore {
        inner: MemoryJobStore,
        refuse_running: bool,
        refuse_complete: bool,
        /// Number of `fail` calls to refuse before accepting.
        refuse_fail: AtomicUsize,
        fail_calls: AtomicUsize,
        progress: Mutex<Vec<JobProgress>>,
    }

    fn outage(what: &str) -> MedicordError {
        MedicordError::JobStore(format!("{what}: database is locked"))
    }

    impl JobStore for UnreliableStore {
        fn create(&self, record: &JobRecord) -> Result<()> {
            self.inner.create(record)
        }

        fn mark_running(&self, id: &JobId) -> Result<()> {
            if self.refuse_running {
                return Err(outage("mark running"));
            }
            self.inner.mark_running(id)
        }

        fn progress(&self, id: &JobId, progress: JobProgress) -> Result<()> {
            self.progress.lock().expect("lock").push(progress);
            self.inner.progress(id, progress)
        }

        fn complete(&self, id: &JobId, result: &DocumentResult) -> Result<()> {
            if self.refuse_complete {
                return Err(outage("complete"));
            }
            self.inner.complete(id, result)
        }

        fn fail(&self, id: &JobId, reason: &str) -> Result<()> {
            self.fail_calls.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .refuse_fail
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(outage("fail"));
            }
            self.inner.fail(id, reason)
        }

        fn get(&self, id: &JobId) -> Result<JobRecord> {
            self.inner.get(id)
        }
    }

    /// Run one pending job through a `DeferredWorker` on `store`.
    fn run_job(store: Arc<UnreliableStore>, engine: &Arc<StubEngine>) -> JobRecord {
        let processor = Arc::new(
            DocumentProcessor::new(PipelineConfig::default(), lineup(&[engine])).expect("processor"),
        );
        let document = processor
            .accept(DocumentRequest::new(png_bytes(32, 24)))
            .expect("accepted");
        let job = JobRecord::pending(
            JobId::new(),
            document.report.file_type,
            document.page_count(),
            document.report.sha256.clone(),
            None,
        );
        store.create(&job).expect("create");

        let worker = DeferredWorker::new(processor, store.clone());
        worker.handle(Work {
            job_id: job.id,
            document,
        });
        store.get(&job.id).expect("get")
    }

    /// A result the store refuses still ends the job, as failed.
    #[test]
    fn unstored_result_fails_job() {
        let store = Arc::new(UnreliableStore {
            refuse_complete: true,
            ..Default::default()
        });
        let engine = StubEngine::text("primary", "WBC 6.0", 0.9);

        let record = run_job(store, &engine);
        assert_eq!(record.status, JobStatus::Failed);
        let reason = record.error.expect("reason");
        assert!(reason.contains("could not store result"), "{reason}");
    }

    /// A job that cannot be marked running is failed, and never processed.
    #[test]
    fn unstartable_job_fails() {
        let store = Arc::new(UnreliableStore {
            refuse_running: true,
            ..Default::default()
        });
        let engine = StubEngine::text("primary", "WBC 6.0", 0.9);

        let record = run_job(store, &engine);
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.expect("reason").contains("could not start job"));
        assert_eq!(engine.calls(), 0);
    }

    /// A failure write that errors once is retried.
    #[test]
    fn failure_write_is_retried() {
        let store = Arc::new(UnreliableStore {
            refuse_complete: true,
            refuse_fail: AtomicUsize::new(1),
            ..Default::default()
        });
        let engine = StubEngine::text("primary", "WBC 6.0", 0.9);

        let record = run_job(store.clone(), &engine);
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(store.fail_calls.load(Ordering::SeqCst), 2);
    }

    /// Progress reported during a job only moves forward and ends at done.
    #[test]
    fn job_progress_grows() {
        let store = Arc::new(UnreliableStore::default());
        let engine = StubEngine::text("primary", "WBC 6.0", 0.9);

        let record = run_job(store.clone(), &engine);
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress.stage, JobStage::Done);

        let reported = store.progress.lock().expect("lock");
        assert!(!reported.is_empty());
        assert!(
            reported
                .windows(2)
                .all(|pair| !pair[0].is_ahead_of(&pair[1])),
            "{reported:?}"
        );
        assert_eq!(reported.last().map(|p| p.stage), Some(JobStage::Structuring));
    }
}
