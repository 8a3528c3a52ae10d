// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job status store trait and the in-memory implementation.
//
// A deferred job moves pending -> running -> completed, or to failed from
// either non-terminal state. Terminal states never change again.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use medicord_core::error::{MedicordError, Result};
use medicord_core::types::{DocumentResult, JobId, JobProgress, JobRecord, JobStage, JobStatus};
use tracing::{debug, info, instrument, warn};

/// Persistence for deferred job state.
///
/// Implementations are shared between the submitting caller and the
/// background worker, so every method takes `&self`.
pub trait JobStore: Send + Sync {
    /// Record a new job. The record is expected to be `Pending`.
    fn create(&self, record: &JobRecord) -> Result<()>;

    fn mark_running(&self, id: &JobId) -> Result<()>;

    /// Record how far a running job has come. Updates that are not ahead
    /// of the stored progress are ignored, so progress never moves back.
    fn progress(&self, id: &JobId, progress: JobProgress) -> Result<()>;

    /// Store the final result and move the job to `Completed`.
    fn complete(&self, id: &JobId, result: &DocumentResult) -> Result<()>;

    /// Move the job to `Failed` with a human-readable reason.
    fn fail(&self, id: &JobId, reason: &str) -> Result<()>;

    fn get(&self, id: &JobId) -> Result<JobRecord>;
}

/// Progress of a job that just completed.
pub fn finished_progress(page_count: usize) -> JobProgress {
    JobProgress::at(JobStage::Done, page_count, page_count)
}

/// Reject a status change the job lifecycle does not allow.
pub fn check_transition(id: &JobId, from: JobStatus, to: JobStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(MedicordError::InvalidJobTransition {
            job_id: *id,
            from,
            to,
        })
    }
}

// -- In-memory store ----------------------------------------------------------

/// Job store held in process memory. State is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, JobRecord>>> {
        self.jobs
            .lock()
            .map_err(|_| MedicordError::JobStore("job map lock poisoned".into()))
    }

    /// Apply `update` to the job after checking the transition to `to`.
    fn transition(
        &self,
        id: &JobId,
        to: JobStatus,
        update: impl FnOnce(&mut JobRecord),
    ) -> Result<()> {
        let mut jobs = self.lock()?;
        let record = jobs.get_mut(id).ok_or(MedicordError::JobNotFound(*id))?;
        check_transition(id, record.status, to)?;
        record.status = to;
        record.updated_at = Utc::now();
        update(record);
        debug!(job_id = %id, status = %to, "Job status updated");
        Ok(())
    }
}

impl JobStore for MemoryJobStore {
    #[instrument(skip_all, fields(job_id = %record.id))]
    fn create(&self, record: &JobRecord) -> Result<()> {
        let mut jobs = self.lock()?;
        if jobs.contains_key(&record.id) {
            return Err(MedicordError::JobStore(format!(
                "job {} already exists",
                record.id
            )));
        }
        jobs.insert(record.id, record.clone());
        info!(job_id = %record.id, pages = record.page_count, "Job created");
        Ok(())
    }

    fn mark_running(&self, id: &JobId) -> Result<()> {
        self.transition(id, JobStatus::Running, |_| {})
    }

    fn progress(&self, id: &JobId, progress: JobProgress) -> Result<()> {
        let mut jobs = self.lock()?;
        let record = jobs.get_mut(id).ok_or(MedicordError::JobNotFound(*id))?;
        if record.status != JobStatus::Running {
            return Err(MedicordError::InvalidJobTransition {
                job_id: *id,
                from: record.status,
                to: JobStatus::Running,
            });
        }
        if progress.is_ahead_of(&record.progress) {
            record.progress = progress;
            record.updated_at = Utc::now();
            debug!(job_id = %id, stage = %progress.stage, pages_done = progress.pages_done, "Job progress");
        }
        Ok(())
    }

    fn complete(&self, id: &JobId, result: &DocumentResult) -> Result<()> {
        self.transition(id, JobStatus::Completed, |record| {
            record.progress = finished_progress(record.page_count);
            record.result = Some(result.clone());
        })
    }

    fn fail(&self, id: &JobId, reason: &str) -> Result<()> {
        warn!(job_id = %id, reason, "Job failed");
        self.transition(id, JobStatus::Failed, |record| {
            record.error = Some(reason.to_string());
        })
    }

    fn get(&self, id: &JobId) -> Result<JobRecord> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or(MedicordError::JobNotFound(*id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use medicord_core::records::{Categories, DocumentMetadata, ScriptProfile};
    use medicord_core::types::DocumentType;

    pub(crate) fn pending_job() -> JobRecord {
        JobRecord::pending(
            JobId::new(),
            DocumentType::Pdf,
            12,
            "9f86d081884c7d65".into(),
            Some("visit-42".into()),
        )
    }

    pub(crate) fn sample_result() -> DocumentResult {
        DocumentResult {
            text: "Glucose 5.8 mmol/L".into(),
            confidence: Some(0.82),
            page_count: 12,
            file_type: DocumentType::Pdf,
            extracted_at: Utc::now(),
            categories: Categories::default(),
            metadata: DocumentMetadata::default(),
            script_profile: ScriptProfile::default(),
            pages: Vec::new(),
            correlation_id: Some("visit-42".into()),
        }
    }

    /// A job walks the full happy path and keeps its result.
    #[test]
    fn pending_running_completed() {
        let store = MemoryJobStore::new();
        let job = pending_job();
        store.create(&job).expect("create");
        assert_eq!(store.get(&job.id).expect("get").status, JobStatus::Pending);

        store.mark_running(&job.id).expect("running");
        store.complete(&job.id, &sample_result()).expect("complete");

        let done = store.get(&job.id).expect("get");
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.expect("result").confidence, Some(0.82));
        assert!(done.updated_at >= done.created_at);
    }

    /// Failing a pending job records the reason.
    #[test]
    fn pending_can_fail() {
        let store = MemoryJobStore::new();
        let job = pending_job();
        store.create(&job).expect("create");
        store.fail(&job.id, "dispatch queue closed").expect("fail");

        let failed = store.get(&job.id).expect("get");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("dispatch queue closed"));
    }

    /// Completing without running first, or touching a finished job, is refused.
    #[test]
    fn illegal_transitions() {
        let store = MemoryJobStore::new();
        let job = pending_job();
        store.create(&job).expect("create");

        let err = store.complete(&job.id, &sample_result()).unwrap_err();
        assert!(matches!(
            err,
            MedicordError::InvalidJobTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
                ..
            }
        ));

        store.mark_running(&job.id).expect("running");
        store.fail(&job.id, "engine crashed").expect("fail");
        assert!(store.mark_running(&job.id).is_err());
        assert!(store.complete(&job.id, &sample_result()).is_err());
        assert_eq!(store.get(&job.id).expect("get").status, JobStatus::Failed);
    }

    /// Progress only moves forward and ends at done on completion.
    #[test]
    fn progress_is_monotonic() {
        let store = MemoryJobStore::new();
        let job = pending_job();
        store.create(&job).expect("create");
        assert_eq!(store.get(&job.id).expect("get").progress.stage, JobStage::Queued);

        store.mark_running(&job.id).expect("running");
        store
            .progress(&job.id, JobProgress::at(JobStage::Recognizing, 5, 12))
            .expect("progress");
        store
            .progress(&job.id, JobProgress::at(JobStage::Recognizing, 3, 12))
            .expect("stale progress");
        let running = store.get(&job.id).expect("get");
        assert_eq!(running.progress.pages_done, 5);

        store.complete(&job.id, &sample_result()).expect("complete");
        let done = store.get(&job.id).expect("get").progress;
        assert_eq!(done.stage, JobStage::Done);
        assert_eq!(done.percent(), 100);
    }

    /// Progress is refused for jobs that are not running.
    #[test]
    fn progress_requires_running_job() {
        let store = MemoryJobStore::new();
        let job = pending_job();
        store.create(&job).expect("create");
        let update = JobProgress::at(JobStage::Decoding, 0, 12);
        assert!(matches!(
            store.progress(&job.id, update),
            Err(MedicordError::InvalidJobTransition { .. })
        ));
        assert!(matches!(
            store.progress(&JobId::new(), update),
            Err(MedicordError::JobNotFound(_))
        ));
    }

    /// Unknown ids are reported as not found.
    #[test]
    fn unknown_job() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        assert!(matches!(store.get(&id), Err(MedicordError::JobNotFound(_))));
        assert!(matches!(
            store.mark_running(&id),
            Err(MedicordError::JobNotFound(_))
        ));
    }

    /// The same id cannot be created twice.
    #[test]
    fn duplicate_create_rejected() {
        let store = MemoryJobStore::new();
        let job = pending_job();
        store.create(&job).expect("create");
        assert!(store.create(&job).is_err());
        assert_eq!(store.len(), 1);
    }
}
