// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent job status store backed by SQLite.
//
// Only job metadata and the final result (as JSON) are stored. The submitted
// document bytes are never written; the job keeps their SHA-256 instead.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument, warn};

use medicord_core::error::{MedicordError, Result};
use medicord_core::types::{
    DocumentResult, DocumentType, JobId, JobProgress, JobRecord, JobStatus,
};

use crate::store::{JobStore, check_transition, finished_progress};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        file_type TEXT NOT NULL,
        page_count INTEGER NOT NULL,
        document_sha256 TEXT NOT NULL,
        correlation_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        progress TEXT,
        result TEXT,
        error TEXT
    )
"#;

const SELECT_JOB_SQL: &str = "SELECT id, status, file_type, page_count, document_sha256,
        correlation_id, created_at, updated_at, progress, result, error
     FROM jobs WHERE id = ?1";

/// Reason recorded on jobs abandoned by an earlier process.
const INTERRUPTED_REASON: &str = "interrupted: process exited before the job finished";

/// Job store in a SQLite database file.
///
/// `rusqlite` connections are not `Sync`, so the connection sits behind a
/// mutex. Calls are short and synchronous; async callers should use
/// `spawn_blocking`.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the job database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| MedicordError::JobStore(format!("open: {e}")))?;

        // WAL lets a status poller read while the worker writes.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| MedicordError::JobStore(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| MedicordError::JobStore(format!("create table: {e}")))?;

        info!("Job database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MedicordError::JobStore(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| MedicordError::JobStore(format!("create table: {e}")))?;

        debug!("In-memory job database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fail every job a previous process left pending or running.
    ///
    /// Nothing resumes such jobs, so without this they would never reach a
    /// terminal state. Returns how many jobs were failed.
    #[instrument(skip(self))]
    pub fn fail_interrupted(&self) -> Result<usize> {
        let rows = self
            .lock()?
            .execute(
                "UPDATE jobs SET status = ?1, error = ?2, updated_at = ?3
                 WHERE status IN (?4, ?5)",
                params![
                    JobStatus::Failed.as_str(),
                    INTERRUPTED_REASON,
                    Utc::now().to_rfc3339(),
                    JobStatus::Pending.as_str(),
                    JobStatus::Running.as_str(),
                ],
            )
            .map_err(|e| MedicordError::JobStore(format!("fail interrupted: {e}")))?;

        if rows > 0 {
            warn!(count = rows, "Failed jobs interrupted by a previous exit");
        }
        Ok(rows)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MedicordError::JobStore("connection lock poisoned".into()))
    }

    /// Move a job to `to`, writing `result` and `error` alongside.
    ///
    /// The status guard lives in the UPDATE itself so concurrent writers
    /// cannot both win. When nothing matched, the current row decides which
    /// error to report.
    fn transition(
        &self,
        id: &JobId,
        to: JobStatus,
        result: Option<&DocumentResult>,
        error: Option<&str>,
    ) -> Result<()> {
        let result_json = result.map(serde_json::to_string).transpose()?;
        let progress_json = result
            .map(|result| serde_json::to_string(&finished_progress(result.page_count)))
            .transpose()?;
        // No status has more than two predecessors; an absent slot binds NULL
        // and never matches.
        let from = to.predecessors();
        let first = from.first().map(JobStatus::as_str);
        let second = from.get(1).map(JobStatus::as_str);

        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2,
                 result = COALESCE(?3, result), error = COALESCE(?4, error),
                 progress = COALESCE(?8, progress)
                 WHERE id = ?5 AND status IN (?6, ?7)",
                params![
                    to.as_str(),
                    Utc::now().to_rfc3339(),
                    result_json,
                    error,
                    id.to_string(),
                    first,
                    second,
                    progress_json,
                ],
            )
            .map_err(|e| MedicordError::JobStore(format!("update status: {e}")))?;

        if rows == 0 {
            let current = current_status(&conn, id)?.ok_or(MedicordError::JobNotFound(*id))?;
            check_transition(id, current, to)?;
            return Err(MedicordError::JobStore(format!(
                "job {id} changed concurrently"
            )));
        }

        debug!(job_id = %id, status = %to, "Job status updated");
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    #[instrument(skip_all, fields(job_id = %record.id))]
    fn create(&self, record: &JobRecord) -> Result<()> {
        let result_json = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let progress_json = serde_json::to_string(&record.progress)?;

        self.lock()?
            .execute(
                "INSERT INTO jobs (id, status, file_type, page_count, document_sha256,
                 correlation_id, created_at, updated_at, progress, result, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id.to_string(),
                    record.status.as_str(),
                    record.file_type.as_str(),
                    record.page_count as i64,
                    record.document_sha256,
                    record.correlation_id,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                    progress_json,
                    result_json,
                    record.error,
                ],
            )
            .map_err(|e| MedicordError::JobStore(format!("insert job: {e}")))?;

        info!(job_id = %record.id, pages = record.page_count, "Job created");
        Ok(())
    }

    fn mark_running(&self, id: &JobId) -> Result<()> {
        self.transition(id, JobStatus::Running, None, None)
    }

    fn progress(&self, id: &JobId, progress: JobProgress) -> Result<()> {
        let conn = self.lock()?;
        let (status, stored, page_count) = conn
            .query_row(
                "SELECT status, progress, page_count FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| MedicordError::JobStore(format!("query progress: {e}")))?
            .ok_or(MedicordError::JobNotFound(*id))?;

        let status = JobStatus::from_str(&status)?;
        if status != JobStatus::Running {
            return Err(MedicordError::InvalidJobTransition {
                job_id: *id,
                from: status,
                to: JobStatus::Running,
            });
        }
        let stored = decode_progress(stored.as_deref(), page_count)?;
        if !progress.is_ahead_of(&stored) {
            return Ok(());
        }

        conn.execute(
            "UPDATE jobs SET progress = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                serde_json::to_string(&progress)?,
                Utc::now().to_rfc3339(),
                id.to_string(),
                JobStatus::Running.as_str(),
            ],
        )
        .map_err(|e| MedicordError::JobStore(format!("update progress: {e}")))?;
        debug!(job_id = %id, stage = %progress.stage, pages_done = progress.pages_done, "Job progress");
        Ok(())
    }

    fn complete(&self, id: &JobId, result: &DocumentResult) -> Result<()> {
        self.transition(id, JobStatus::Completed, Some(result), None)
    }

    fn fail(&self, id: &JobId, reason: &str) -> Result<()> {
        warn!(job_id = %id, reason, "Job failed");
        self.transition(id, JobStatus::Failed, None, Some(reason))
    }

    fn get(&self, id: &JobId) -> Result<JobRecord> {
        let conn = self.lock()?;
        let row = conn
            .query_row(SELECT_JOB_SQL, params![id.to_string()], read_row)
            .optional()
            .map_err(|e| MedicordError::JobStore(format!("query job: {e}")))?
            .ok_or(MedicordError::JobNotFound(*id))?;
        row.into_record()
    }
}

fn current_status(conn: &Connection, id: &JobId) -> Result<Option<JobStatus>> {
    conn.query_row(
        "SELECT status FROM jobs WHERE id = ?1",
        params![id.to_string()],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(|e| MedicordError::JobStore(format!("query status: {e}")))?
    .map(|status| JobStatus::from_str(&status))
    .transpose()
}

// -- Row mapping --------------------------------------------------------------

/// Raw column values, converted outside the rusqlite callback so that
/// conversion failures surface as `MedicordError`.
struct JobRow {
    id: String,
    status: String,
    file_type: String,
    page_count: i64,
    document_sha256: String,
    correlation_id: Option<String>,
    created_at: String,
    updated_at: String,
    progress: Option<String>,
    result: Option<String>,
    error: Option<String>,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        status: row.get(1)?,
        file_type: row.get(2)?,
        page_count: row.get(3)?,
        document_sha256: row.get(4)?,
        correlation_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        progress: row.get(8)?,
        result: row.get(9)?,
        error: row.get(10)?,
    })
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord> {
        let file_type = DocumentType::from_extension(&self.file_type).ok_or_else(|| {
            MedicordError::JobStore(format!("unknown file type '{}'", self.file_type))
        })?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<DocumentResult>)
            .transpose()?;

        Ok(JobRecord {
            id: JobId::from_str(&self.id)?,
            status: JobStatus::from_str(&self.status)?,
            file_type,
            page_count: usize::try_from(self.page_count)
                .map_err(|e| MedicordError::JobStore(format!("page_count: {e}")))?,
            document_sha256: self.document_sha256,
            correlation_id: self.correlation_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            progress: decode_progress(self.progress.as_deref(), self.page_count)?,
            result,
            error: self.error,
        })
    }
}

/// Stored progress, or the queued state when none was written.
fn decode_progress(raw: Option<&str>, page_count: i64) -> Result<JobProgress> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(JobProgress::queued(usize::try_from(page_count).unwrap_or(0))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MedicordError::JobStore(format!("timestamp '{raw}': {e}")))
}
