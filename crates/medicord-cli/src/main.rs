// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Medicord: Khmer + English medical document recognition.
//
// Entry point. Initialises logging on stderr, builds the pipeline from
// configuration and prints JSON on stdout.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use medicord_core::error::{ErrorClass, MedicordError, Result};
use medicord_core::types::{JobId, JobRecord, JobStatus, Submission};
use medicord_core::PipelineConfig;
use medicord_jobs::{JobStore, MemoryJobStore, SqliteJobStore};
use medicord_pipeline::{DeferredWorker, DocumentProcessor, DocumentRequest, Orchestrator, TokioExecutor};

#[derive(Debug, Parser)]
#[command(name = "medicord", version, about = "Extract structured records from medical scans")]
struct Cli {
    /// JSON configuration file. Defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recognise a document and print the result (or the finished job).
    Extract {
        file: PathBuf,
        /// Scripts on the page, e.g. `khm+eng`.
        #[arg(long)]
        hint: Option<String>,
        #[arg(long)]
        correlation_id: Option<String>,
        /// SQLite job database. Jobs are kept in memory when absent.
        #[arg(long)]
        job_db: Option<PathBuf>,
        /// How often to poll a deferred job, in milliseconds.
        #[arg(long, default_value_t = 250)]
        poll_ms: u64,
    },
    /// Print a job record from the job database.
    Status {
        job_id: String,
        #[arg(long)]
        job_db: PathBuf,
    },
    /// Fail jobs a crashed process left pending or running.
    Recover {
        #[arg(long)]
        job_db: PathBuf,
    },
    /// Print the effective configuration.
    Config,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!(code = err.code(), class = ?err.class(), error = %err, "medicord failed");
            eprintln!("error [{}]: {}", err.code(), err);
            ExitCode::from(exit_status(&err))
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Extract {
            file,
            hint,
            correlation_id,
            job_db,
            poll_ms,
        } => {
            let job_db = job_db.or_else(|| config.job_db_path.clone());
            extract(config, &file, hint, correlation_id, job_db.as_deref(), poll_ms)
        }
        Command::Status { job_id, job_db } => {
            let id: JobId = job_id.parse()?;
            let store = SqliteJobStore::open(&job_db)?;
            print_json(&store.get(&id)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Recover { job_db } => {
            let failed = SqliteJobStore::open(&job_db)?.fail_interrupted()?;
            info!(failed, "Recovery finished");
            print_json(&serde_json::json!({ "failed": failed }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            print_json(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn extract(
    config: PipelineConfig,
    file: &Path,
    hint: Option<String>,
    correlation_id: Option<String>,
    job_db: Option<&Path>,
    poll_ms: u64,
) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let processor = Arc::new(DocumentProcessor::from_config(config)?);
    let store: Arc<dyn JobStore> = match job_db {
        Some(path) => Arc::new(SqliteJobStore::open(path)?),
        None => Arc::new(MemoryJobStore::new()),
    };
    let worker = Arc::new(DeferredWorker::new(Arc::clone(&processor), Arc::clone(&store)));
    let executor = Arc::new(TokioExecutor::start(runtime.handle(), worker));
    let orchestrator = Orchestrator::new(processor, store, executor);

    let mut request = DocumentRequest::new(std::fs::read(file)?);
    if let Some(name) = file.file_name().and_then(|name| name.to_str()) {
        request = request.with_file_name(name);
    }
    if let Some(hint) = hint {
        request = request.with_script_hint(hint);
    }
    if let Some(id) = correlation_id {
        request = request.with_correlation_id(id);
    }

    let submission = orchestrator.submit(request)?;
    print_json(&submission)?;

    let Submission::Deferred(ticket) = submission else {
        return Ok(ExitCode::SUCCESS);
    };
    let record = wait_for_job(&orchestrator, &ticket.job_id, Duration::from_millis(poll_ms.max(10)))?;
    print_json(&record)?;
    Ok(match record.status {
        JobStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// Poll until the job reaches a terminal state.
fn wait_for_job(orchestrator: &Orchestrator, id: &JobId, interval: Duration) -> Result<JobRecord> {
    info!(job_id = %id, "Waiting for deferred job");
    let mut last_percent = None;
    loop {
        let record = orchestrator.job_status(id)?;
        if matches!(record.status, JobStatus::Completed | JobStatus::Failed) {
            return Ok(record);
        }
        let percent = record.progress.percent();
        if last_percent != Some(percent) {
            info!(job_id = %id, stage = %record.progress.stage, percent, "Job progress");
            last_percent = Some(percent);
        }
        std::thread::sleep(interval);
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 2 for rejected input, 1 for everything else.
fn exit_status(err: &MedicordError) -> u8 {
    match err.class() {
        ErrorClass::Input => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    /// The argument definitions are internally consistent.
    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    /// Input errors exit with 2, the rest with 1.
    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(exit_status(&MedicordError::EmptyDocument), 2);
        assert_eq!(
            exit_status(&MedicordError::UnsupportedDocument("gif".into())),
            2
        );
        assert_eq!(exit_status(&MedicordError::JobStore("disk full".into())), 1);
    }

    /// Subcommands parse with their flags.
    #[test]
    fn parses_extract() {
        let cli = Cli::try_parse_from([
            "medicord",
            "--config",
            "medicord.json",
            "extract",
            "scan.pdf",
            "--hint",
            "khm+eng",
            "--job-db",
            "jobs.db",
        ])
        .expect("parses");
        assert_eq!(cli.config, Some(PathBuf::from("medicord.json")));
        match cli.command {
            Command::Extract {
                file, hint, job_db, poll_ms, ..
            } => {
                assert_eq!(file, PathBuf::from("scan.pdf"));
                assert_eq!(hint.as_deref(), Some("khm+eng"));
                assert_eq!(job_db, Some(PathBuf::from("jobs.db")));
                assert_eq!(poll_ms, 250);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    /// A status query against a missing job reports not found.
    #[test]
    fn status_of_unknown_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cli = Cli::try_parse_from([
            "medicord",
            "status",
            "5f0c6c1e-8a3b-4c55-9d0e-2b1f3c4d5e6f",
            "--job-db",
            dir.path().join("jobs.db").to_str().expect("utf-8 path"),
        ])
        .expect("parses");
        assert!(matches!(run(cli), Err(MedicordError::JobNotFound(_))));
    }
}
