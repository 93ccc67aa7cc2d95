//! Run store wrapper that fails run completion on demand.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use courier::db::DatabaseError;
use courier::model::{Connection, Job, JobRun, JobStatus, NewTransferLog, RunOutcome, RunProgress};
use courier::{Database, RunStore};

/// Delegates to a real database; `complete_run` fails while `fail_completion` is set.
pub struct FlakyStore {
    inner: Arc<Database>,
    pub fail_completion: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<Database>) -> Self {
        Self {
            inner,
            fail_completion: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RunStore for FlakyStore {
    async fn find_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        self.inner.find_job(id).await
    }

    async fn find_connection(&self, id: &str) -> Result<Option<Connection>, DatabaseError> {
        self.inner.find_connection(id).await
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), DatabaseError> {
        self.inner.set_job_status(job_id, status).await
    }

    async fn create_run(&self, run: &JobRun) -> Result<(), DatabaseError> {
        self.inner.create_run(run).await
    }

    async fn record_totals(
        &self,
        run_id: &str,
        total_files: u64,
        total_bytes: u64,
    ) -> Result<(), DatabaseError> {
        self.inner.record_totals(run_id, total_files, total_bytes).await
    }

    async fn record_progress(
        &self,
        run_id: &str,
        progress: &RunProgress,
    ) -> Result<(), DatabaseError> {
        self.inner.record_progress(run_id, progress).await
    }

    async fn record_file_bytes(&self, run_id: &str, bytes: u64) -> Result<(), DatabaseError> {
        self.inner.record_file_bytes(run_id, bytes).await
    }

    async fn complete_run(&self, run_id: &str, outcome: &RunOutcome) -> Result<(), DatabaseError> {
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(DatabaseError::LockPoisoned);
        }
        self.inner.complete_run(run_id, outcome).await
    }

    async fn append_log(&self, log: &NewTransferLog) -> Result<(), DatabaseError> {
        self.inner.append_log(log).await
    }
}
