//! Persistence seam between the engine and whatever stores runs.

use async_trait::async_trait;

use crate::db::DatabaseError;
use crate::model::{Connection, Job, JobRun, JobStatus, NewTransferLog, RunOutcome, RunProgress};

/// Everything the engine reads and writes outside the storage providers.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn find_job(&self, id: &str) -> Result<Option<Job>, DatabaseError>;

    async fn find_connection(&self, id: &str) -> Result<Option<Connection>, DatabaseError>;

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), DatabaseError>;

    async fn create_run(&self, run: &JobRun) -> Result<(), DatabaseError>;

    async fn record_totals(
        &self,
        run_id: &str,
        total_files: u64,
        total_bytes: u64,
    ) -> Result<(), DatabaseError>;

    async fn record_progress(&self, run_id: &str, progress: &RunProgress)
        -> Result<(), DatabaseError>;

    /// Last-write-wins update of the current file's byte counter.
    async fn record_file_bytes(&self, run_id: &str, bytes: u64) -> Result<(), DatabaseError>;

    /// Writes the final state and clears live progress fields.
    async fn complete_run(&self, run_id: &str, outcome: &RunOutcome) -> Result<(), DatabaseError>;

    async fn append_log(&self, log: &NewTransferLog) -> Result<(), DatabaseError>;
}
