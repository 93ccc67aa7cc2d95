//! `RunStore` over the SQLite repositories.
//!
//! Each call takes the connection lock briefly and never across an await.

use async_trait::async_trait;

use super::{connection_repo, job_repo, log_repo, run_repo, Database, DatabaseError};
use crate::engine::RunStore;
use crate::model::{Connection, Job, JobRun, JobStatus, NewTransferLog, RunOutcome, RunProgress};

#[async_trait]
impl RunStore for Database {
    async fn find_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(self, id)
    }

    async fn find_connection(&self, id: &str) -> Result<Option<Connection>, DatabaseError> {
        connection_repo::find_by_id(self, id)
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), DatabaseError> {
        job_repo::update_status(self, job_id, status)
    }

    async fn create_run(&self, run: &JobRun) -> Result<(), DatabaseError> {
        run_repo::insert(self, run)
    }

    async fn record_totals(
        &self,
        run_id: &str,
        total_files: u64,
        total_bytes: u64,
    ) -> Result<(), DatabaseError> {
        run_repo::record_totals(self, run_id, total_files, total_bytes)
    }

    async fn record_progress(
        &self,
        run_id: &str,
        progress: &RunProgress,
    ) -> Result<(), DatabaseError> {
        run_repo::record_progress(self, run_id, progress)
    }

    async fn record_file_bytes(&self, run_id: &str, bytes: u64) -> Result<(), DatabaseError> {
        run_repo::record_file_bytes(self, run_id, bytes)
    }

    async fn complete_run(&self, run_id: &str, outcome: &RunOutcome) -> Result<(), DatabaseError> {
        if !run_repo::complete(self, run_id, outcome)? {
            log::warn!("Run {} was already completed; final state not rewritten", run_id);
        }
        Ok(())
    }

    async fn append_log(&self, log: &NewTransferLog) -> Result<(), DatabaseError> {
        log_repo::insert(self, log).map(|_| ())
    }
}
