//! Job run repository: the `job_runs` table.
//!
//! A run row is written once at start, updated in place while `running`,
//! and frozen once `completed_at` is set. Every update below is guarded on
//! `completed_at IS NULL`.

use rusqlite::{params, OptionalExtension, Row};

use super::{
    get_optional_timestamp, get_optional_u64, get_parsed, get_timestamp, get_u64, timestamp,
    to_i64, Database, DatabaseError,
};
use crate::model::{JobRun, RunOutcome, RunProgress};

fn from_row(row: &Row<'_>) -> Result<JobRun, rusqlite::Error> {
    Ok(JobRun {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        status: get_parsed(row, "status")?,
        started_at: get_timestamp(row, "started_at")?,
        completed_at: get_optional_timestamp(row, "completed_at")?,
        files_transferred: get_u64(row, "files_transferred")?,
        bytes_transferred: get_u64(row, "bytes_transferred")?,
        total_files: get_u64(row, "total_files")?,
        total_bytes: get_u64(row, "total_bytes")?,
        current_file: row.get("current_file")?,
        current_file_size: get_optional_u64(row, "current_file_size")?,
        current_file_bytes_transferred: get_optional_u64(row, "current_file_bytes_transferred")?,
        error_message: row.get("error_message")?,
    })
}

/// Inserts a new run row.
pub fn insert(db: &Database, run: &JobRun) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_runs (id, job_id, status, started_at, completed_at,
             files_transferred, bytes_transferred, total_files, total_bytes,
             current_file, current_file_size, current_file_bytes_transferred, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run.id,
                run.job_id,
                run.status.as_str(),
                timestamp(&run.started_at),
                run.completed_at.as_ref().map(timestamp),
                to_i64(run.files_transferred),
                to_i64(run.bytes_transferred),
                to_i64(run.total_files),
                to_i64(run.total_bytes),
                run.current_file,
                run.current_file_size.map(to_i64),
                run.current_file_bytes_transferred.map(to_i64),
                run.error_message,
            ],
        )?;
        Ok(())
    })
}

/// Records the size of the work set once the source has been listed.
pub fn record_totals(
    db: &Database,
    id: &str,
    total_files: u64,
    total_bytes: u64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_runs SET total_files=?2, total_bytes=?3
             WHERE id=?1 AND completed_at IS NULL",
            params![id, to_i64(total_files), to_i64(total_bytes)],
        )?;
        Ok(())
    })
}

/// Writes the live progress snapshot.
pub fn record_progress(
    db: &Database,
    id: &str,
    progress: &RunProgress,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_runs SET current_file=?2, current_file_size=?3,
             current_file_bytes_transferred=?4, files_transferred=?5, bytes_transferred=?6
             WHERE id=?1 AND completed_at IS NULL",
            params![
                id,
                progress.current_file,
                progress.current_file_size.map(to_i64),
                progress.current_file_bytes_transferred.map(to_i64),
                to_i64(progress.files_transferred),
                to_i64(progress.bytes_transferred),
            ],
        )?;
        Ok(())
    })
}

/// Updates only the per-file byte counter. Called from the progress flusher.
pub fn record_file_bytes(db: &Database, id: &str, bytes: u64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_runs SET current_file_bytes_transferred=?2
             WHERE id=?1 AND completed_at IS NULL",
            params![id, to_i64(bytes)],
        )?;
        Ok(())
    })
}

/// Writes the final state and clears the live fields. Returns `false` when
/// the run was already completed.
pub fn complete(db: &Database, id: &str, outcome: &RunOutcome) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE job_runs SET status=?2, completed_at=?3, error_message=?4,
             files_transferred=?5, bytes_transferred=?6,
             current_file=NULL, current_file_size=NULL, current_file_bytes_transferred=NULL
             WHERE id=?1 AND completed_at IS NULL",
            params![
                id,
                outcome.status.as_str(),
                timestamp(&outcome.completed_at),
                outcome.error_message,
                to_i64(outcome.files_transferred),
                to_i64(outcome.bytes_transferred),
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a run by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRun>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row("SELECT * FROM job_runs WHERE id = ?1", params![id], from_row)
            .optional()?)
    })
}

/// Lists the most recent runs of a job, newest first.
pub fn list_for_job(db: &Database, job_id: &str, limit: u32) -> Result<Vec<JobRun>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![job_id, limit], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts runs of a job that have not completed.
pub fn count_running(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM job_runs WHERE job_id = ?1 AND completed_at IS NULL",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connection_repo, job_repo};
    use crate::model::{Connection, Credentials, Job, Protocol, RunStatus};
    use chrono::{Duration, Utc};

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        connection_repo::insert(
            &db,
            &Connection {
                id: "c".into(),
                name: "c".into(),
                protocol: Protocol::Local,
                host: String::new(),
                port: 0,
                credentials: Credentials::new(),
            },
        )
        .unwrap();
        job_repo::insert(
            &db,
            &Job {
                id: "j".into(),
                name: "j".into(),
                source_connection_id: "c".into(),
                source_path: "/in".into(),
                destination_connection_id: "c".into(),
                destination_path: "/out".into(),
                file_filter: String::new(),
                post_transfer_action: Default::default(),
                move_path: None,
                overwrite_existing: true,
                skip_hidden_files: false,
                extract_archives: false,
                delta_sync: false,
                status: Default::default(),
            },
        )
        .unwrap();
        db
    }

    fn outcome(status: RunStatus) -> RunOutcome {
        RunOutcome {
            status,
            error_message: None,
            files_transferred: 2,
            bytes_transferred: 10,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = setup();
        let run = JobRun::start("j");
        insert(&db, &run).unwrap();
        assert_eq!(find_by_id(&db, &run.id).unwrap().unwrap(), run);
        assert_eq!(count_running(&db, "j").unwrap(), 1);
    }

    #[test]
    fn test_progress_then_complete_clears_live_fields() {
        let db = setup();
        let run = JobRun::start("j");
        insert(&db, &run).unwrap();
        record_totals(&db, &run.id, 3, 30).unwrap();
        record_progress(
            &db,
            &run.id,
            &RunProgress {
                current_file: Some("b.csv".into()),
                current_file_size: Some(10),
                current_file_bytes_transferred: Some(0),
                files_transferred: 1,
                bytes_transferred: 10,
            },
        )
        .unwrap();
        record_file_bytes(&db, &run.id, 7).unwrap();

        let mid = find_by_id(&db, &run.id).unwrap().unwrap();
        assert_eq!(mid.total_files, 3);
        assert_eq!(mid.current_file.as_deref(), Some("b.csv"));
        assert_eq!(mid.current_file_bytes_transferred, Some(7));

        assert!(complete(&db, &run.id, &outcome(RunStatus::Success)).unwrap());
        let done = find_by_id(&db, &run.id).unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert!(done.is_finished());
        assert_eq!(done.current_file, None);
        assert_eq!(done.current_file_size, None);
        assert_eq!(done.current_file_bytes_transferred, None);
        assert_eq!(done.files_transferred, 2);
        assert_eq!(count_running(&db, "j").unwrap(), 0);
    }

    #[test]
    fn test_completed_run_is_frozen() {
        let db = setup();
        let run = JobRun::start("j");
        insert(&db, &run).unwrap();
        assert!(complete(&db, &run.id, &outcome(RunStatus::Failure)).unwrap());

        assert!(!complete(&db, &run.id, &outcome(RunStatus::Success)).unwrap());
        record_file_bytes(&db, &run.id, 99).unwrap();
        record_totals(&db, &run.id, 99, 99).unwrap();

        let done = find_by_id(&db, &run.id).unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Failure);
        assert_eq!(done.current_file_bytes_transferred, None);
        assert_eq!(done.total_files, 0);
    }

    #[test]
    fn test_list_for_job_newest_first() {
        let db = setup();
        let mut older = JobRun::start("j");
        older.started_at = Utc::now() - Duration::hours(1);
        let newer = JobRun::start("j");
        insert(&db, &older).unwrap();
        insert(&db, &newer).unwrap();

        let runs = list_for_job(&db, "j", 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
        assert_eq!(list_for_job(&db, "j", 1).unwrap().len(), 1);
    }
}
