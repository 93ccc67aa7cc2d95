//! Job repository: CRUD operations for the `jobs` table.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{get_parsed, timestamp, Database, DatabaseError};
use crate::model::{Job, JobStatus};

fn from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    Ok(Job {
        id: row.get("id")?,
        name: row.get("name")?,
        source_connection_id: row.get("source_connection_id")?,
        source_path: row.get("source_path")?,
        destination_connection_id: row.get("destination_connection_id")?,
        destination_path: row.get("destination_path")?,
        file_filter: row.get("file_filter")?,
        post_transfer_action: get_parsed(row, "post_transfer_action")?,
        move_path: row.get("move_path")?,
        overwrite_existing: row.get("overwrite_existing")?,
        skip_hidden_files: row.get("skip_hidden_files")?,
        extract_archives: row.get("extract_archives")?,
        delta_sync: row.get("delta_sync")?,
        status: get_parsed(row, "status")?,
    })
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    let now = timestamp(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, name, source_connection_id, source_path,
             destination_connection_id, destination_path, file_filter, post_transfer_action,
             move_path, overwrite_existing, skip_hidden_files, extract_archives, delta_sync,
             status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                job.id,
                job.name,
                job.source_connection_id,
                job.source_path,
                job.destination_connection_id,
                job.destination_path,
                job.file_filter,
                job.post_transfer_action.as_str(),
                job.move_path,
                job.overwrite_existing,
                job.skip_hidden_files,
                job.extract_archives,
                job.delta_sync,
                job.status.as_str(),
                now,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing job. All fields except `id` and `created_at` are overwritten.
pub fn update(db: &Database, job: &Job) -> Result<bool, DatabaseError> {
    let now = timestamp(&Utc::now());
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET name=?2, source_connection_id=?3, source_path=?4,
             destination_connection_id=?5, destination_path=?6, file_filter=?7,
             post_transfer_action=?8, move_path=?9, overwrite_existing=?10,
             skip_hidden_files=?11, extract_archives=?12, delta_sync=?13, status=?14,
             updated_at=?15
             WHERE id=?1",
            params![
                job.id,
                job.name,
                job.source_connection_id,
                job.source_path,
                job.destination_connection_id,
                job.destination_path,
                job.file_filter,
                job.post_transfer_action.as_str(),
                job.move_path,
                job.overwrite_existing,
                job.skip_hidden_files,
                job.extract_archives,
                job.delta_sync,
                job.status.as_str(),
                now,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Updates only the status of a job.
pub fn update_status(db: &Database, id: &str, status: JobStatus) -> Result<(), DatabaseError> {
    let now = timestamp(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status=?2, updated_at=?3 WHERE id=?1",
            params![id, status.as_str(), now],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], from_row)
            .optional()?)
    })
}

/// Lists jobs ordered by name, optionally restricted to one status.
pub fn list(db: &Database, status: Option<JobStatus>) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY name")?;
                let rows = stmt
                    .query_map(params![status.as_str()], from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY name")?;
                let rows = stmt
                    .query_map([], from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

/// Deletes a job and, through cascading keys, its runs and logs.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}
