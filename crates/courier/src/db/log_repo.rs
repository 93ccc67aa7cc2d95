//! Transfer log repository: append-only rows in `transfer_logs`.

use rusqlite::{params, Row};

use super::{get_parsed, get_timestamp, get_u64, timestamp, to_i64, Database, DatabaseError};
use crate::model::{NewTransferLog, TransferLog, TransferStatus};

fn from_row(row: &Row<'_>) -> Result<TransferLog, rusqlite::Error> {
    Ok(TransferLog {
        id: row.get("id")?,
        job_run_id: row.get("job_run_id")?,
        file_name: row.get("file_name")?,
        source_path: row.get("source_path")?,
        destination_path: row.get("destination_path")?,
        file_size: get_u64(row, "file_size")?,
        transferred_at: get_timestamp(row, "transferred_at")?,
        status: get_parsed(row, "status")?,
        error_message: row.get("error_message")?,
    })
}

/// Appends a log row and returns its id.
pub fn insert(db: &Database, log: &NewTransferLog) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO transfer_logs (job_run_id, file_name, source_path, destination_path,
             file_size, transferred_at, status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                log.job_run_id,
                log.file_name,
                log.source_path,
                log.destination_path,
                to_i64(log.file_size),
                timestamp(&log.transferred_at),
                log.status.as_str(),
                log.error_message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// All logs of a run in insertion order.
pub fn list_for_run(db: &Database, run_id: &str) -> Result<Vec<TransferLog>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM transfer_logs WHERE job_run_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![run_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Per-status counts for a run: `(success, failure)`.
pub fn count_by_status(db: &Database, run_id: &str) -> Result<(u64, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM transfer_logs WHERE job_run_id = ?1 GROUP BY status",
        )?;
        let mut success = 0u64;
        let mut failure = 0u64;
        let rows = stmt.query_map(params![run_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.parse::<TransferStatus>() {
                Ok(TransferStatus::Success) => success += count.max(0) as u64,
                Ok(TransferStatus::Failure) => failure += count.max(0) as u64,
                Err(e) => log::warn!("Ignoring transfer log rows with {}", e),
            }
        }
        Ok((success, failure))
    })
}
