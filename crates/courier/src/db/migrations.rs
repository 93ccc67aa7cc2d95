//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order, each inside its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_connections_table",
        sql: include_str!("sql/001_create_connections.sql"),
    },
    Migration {
        version: 2,
        description: "create_jobs_table",
        sql: include_str!("sql/002_create_jobs.sql"),
    },
    Migration {
        version: 3,
        description: "create_job_runs_table",
        sql: include_str!("sql/003_create_job_runs.sql"),
    },
    Migration {
        version: 4,
        description: "create_transfer_logs_table",
        sql: include_str!("sql/004_create_transfer_logs.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, description) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.description
        );
        if let Err(e) = conn.execute_batch(&batch) {
            // Leave the connection usable if the failure happened mid-transaction.
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}

/// Highest migration version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    fn table_exists(conn: &Connection, table: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |r| r.get::<_, u32>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = fresh();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
        for table in ["connections", "jobs", "job_runs", "transfer_logs"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let max: u32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(max, latest_version());
    }

    #[test]
    fn test_versions_are_increasing() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn test_transfer_logs_cascade_with_runs() {
        let conn = fresh();
        run_all(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO connections (id, name, protocol, created_at, updated_at)
                VALUES ('c', 'c', 'local', 'now', 'now');
             INSERT INTO jobs (id, name, source_connection_id, source_path,
                destination_connection_id, destination_path, created_at, updated_at)
                VALUES ('j', 'j', 'c', '/in', 'c', '/out', 'now', 'now');
             INSERT INTO job_runs (id, job_id, status, started_at)
                VALUES ('r', 'j', 'running', 'now');
             INSERT INTO transfer_logs (job_run_id, file_name, source_path,
                destination_path, transferred_at, status)
                VALUES ('r', 'a.csv', '/in/a.csv', '/out/a.csv', 'now', 'success');
             DELETE FROM job_runs WHERE id = 'r';",
        )
        .unwrap();

        let logs: u32 = conn
            .query_row("SELECT COUNT(*) FROM transfer_logs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(logs, 0);
    }
}
