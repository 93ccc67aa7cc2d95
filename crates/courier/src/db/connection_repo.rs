//! Connection repository: CRUD operations for the `connections` table.
//!
//! Credentials are stored as a JSON object. Values may be indirections
//! (`passwordFile`, `passwordEnvVar`) rather than the secrets themselves.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use super::{get_parsed, timestamp, Database, DatabaseError};
use crate::model::{Connection, Credentials};

fn from_row(row: &Row<'_>) -> Result<Connection, rusqlite::Error> {
    let credentials_idx = row.as_ref().column_index("credentials")?;
    let raw_credentials: String = row.get(credentials_idx)?;
    let credentials: Credentials = serde_json::from_str(&raw_credentials).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(credentials_idx, Type::Text, Box::new(e))
    })?;

    Ok(Connection {
        id: row.get("id")?,
        name: row.get("name")?,
        protocol: get_parsed(row, "protocol")?,
        host: row.get("host")?,
        port: row.get("port")?,
        credentials,
    })
}

fn encode_credentials(credentials: &Credentials) -> Result<String, DatabaseError> {
    serde_json::to_string(credentials).map_err(|e| DatabaseError::Json {
        table: "connections",
        column: "credentials",
        source: e,
    })
}

/// Inserts a new connection row.
pub fn insert(db: &Database, connection: &Connection) -> Result<(), DatabaseError> {
    let credentials = encode_credentials(&connection.credentials)?;
    let now = timestamp(&Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO connections (id, name, protocol, host, port, credentials, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                connection.id,
                connection.name,
                connection.protocol.as_str(),
                connection.host,
                connection.port,
                credentials,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing connection. Returns `false` if no row matched.
pub fn update(db: &Database, connection: &Connection) -> Result<bool, DatabaseError> {
    let credentials = encode_credentials(&connection.credentials)?;
    let now = timestamp(&Utc::now());
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE connections SET name=?2, protocol=?3, host=?4, port=?5, credentials=?6, updated_at=?7
             WHERE id=?1",
            params![
                connection.id,
                connection.name,
                connection.protocol.as_str(),
                connection.host,
                connection.port,
                credentials,
                now,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a connection by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Connection>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM connections WHERE id = ?1",
                params![id],
                from_row,
            )
            .optional()?)
    })
}

/// Finds a connection by its unique name.
pub fn find_by_name(db: &Database, name: &str) -> Result<Option<Connection>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM connections WHERE name = ?1",
                params![name],
                from_row,
            )
            .optional()?)
    })
}

/// Lists all connections ordered by name.
pub fn list(db: &Database) -> Result<Vec<Connection>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM connections ORDER BY name")?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a connection. Fails while a job still references it.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM connections WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}
