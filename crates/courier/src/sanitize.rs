//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Run logs are shipped to shared collectors, so span fields carry file
//! names and endpoint labels only: never full remote paths or credentials.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::model::Connection;

/// Returns only the final component of a remote or local path.
///
/// Accepts both `/` and `\` separators since SMB paths use the latter.
pub fn redact_path(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("<root>")
        .to_string()
}

/// A credential-free label for a connection, e.g. `sftp://files.example.com:22`.
pub fn describe_connection(connection: &Connection) -> String {
    if connection.host.trim().is_empty() {
        return format!("{}://{}", connection.protocol, connection.name);
    }
    format!(
        "{}://{}:{}",
        connection.protocol, connection.host, connection.port
    )
}

/// Short deterministic hash of a path, for correlating log lines about the
/// same directory without exposing it.
pub fn hash_path(path: &str) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
