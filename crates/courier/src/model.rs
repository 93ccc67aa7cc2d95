//! Persisted records the engine reads and writes: connections, jobs, runs
//! and per-file transfer logs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::secrets::{self, SecretError};

// ─── Connection ─────────────────────────────────────────────────────────────

/// Storage protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Sftp,
    Smb,
    ObjectBlob,
    Local,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Sftp => "sftp",
            Protocol::Smb => "smb",
            Protocol::ObjectBlob => "object-blob",
            Protocol::Local => "local",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sftp" => Ok(Protocol::Sftp),
            "smb" => Ok(Protocol::Smb),
            "object-blob" => Ok(Protocol::ObjectBlob),
            "local" => Ok(Protocol::Local),
            other => Err(ParseEnumError::new("protocol", other)),
        }
    }
}

/// Protocol-specific credential bundle.
///
/// Each value may be given directly (`password`), as a file reference
/// (`passwordFile`) or as an environment variable name (`passwordEnvVar`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Returns a plain (non-secret) value, ignoring empty strings.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Resolves a secret value from `key`, `keyFile` or `keyEnvVar`.
    pub fn secret(&self, key: &str) -> Result<Option<SecretString>, SecretError> {
        let file_key = format!("{}File", key);
        let env_key = format!("{}EnvVar", key);
        secrets::resolve_secret_optional(
            self.0.get(key).map(String::as_str),
            self.0.get(&file_key).map(String::as_str),
            self.0.get(&env_key).map(String::as_str),
        )
    }

    /// Like [`Credentials::secret`] but fails when no source is configured.
    pub fn require_secret(&self, key: &str) -> Result<SecretString, SecretError> {
        self.secret(key)?.ok_or_else(|| SecretError::Missing {
            key: key.to_string(),
        })
    }
}

/// A configured storage endpoint. The engine only ever reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub credentials: Credentials,
}

// ─── Job ────────────────────────────────────────────────────────────────────

/// Disposition of a source file after a successful transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostTransferAction {
    #[default]
    Retain,
    Delete,
    Move,
}

impl PostTransferAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostTransferAction::Retain => "retain",
            PostTransferAction::Delete => "delete",
            PostTransferAction::Move => "move",
        }
    }
}

impl FromStr for PostTransferAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retain" => Ok(PostTransferAction::Retain),
            "delete" => Ok(PostTransferAction::Delete),
            "move" => Ok(PostTransferAction::Move),
            other => Err(ParseEnumError::new("post-transfer action", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Active,
    Inactive,
    Running,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Inactive => "inactive",
            JobStatus::Running => "running",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(JobStatus::Active),
            "inactive" => Ok(JobStatus::Inactive),
            "running" => Ok(JobStatus::Running),
            "error" => Ok(JobStatus::Error),
            other => Err(ParseEnumError::new("job status", other)),
        }
    }
}

/// A repeatable source → destination transfer definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub source_connection_id: String,
    pub source_path: String,
    pub destination_connection_id: String,
    pub destination_path: String,
    /// Comma-separated wildcard patterns; empty matches everything.
    #[serde(default)]
    pub file_filter: String,
    #[serde(default)]
    pub post_transfer_action: PostTransferAction,
    #[serde(default)]
    pub move_path: Option<String>,
    #[serde(default)]
    pub overwrite_existing: bool,
    #[serde(default)]
    pub skip_hidden_files: bool,
    #[serde(default)]
    pub extract_archives: bool,
    #[serde(default)]
    pub delta_sync: bool,
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    /// Whether the destination must be listed up front for exists/delta checks.
    pub fn needs_destination_index(&self) -> bool {
        self.delta_sync || !self.overwrite_existing
    }

    /// The configured move target, only when the action is `move`.
    pub fn move_target(&self) -> Option<&str> {
        match self.post_transfer_action {
            PostTransferAction::Move => self
                .move_path
                .as_deref()
                .filter(|p| !p.trim().is_empty()),
            _ => None,
        }
    }
}

// ─── JobRun ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            other => Err(ParseEnumError::new("run status", other)),
        }
    }
}

/// One execution attempt of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: String,
    pub job_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    pub total_files: u64,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file_bytes_transferred: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobRun {
    /// A fresh `running` run starting now.
    pub fn start(job_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            files_transferred: 0,
            bytes_transferred: 0,
            total_files: 0,
            total_bytes: 0,
            current_file: None,
            current_file_size: None,
            current_file_bytes_transferred: None,
            error_message: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Live progress snapshot written to the run row while it is `running`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub current_file: Option<String>,
    pub current_file_size: Option<u64>,
    pub current_file_bytes_transferred: Option<u64>,
    pub files_transferred: u64,
    pub bytes_transferred: u64,
}

/// Final state written once when a run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    pub completed_at: DateTime<Utc>,
}

// ─── TransferLog ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    Failure,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Success => "success",
            TransferStatus::Failure => "failure",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TransferStatus::Success),
            "failure" => Ok(TransferStatus::Failure),
            other => Err(ParseEnumError::new("transfer status", other)),
        }
    }
}

/// A per-file outcome row about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransferLog {
    pub job_run_id: String,
    pub file_name: String,
    pub source_path: String,
    pub destination_path: String,
    pub file_size: u64,
    pub status: TransferStatus,
    pub error_message: Option<String>,
    pub transferred_at: DateTime<Utc>,
}

impl NewTransferLog {
    pub fn success(
        run_id: &str,
        file_name: &str,
        source_path: &str,
        destination_path: &str,
        file_size: u64,
    ) -> Self {
        Self {
            job_run_id: run_id.to_string(),
            file_name: file_name.to_string(),
            source_path: source_path.to_string(),
            destination_path: destination_path.to_string(),
            file_size,
            status: TransferStatus::Success,
            error_message: None,
            transferred_at: Utc::now(),
        }
    }

    pub fn failure(
        run_id: &str,
        file_name: &str,
        source_path: &str,
        destination_path: &str,
        file_size: u64,
        error: String,
    ) -> Self {
        Self {
            status: TransferStatus::Failure,
            error_message: Some(error),
            ..Self::success(run_id, file_name, source_path, destination_path, file_size)
        }
    }
}

/// A persisted per-file outcome. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferLog {
    pub id: i64,
    pub job_run_id: String,
    pub file_name: String,
    pub source_path: String,
    pub destination_path: String,
    pub file_size: u64,
    pub transferred_at: DateTime<Utc>,
    pub status: TransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_protocol_round_trips_through_str() {
        for protocol in [
            Protocol::Sftp,
            Protocol::Smb,
            Protocol::ObjectBlob,
            Protocol::Local,
        ] {
            assert_eq!(protocol.as_str().parse::<Protocol>().unwrap(), protocol);
        }
        assert!("ftp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_protocol_serde_uses_kebab_case() {
        let json = serde_json::to_string(&Protocol::ObjectBlob).unwrap();
        assert_eq!(json, "\"object-blob\"");
    }

    #[test]
    fn test_credentials_direct_secret() {
        let creds = Credentials::new().with("password", "hunter2");
        let secret = creds.secret("password").unwrap().unwrap();
        assert_eq!(secret.expose_secret(), "hunter2");
    }

    #[test]
    fn test_credentials_secret_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pw");
        std::fs::write(&path, "from-file\n").unwrap();

        let creds = Credentials::new().with("passwordFile", path.to_string_lossy());
        let secret = creds.secret("password").unwrap().unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
    }

    #[test]
    fn test_credentials_missing_secret() {
        let creds = Credentials::new().with("username", "bob");
        assert!(creds.secret("password").unwrap().is_none());
        assert!(matches!(
            creds.require_secret("password"),
            Err(SecretError::Missing { .. })
        ));
    }

    #[test]
    fn test_credentials_get_ignores_blank() {
        let creds = Credentials::new().with("share", "  ");
        assert_eq!(creds.get("share"), None);
    }

    #[test]
    fn test_job_move_target_requires_move_action() {
        let mut job = Job {
            id: "j".into(),
            name: "j".into(),
            source_connection_id: "s".into(),
            source_path: "/data".into(),
            destination_connection_id: "d".into(),
            destination_path: "/out".into(),
            file_filter: String::new(),
            post_transfer_action: PostTransferAction::Retain,
            move_path: Some("/data/processed".into()),
            overwrite_existing: false,
            skip_hidden_files: false,
            extract_archives: false,
            delta_sync: false,
            status: JobStatus::Active,
        };
        assert_eq!(job.move_target(), None);
        job.post_transfer_action = PostTransferAction::Move;
        assert_eq!(job.move_target(), Some("/data/processed"));
    }

    #[test]
    fn test_transfer_log_failure_carries_error() {
        let log = NewTransferLog::failure("r", "a.csv", "/in/a.csv", "/out/a.csv", 3, "boom".into());
        assert_eq!(log.status, TransferStatus::Failure);
        assert_eq!(log.error_message.as_deref(), Some("boom"));
    }
}
