//! Storage backends behind one capability trait.
//!
//! Every protocol implements [`StorageProvider`]. Paths handed to a provider
//! use `/` separators; a provider translates them to its native form.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::filter::GlobFilter;
use crate::model::Protocol;

pub mod error;
pub mod local;
pub mod object;
pub mod registry;
pub mod sftp;
pub mod smb;

pub use error::ProviderError;
pub use local::LocalProvider;
pub use object::ObjectStorageProvider;
pub use registry::{ProviderFactory, ProviderRegistry};
pub use sftp::SftpProvider;
pub use smb::SmbProvider;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// An owned byte stream, independent of the provider that produced it.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    /// Provider path usable for download, delete and move.
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub is_directory: bool,
}

impl FileInfo {
    pub fn file(dir: &str, name: &str, size: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.to_string(),
            path: join_path(dir, name),
            size,
            modified_at,
            is_directory: false,
        }
    }

    pub fn directory(dir: &str, name: &str, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.to_string(),
            path: join_path(dir, name),
            size: 0,
            modified_at,
            is_directory: true,
        }
    }
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn connect(&mut self) -> Result<()>;

    /// Best-effort; callers ignore the result.
    async fn disconnect(&mut self) -> Result<()>;

    /// Files (not directories) directly under `path`, optionally filtered by name.
    async fn list_files(&self, path: &str, filter: Option<&GlobFilter>) -> Result<Vec<FileInfo>> {
        let entries = self.list_directory(path).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_directory)
            .filter(|entry| filter.map_or(true, |f| f.matches(&entry.name)))
            .collect())
    }

    /// Files and directories directly under `path`.
    async fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>>;

    async fn download_file(&self, path: &str, size_hint: Option<u64>) -> Result<ByteStream>;

    /// Writes `stream` to `path`, replacing any existing file. Returns the
    /// number of bytes written.
    async fn upload_file(&self, stream: ByteStream, path: &str, size_hint: Option<u64>)
        -> Result<u64>;

    async fn delete_file(&self, path: &str) -> Result<()>;

    async fn move_file(&self, from: &str, to: &str) -> Result<()>;

    async fn create_directory(&self, path: &str) -> Result<()>;

    /// The session's starting directory, when the protocol has one.
    async fn working_directory(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Whether listings may trail completed writes, so verification should
    /// poll longer.
    fn listing_lags(&self) -> bool {
        false
    }
}

// ─── Path helpers ───────────────────────────────────────────────────────────

/// Joins a directory and a name with exactly one `/` between them.
pub fn join_path(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        return name.to_string();
    }
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// The final component of a `/` or `\` separated path.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
}

/// The path without its final component, or `None` at the root.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches(['/', '\\']);
    let idx = trimmed.rfind(['/', '\\'])?;
    if idx == 0 {
        Some(&trimmed[..1])
    } else {
        Some(&trimmed[..idx])
    }
}

/// Splits a path into its non-empty components, accepting both separators.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".")
}
