//! Local filesystem provider, confined to a base directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{path_segments, ByteStream, FileInfo, ProviderError, Result, StorageProvider};
use crate::model::{Connection, Protocol};

/// Cross-device link error (`EXDEV`).
#[cfg(unix)]
const CROSS_DEVICE_ERROR: i32 = 18;
/// `ERROR_NOT_SAME_DEVICE`.
#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17;
#[cfg(not(any(unix, windows)))]
const CROSS_DEVICE_ERROR: i32 = -1;

pub struct LocalProvider {
    base: PathBuf,
    root: Option<PathBuf>,
}

impl LocalProvider {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            root: None,
        }
    }

    /// Reads `basePath` from the credential bundle, falling back to `host`.
    pub fn from_connection(connection: &Connection) -> Result<Self> {
        let base = connection
            .credentials
            .get("basePath")
            .or_else(|| Some(connection.host.as_str()).filter(|h| !h.trim().is_empty()))
            .ok_or_else(|| {
                ProviderError::InvalidConfig(format!(
                    "local connection '{}' has no basePath",
                    connection.name
                ))
            })?;
        Ok(Self::new(base))
    }

    fn root(&self) -> Result<&Path> {
        self.root.as_deref().ok_or(ProviderError::NotConnected)
    }

    /// Maps a provider path onto the filesystem below the root.
    ///
    /// `..` is resolved lexically and may not climb above the root. Existing
    /// paths are also canonicalized so symlinks cannot point outside it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let root = self.root()?;
        let mut parts: Vec<&str> = Vec::new();
        for segment in path_segments(path) {
            if segment == ".." {
                if parts.pop().is_none() {
                    return Err(ProviderError::PathTraversal {
                        path: path.to_string(),
                    });
                }
            } else {
                parts.push(segment);
            }
        }

        let mut resolved = root.to_path_buf();
        for part in parts {
            let component = Path::new(part);
            if component
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(ProviderError::PathTraversal {
                    path: path.to_string(),
                });
            }
            resolved.push(component);
        }

        if let Ok(canonical) = std::fs::canonicalize(&resolved) {
            if !canonical.starts_with(root) {
                return Err(ProviderError::PathTraversal {
                    path: path.to_string(),
                });
            }
        }

        Ok(resolved)
    }

    async fn copy_then_remove(&self, from: &Path, to: &Path, display: &str) -> Result<()> {
        tokio::fs::copy(from, to)
            .await
            .map_err(|e| ProviderError::io(display, e))?;
        tokio::fs::remove_file(from)
            .await
            .map_err(|e| ProviderError::io(display, e))
    }
}

fn modified_at(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn protocol(&self) -> Protocol {
        Protocol::Local
    }

    async fn connect(&mut self) -> Result<()> {
        let display = self.base.display().to_string();
        let root = tokio::fs::canonicalize(&self.base)
            .await
            .map_err(|e| ProviderError::io(&display, e))?;
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| ProviderError::io(&display, e))?;
        if !metadata.is_dir() {
            return Err(ProviderError::InvalidConfig(format!(
                "basePath '{}' is not a directory",
                display
            )));
        }
        debug!(root = %root.display(), "Local provider ready");
        self.root = Some(root);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.root = None;
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>> {
        let dir = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ProviderError::io(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ProviderError::io(path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Follows symlinks; dangling links are skipped.
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(name = %name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if metadata.is_dir() {
                entries.push(FileInfo::directory(path, &name, modified_at(&metadata)));
            } else if metadata.is_file() {
                entries.push(FileInfo::file(
                    path,
                    &name,
                    metadata.len(),
                    modified_at(&metadata),
                ));
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn download_file(&self, path: &str, _size_hint: Option<u64>) -> Result<ByteStream> {
        let resolved = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        if metadata.is_dir() {
            return Err(ProviderError::IsDirectory {
                path: path.to_string(),
            });
        }
        let file = tokio::fs::File::open(&resolved)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        Ok(Box::pin(file))
    }

    async fn upload_file(
        &self,
        mut stream: ByteStream,
        path: &str,
        _size_hint: Option<u64>,
    ) -> Result<u64> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::io(path, e))?;
        }
        let mut file = tokio::fs::File::create(&resolved)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        let written = tokio::io::copy(&mut stream, &mut file)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        file.flush().await.map_err(|e| ProviderError::io(path, e))?;
        file.sync_all()
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        Ok(written)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        tokio::fs::remove_file(&resolved)
            .await
            .map_err(|e| ProviderError::io(path, e))
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERROR) => {
                debug!("Rename crosses devices, copying instead");
                self.copy_then_remove(&source, &target, from).await
            }
            Err(e) => Err(ProviderError::io(from, e)),
        }
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        tokio::fs::create_dir_all(&resolved)
            .await
            .map_err(|e| ProviderError::io(path, e))
    }

    async fn working_directory(&self) -> Result<Option<String>> {
        Ok(Some("/".to_string()))
    }
}
