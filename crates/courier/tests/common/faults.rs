//! Provider wrapper that injects failures on selected file names.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use courier::filter::GlobFilter;
use courier::model::{Connection, Protocol};
use courier::provider::{
    file_name, ByteStream, FileInfo, ProviderError, ProviderFactory, ProviderRegistry,
    StorageProvider,
};

type Result<T> = std::result::Result<T, ProviderError>;

/// Failure plan shared by every provider a factory hands out.
#[derive(Default)]
pub struct Faults {
    /// Remaining download failures per file name.
    failing_downloads: Mutex<HashMap<String, u32>>,
    /// Downloads that end one byte early.
    truncated: Mutex<HashSet<String>>,
    /// Downloads that report "is a directory".
    directories: Mutex<HashSet<String>>,
    /// Source deletes that report success but leave the file in place.
    ignored_deletes: Mutex<HashSet<String>>,
    /// Uploads that always fail.
    failing_uploads: Mutex<HashSet<String>>,
    downloads: Mutex<HashMap<String, u32>>,
}

impl Faults {
    pub fn fail_downloads(&self, name: &str, times: u32) {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(name.to_string(), times);
    }

    pub fn truncate(&self, name: &str) {
        self.truncated.lock().unwrap().insert(name.to_string());
    }

    pub fn report_directory(&self, name: &str) {
        self.directories.lock().unwrap().insert(name.to_string());
    }

    pub fn ignore_delete(&self, name: &str) {
        self.ignored_deletes.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_uploads(&self, name: &str) {
        self.failing_uploads.lock().unwrap().insert(name.to_string());
    }

    /// How many times `name` was opened for download.
    pub fn downloads_of(&self, name: &str) -> u32 {
        self.downloads
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    fn take_failure(&self, name: &str) -> bool {
        let mut failing = self.failing_downloads.lock().unwrap();
        match failing.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

pub struct FaultyFactory {
    inner: ProviderRegistry,
    pub faults: Arc<Faults>,
}

impl FaultyFactory {
    pub fn new() -> Self {
        Self {
            inner: ProviderRegistry::default(),
            faults: Arc::new(Faults::default()),
        }
    }
}

impl ProviderFactory for FaultyFactory {
    fn create(&self, connection: &Connection) -> Result<Box<dyn StorageProvider>> {
        Ok(Box::new(FaultyProvider {
            inner: self.inner.create(connection)?,
            faults: self.faults.clone(),
        }))
    }
}

struct FaultyProvider {
    inner: Box<dyn StorageProvider>,
    faults: Arc<Faults>,
}

#[async_trait]
impl StorageProvider for FaultyProvider {
    fn protocol(&self) -> Protocol {
        self.inner.protocol()
    }

    async fn connect(&mut self) -> Result<()> {
        self.inner.connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.inner.disconnect().await
    }

    async fn list_files(&self, path: &str, filter: Option<&GlobFilter>) -> Result<Vec<FileInfo>> {
        self.inner.list_files(path, filter).await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.inner.list_directory(path).await
    }

    async fn download_file(&self, path: &str, size_hint: Option<u64>) -> Result<ByteStream> {
        let name = file_name(path).to_string();
        *self
            .faults
            .downloads
            .lock()
            .unwrap()
            .entry(name.clone())
            .or_insert(0) += 1;

        if self.faults.directories.lock().unwrap().contains(&name) {
            return Err(ProviderError::IsDirectory {
                path: path.to_string(),
            });
        }
        if self.faults.take_failure(&name) {
            return Err(ProviderError::Connection(format!(
                "injected failure reading {}",
                name
            )));
        }
        let stream = self.inner.download_file(path, size_hint).await?;
        if self.faults.truncated.lock().unwrap().contains(&name) {
            let limit = size_hint.unwrap_or(1).saturating_sub(1);
            return Ok(Box::pin(stream.take(limit)));
        }
        Ok(stream)
    }

    async fn upload_file(
        &self,
        stream: ByteStream,
        path: &str,
        size_hint: Option<u64>,
    ) -> Result<u64> {
        if self
            .faults
            .failing_uploads
            .lock()
            .unwrap()
            .contains(file_name(path))
        {
            return Err(ProviderError::Connection(format!(
                "injected failure writing {}",
                file_name(path)
            )));
        }
        self.inner.upload_file(stream, path, size_hint).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        if self
            .faults
            .ignored_deletes
            .lock()
            .unwrap()
            .contains(file_name(path))
        {
            return Ok(());
        }
        self.inner.delete_file(path).await
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.inner.move_file(from, to).await
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        self.inner.create_directory(path).await
    }

    async fn working_directory(&self) -> Result<Option<String>> {
        self.inner.working_directory().await
    }

    fn listing_lags(&self) -> bool {
        self.inner.listing_lags()
    }
}
