//! Object storage provider (Azure Blob, S3, or in-memory) on `object_store`.
//!
//! There are no real directories. A path with a trailing slash or without an
//! extension is treated as a virtual-directory prefix; listings group by `/`.
//! Directory creation writes a zero-byte `.folder` sentinel that listings hide.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{file_name, path_segments, ByteStream, FileInfo, ProviderError, Result, StorageProvider};
use crate::model::{Connection, Protocol};

/// Name of the zero-byte object that marks an otherwise empty prefix.
pub const FOLDER_SENTINEL: &str = ".folder";

pub struct ObjectStorageProvider {
    store: Arc<dyn ObjectStore>,
    label: String,
}

impl ObjectStorageProvider {
    /// Wraps an existing store.
    pub fn with_store(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    /// Builds a store from the credential bundle.
    ///
    /// `provider` selects the backend: `azure` (default: `account`,
    /// `accessKey`, `container`), `s3` (`bucket` or `container`, `region`,
    /// `accessKeyId`, `secretAccessKey`, optional `endpoint`) or `memory`.
    pub fn from_connection(connection: &Connection) -> Result<Self> {
        let creds = &connection.credentials;
        let backend = creds.get("provider").unwrap_or("azure");
        let store: Arc<dyn ObjectStore> = match backend {
            "azure" => {
                use object_store::azure::MicrosoftAzureBuilder;
                use secrecy::ExposeSecret;

                let account = require(connection, "account")?;
                let container = require(connection, "container")?;
                let mut builder = MicrosoftAzureBuilder::new()
                    .with_account(account)
                    .with_container_name(container);
                if let Some(key) = creds.secret("accessKey")? {
                    builder = builder.with_access_key(key.expose_secret());
                }
                Arc::new(builder.build()?)
            }
            "s3" => {
                use object_store::aws::AmazonS3Builder;
                use secrecy::ExposeSecret;

                let bucket = creds
                    .get("bucket")
                    .or_else(|| creds.get("container"))
                    .ok_or_else(|| missing(connection, "bucket"))?;
                let mut builder = AmazonS3Builder::new().with_bucket_name(bucket);
                if let Some(region) = creds.get("region") {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = creds.get("endpoint") {
                    builder = builder.with_endpoint(endpoint).with_allow_http(
                        endpoint.starts_with("http://"),
                    );
                }
                if let Some(key_id) = creds.get("accessKeyId") {
                    builder = builder.with_access_key_id(key_id);
                }
                if let Some(secret) = creds.secret("secretAccessKey")? {
                    builder = builder.with_secret_access_key(secret.expose_secret());
                }
                Arc::new(builder.build()?)
            }
            "memory" => Arc::new(object_store::memory::InMemory::new()),
            other => {
                return Err(ProviderError::InvalidConfig(format!(
                    "unknown object storage provider '{}'",
                    other
                )))
            }
        };
        Ok(Self::with_store(
            store,
            format!("{}:{}", backend, connection.name),
        ))
    }
}

fn missing(connection: &Connection, key: &str) -> ProviderError {
    ProviderError::InvalidConfig(format!(
        "object storage connection '{}' has no {}",
        connection.name, key
    ))
}

fn require<'a>(connection: &'a Connection, key: &str) -> Result<&'a str> {
    connection
        .credentials
        .get(key)
        .ok_or_else(|| missing(connection, key))
}

/// Normalizes a provider path into an object key (no leading or trailing `/`).
fn object_path(path: &str) -> ObjectPath {
    ObjectPath::from_iter(path_segments(path))
}

/// Trailing slash or no extension on the last segment.
pub fn is_virtual_directory(path: &str) -> bool {
    if path.ends_with('/') || path.is_empty() {
        return true;
    }
    !file_name(path).contains('.')
}

fn io_error(error: object_store::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, error)
}

#[async_trait]
impl StorageProvider for ObjectStorageProvider {
    fn protocol(&self) -> Protocol {
        Protocol::ObjectBlob
    }

    async fn connect(&mut self) -> Result<()> {
        debug!(store = %self.label, "Object store ready");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>> {
        let prefix = object_path(path);
        let prefix_arg = if prefix.as_ref().is_empty() {
            None
        } else {
            Some(&prefix)
        };
        let listing = self.store.list_with_delimiter(prefix_arg).await?;

        let mut entries: Vec<FileInfo> = Vec::new();
        for common in listing.common_prefixes {
            if let Some(name) = common.filename() {
                entries.push(FileInfo::directory(path, name, None));
            }
        }
        for object in listing.objects {
            let Some(name) = object.location.filename() else {
                continue;
            };
            if name == FOLDER_SENTINEL {
                continue;
            }
            entries.push(FileInfo::file(
                path,
                name,
                object.size,
                Some(object.last_modified),
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn download_file(&self, path: &str, _size_hint: Option<u64>) -> Result<ByteStream> {
        let result = self.store.get(&object_path(path)).await?;
        let stream = result.into_stream().map_err(io_error);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn upload_file(
        &self,
        mut stream: ByteStream,
        path: &str,
        size_hint: Option<u64>,
    ) -> Result<u64> {
        let mut buffer = Vec::with_capacity(size_hint.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        stream
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        let written = buffer.len() as u64;
        self.store
            .put(&object_path(path), PutPayload::from(buffer))
            .await?;
        Ok(written)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let location = object_path(path);
        if is_virtual_directory(path) {
            match self.store.head(&location).await {
                Ok(_) => {}
                Err(object_store::Error::NotFound { .. }) => {
                    let sentinel = location.child(FOLDER_SENTINEL);
                    self.store.delete(&sentinel).await?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.store.delete(&location).await?;
        Ok(())
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let source = object_path(from);
        let target = if to.ends_with('/') {
            object_path(to).child(file_name(from))
        } else {
            object_path(to)
        };
        self.store.copy(&source, &target).await?;
        self.store.delete(&source).await?;
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        let prefix = object_path(path);
        if prefix.as_ref().is_empty() {
            return Ok(());
        }
        self.store
            .put(&prefix.child(FOLDER_SENTINEL), PutPayload::default())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    async fn provider_with(objects: &[(&str, &[u8])]) -> (ObjectStorageProvider, Arc<InMemory>) {
        let store = Arc::new(InMemory::new());
        for (key, data) in objects {
            store
                .put(&ObjectPath::from(*key), PutPayload::from(data.to_vec()))
                .await
                .unwrap();
        }
        let mut provider = ObjectStorageProvider::with_store(store.clone(), "test");
        provider.connect().await.unwrap();
        (provider, store)
    }

    #[test]
    fn test_is_virtual_directory() {
        assert!(is_virtual_directory("inbox/"));
        assert!(is_virtual_directory("inbox/processed"));
        assert!(is_virtual_directory(""));
        assert!(!is_virtual_directory("inbox/a.csv"));
    }

    #[test]
    fn test_object_path_normalizes() {
        assert_eq!(object_path("/inbox//a.csv").as_ref(), "inbox/a.csv");
        assert_eq!(object_path("/").as_ref(), "");
    }

    #[tokio::test]
    async fn test_listing_groups_prefixes_and_hides_sentinel() {
        let (provider, _) = provider_with(&[
            ("inbox/a.csv", b"abc"),
            ("inbox/b.csv", b"defg"),
            ("inbox/processed/old.csv", b"x"),
            ("inbox/.folder", b""),
        ])
        .await;

        let entries = provider.list_directory("/inbox").await.unwrap();
        let names: Vec<(&str, bool)> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.is_directory))
            .collect();
        assert_eq!(
            names,
            vec![("a.csv", false), ("b.csv", false), ("processed", true)]
        );

        let files = provider.list_files("/inbox", None).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].size, 4);
        assert_eq!(files[1].path, "/inbox/b.csv");
        assert!(files[0].modified_at.is_some());
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (provider, _) = provider_with(&[]).await;
        let payload = vec![7u8; 1024];
        let written = provider
            .upload_file(
                Box::pin(std::io::Cursor::new(payload.clone())),
                "/out/blob.bin",
                Some(1024),
            )
            .await
            .unwrap();
        assert_eq!(written, 1024);

        let mut stream = provider.download_file("/out/blob.bin", None).await.unwrap();
        let mut read = Vec::new();
        stream.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let (provider, _) = provider_with(&[]).await;
        let err = provider.download_file("/nope.csv", None).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_move_is_copy_then_delete() {
        let (provider, store) = provider_with(&[("inbox/a.csv", b"abc")]).await;
        provider
            .move_file("/inbox/a.csv", "/inbox/processed/")
            .await
            .unwrap();

        assert!(store.head(&ObjectPath::from("inbox/a.csv")).await.is_err());
        assert!(store
            .head(&ObjectPath::from("inbox/processed/a.csv"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_and_delete_virtual_directory() {
        let (provider, store) = provider_with(&[]).await;
        provider.create_directory("/inbox/processed").await.unwrap();
        assert!(store
            .head(&ObjectPath::from("inbox/processed/.folder"))
            .await
            .is_ok());

        let entries = provider.list_directory("/inbox").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_directory);
        assert!(provider
            .list_files("/inbox/processed", None)
            .await
            .unwrap()
            .is_empty());

        provider.delete_file("/inbox/processed/").await.unwrap();
        assert!(store
            .head(&ObjectPath::from("inbox/processed/.folder"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_file() {
        let (provider, store) = provider_with(&[("out/a.csv", b"abc")]).await;
        provider.delete_file("/out/a.csv").await.unwrap();
        assert!(store.head(&ObjectPath::from("out/a.csv")).await.is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let connection = Connection {
            id: "o".into(),
            name: "blob".into(),
            protocol: Protocol::ObjectBlob,
            host: String::new(),
            port: 0,
            credentials: crate::model::Credentials::new().with("provider", "gcs"),
        };
        assert!(matches!(
            ObjectStorageProvider::from_connection(&connection),
            Err(ProviderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_memory_backend() {
        let connection = Connection {
            id: "o".into(),
            name: "scratch".into(),
            protocol: Protocol::ObjectBlob,
            host: String::new(),
            port: 0,
            credentials: crate::model::Credentials::new().with("provider", "memory"),
        };
        let provider = ObjectStorageProvider::from_connection(&connection).unwrap();
        assert_eq!(provider.label, "memory:scratch");
    }
}
