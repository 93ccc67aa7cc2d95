//! SMB/CIFS provider.
//!
//! Paths are backslash-separated with the share root as the empty path.
//! The blocking libsmbclient binding (`pavao`, behind the `smb` feature)
//! runs on its own worker thread and is driven through [`SmbSession`].
//!
//! Servers keep a file handle open for a short window after the last read
//! and report `STATUS_DELETE_PENDING`-style errors while a previous delete
//! is still settling, so destructive operations wait and retry.

use std::io::{Seek, SeekFrom};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::{file_name, ByteStream, FileInfo, ProviderError, Result, StorageProvider};
use crate::config::SmbSettings;
use crate::model::{Connection, Protocol};

/// What the server reported an entry to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmbEntryKind {
    File,
    Directory,
    /// Links and other types; classified by name.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbEntry {
    pub name: String,
    pub kind: SmbEntryKind,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// File contents moved between the worker and the async side.
#[derive(Debug)]
pub enum SmbPayload {
    Memory(Vec<u8>),
    /// Anonymous temp file positioned at the start.
    Spooled(std::fs::File),
}

impl SmbPayload {
    pub fn into_stream(self) -> ByteStream {
        match self {
            SmbPayload::Memory(bytes) => Box::pin(std::io::Cursor::new(bytes)),
            SmbPayload::Spooled(file) => Box::pin(tokio::fs::File::from_std(file)),
        }
    }
}

/// Operations a connected SMB session must provide. Paths are share-relative
/// and backslash-separated.
#[async_trait]
pub trait SmbSession: Send + Sync {
    async fn list(&self, path: &str) -> Result<Vec<SmbEntry>>;

    /// Reads a whole file. Files larger than `spool_over` bytes are written
    /// to a temp file instead of memory.
    async fn read(&self, path: &str, spool_over: u64) -> Result<SmbPayload>;

    async fn write(&self, path: &str, payload: SmbPayload) -> Result<u64>;

    async fn remove(&self, path: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Server, share and account for a libsmbclient session.
#[derive(Debug)]
pub struct SmbTarget {
    pub host: String,
    pub port: u16,
    pub share: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub domain: Option<String>,
}

impl Clone for SmbTarget {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            share: self.share.clone(),
            username: self.username.clone(),
            password: self
                .password
                .as_ref()
                .map(|p| SecretString::from(p.expose_secret())),
            domain: self.domain.clone(),
        }
    }
}

pub struct SmbProvider {
    target: Option<SmbTarget>,
    settings: SmbSettings,
    session: Option<Box<dyn SmbSession>>,
    last_read: Mutex<Option<Instant>>,
}

impl SmbProvider {
    /// Builds a provider from `share`, `username`, `password` and `domain`.
    pub fn from_connection(connection: &Connection, settings: SmbSettings) -> Result<Self> {
        let creds = &connection.credentials;
        let share = creds
            .get("share")
            .map(|s| s.trim_matches(['/', '\\']).to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidConfig(format!(
                    "smb connection '{}' has no share",
                    connection.name
                ))
            })?;
        if connection.host.trim().is_empty() {
            return Err(ProviderError::InvalidConfig(format!(
                "smb connection '{}' has no host",
                connection.name
            )));
        }

        Ok(Self {
            target: Some(SmbTarget {
                host: connection.host.clone(),
                port: connection.port,
                share,
                username: creds.get("username").map(str::to_string),
                password: creds.secret("password")?,
                domain: creds.get("domain").map(str::to_string),
            }),
            settings,
            session: None,
            last_read: Mutex::new(None),
        })
    }

    /// A provider over an already-open session.
    pub fn with_session(session: Box<dyn SmbSession>, settings: SmbSettings) -> Self {
        Self {
            target: None,
            settings,
            session: Some(session),
            last_read: Mutex::new(None),
        }
    }

    fn session(&self) -> Result<&dyn SmbSession> {
        self.session.as_deref().ok_or(ProviderError::NotConnected)
    }

    fn mark_read(&self) {
        if let Ok(mut last) = self.last_read.lock() {
            *last = Some(Instant::now());
        }
    }

    /// Sleeps out whatever remains of the handle-release window since the
    /// last read.
    async fn wait_for_handle_release(&self) {
        let remaining = self
            .last_read
            .lock()
            .ok()
            .and_then(|last| *last)
            .and_then(|at| self.settings.handle_release().checked_sub(at.elapsed()));
        if let Some(remaining) = remaining {
            if !remaining.is_zero() {
                debug!(wait_ms = remaining.as_millis() as u64, "Waiting for SMB handle release");
                tokio::time::sleep(remaining).await;
            }
        }
    }

    /// Runs `op`, retrying with linear backoff while the server reports a
    /// pending status.
    async fn retry_pending<'a, F, Fut>(&'a self, what: &str, mut op: F) -> Result<()>
    where
        F: FnMut(&'a dyn SmbSession) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let session = self.session()?;
        let max = self.settings.pending_retries.max(1);
        let mut attempt = 1;
        loop {
            match op(session).await {
                Ok(()) => return Ok(()),
                Err(e) if is_pending(&e) && attempt < max => {
                    warn!(attempt, error = %e, "SMB {} pending, retrying", what);
                    tokio::time::sleep(self.settings.pending_backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn buffer_upload(&self, mut stream: ByteStream, path: &str) -> Result<SmbPayload> {
        let threshold = self.settings.spool_threshold_bytes;
        let mut memory = Vec::new();
        let mut limited = (&mut stream).take(threshold.saturating_add(1));
        limited
            .read_to_end(&mut memory)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        if (memory.len() as u64) <= threshold {
            return Ok(SmbPayload::Memory(memory));
        }

        let spool = tempfile::tempfile().map_err(|e| ProviderError::io(path, e))?;
        let mut spool = tokio::fs::File::from_std(spool);
        spool
            .write_all(&memory)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        drop(memory);
        tokio::io::copy(&mut stream, &mut spool)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        spool.flush().await.map_err(|e| ProviderError::io(path, e))?;
        let mut spool = spool.into_std().await;
        spool
            .seek(SeekFrom::Start(0))
            .map_err(|e| ProviderError::io(path, e))?;
        Ok(SmbPayload::Spooled(spool))
    }
}

/// Converts a `/`-separated provider path to a share-relative SMB path.
pub fn smb_path(path: &str) -> String {
    super::path_segments(path).collect::<Vec<_>>().join("\\")
}

/// Guesses whether a name denotes a directory: anything without a short
/// (1–5 character) alphanumeric extension is treated as one.
pub fn looks_like_directory(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            stem.is_empty()
                || ext.is_empty()
                || ext.len() > 5
                || !ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => true,
    }
}

fn is_pending(error: &ProviderError) -> bool {
    error
        .backend_message()
        .is_some_and(|m| m.to_lowercase().contains("pending"))
}

#[async_trait]
impl StorageProvider for SmbProvider {
    fn protocol(&self) -> Protocol {
        Protocol::Smb
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let target = self.target.clone().ok_or(ProviderError::NotConnected)?;
        self.session = Some(open_session(target).await?);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>> {
        let entries = self.session()?.list(&smb_path(path)).await?;
        let mut infos: Vec<FileInfo> = entries
            .into_iter()
            .filter(|e| e.name != "." && e.name != "..")
            .map(|e| {
                let is_dir = match e.kind {
                    SmbEntryKind::Directory => true,
                    SmbEntryKind::File => false,
                    SmbEntryKind::Unknown => looks_like_directory(&e.name),
                };
                if is_dir {
                    FileInfo::directory(path, &e.name, e.modified_at)
                } else {
                    FileInfo::file(path, &e.name, e.size, e.modified_at)
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn download_file(&self, path: &str, _size_hint: Option<u64>) -> Result<ByteStream> {
        let payload = self
            .session()?
            .read(&smb_path(path), self.settings.spool_threshold_bytes)
            .await;
        self.mark_read();
        Ok(payload?.into_stream())
    }

    async fn upload_file(
        &self,
        stream: ByteStream,
        path: &str,
        _size_hint: Option<u64>,
    ) -> Result<u64> {
        let session = self.session()?;
        let payload = self.buffer_upload(stream, path).await?;
        session.write(&smb_path(path), payload).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.wait_for_handle_release().await;
        let target = smb_path(path);
        self.retry_pending("delete", |session| session.remove(&target))
            .await
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.wait_for_handle_release().await;
        let source = smb_path(from);
        let target = if to.ends_with(['/', '\\']) {
            smb_path(&super::join_path(to, file_name(from)))
        } else {
            smb_path(to)
        };
        self.retry_pending("rename", |session| session.rename(&source, &target))
            .await
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        let session = self.session()?;
        let mut current = String::new();
        for segment in super::path_segments(path) {
            if !current.is_empty() {
                current.push('\\');
            }
            current.push_str(segment);
            if let Err(e) = session.mkdir(&current).await {
                if !e.to_string().to_lowercase().contains("exist") {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn listing_lags(&self) -> bool {
        true
    }
}

#[cfg(feature = "smb")]
async fn open_session(target: SmbTarget) -> Result<Box<dyn SmbSession>> {
    Ok(Box::new(worker::WorkerSession::spawn(target).await?))
}

#[cfg(not(feature = "smb"))]
async fn open_session(target: SmbTarget) -> Result<Box<dyn SmbSession>> {
    Err(ProviderError::Unsupported(format!(
        "SMB support for {} is not compiled in (enable the `smb` feature)",
        target.host
    )))
}

#[cfg(feature = "smb")]
mod worker {
    //! Owns the libsmbclient context on a dedicated thread. Requests arrive
    //! over a channel and answer through oneshot replies.

    use std::io::{Read, Seek, SeekFrom};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use pavao::{
        SmbClient, SmbCredentials, SmbDirentType, SmbMode, SmbOpenOptions, SmbOptions,
    };
    use secrecy::ExposeSecret;
    use tokio::sync::{mpsc, oneshot};
    use tracing::{debug, info};

    use super::{SmbEntry, SmbEntryKind, SmbPayload, SmbSession, SmbTarget};
    use crate::provider::{ProviderError, Result};

    /// Upper bound on the buffer reserved from a `stat` size.
    const READ_PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

    enum SmbCommand {
        List {
            path: String,
            reply: oneshot::Sender<Result<Vec<SmbEntry>>>,
        },
        Read {
            path: String,
            spool_over: u64,
            reply: oneshot::Sender<Result<SmbPayload>>,
        },
        Write {
            path: String,
            payload: SmbPayload,
            reply: oneshot::Sender<Result<u64>>,
        },
        Remove {
            path: String,
            reply: oneshot::Sender<Result<()>>,
        },
        Rename {
            from: String,
            to: String,
            reply: oneshot::Sender<Result<()>>,
        },
        Mkdir {
            path: String,
            reply: oneshot::Sender<Result<()>>,
        },
        Close,
    }

    pub(super) struct WorkerSession {
        tx: mpsc::UnboundedSender<SmbCommand>,
    }

    fn smb_error(path: &str, error: impl std::fmt::Display) -> ProviderError {
        ProviderError::Smb {
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    /// pavao expects `/`-rooted paths.
    fn client_path(path: &str) -> String {
        format!("/{}", path.replace('\\', "/"))
    }

    impl WorkerSession {
        pub(super) async fn spawn(target: SmbTarget) -> Result<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            let label = target.host.clone();

            std::thread::Builder::new()
                .name(format!("smb-{}", label))
                .spawn(move || run(target, rx, ready_tx))
                .map_err(|e| ProviderError::Connection(format!("Failed to start SMB worker: {}", e)))?;

            ready_rx
                .await
                .map_err(|_| ProviderError::Connection("SMB worker exited".to_string()))??;
            info!(host = %label, "SMB session established");
            Ok(Self { tx })
        }

        async fn request<T>(
            &self,
            build: impl FnOnce(oneshot::Sender<Result<T>>) -> SmbCommand,
        ) -> Result<T> {
            let (reply, rx) = oneshot::channel();
            self.tx
                .send(build(reply))
                .map_err(|_| ProviderError::NotConnected)?;
            rx.await.map_err(|_| ProviderError::NotConnected)?
        }
    }

    fn connect(target: &SmbTarget) -> Result<SmbClient> {
        let server = if target.port == 0 {
            format!("smb://{}", target.host)
        } else {
            format!("smb://{}:{}", target.host, target.port)
        };
        let mut credentials = SmbCredentials::default()
            .server(server)
            .share(format!("/{}", target.share));
        if let Some(username) = &target.username {
            credentials = credentials.username(username);
        }
        if let Some(password) = &target.password {
            credentials = credentials.password(password.expose_secret());
        }
        if let Some(domain) = &target.domain {
            credentials = credentials.workgroup(domain);
        }
        SmbClient::new(
            credentials,
            SmbOptions::default()
                .case_sensitive(false)
                .one_share_per_server(true),
        )
        .map_err(|e| ProviderError::Connection(e.to_string()))
    }

    fn run(
        target: SmbTarget,
        mut rx: mpsc::UnboundedReceiver<SmbCommand>,
        ready: oneshot::Sender<Result<()>>,
    ) {
        let client = match connect(&target) {
            Ok(client) => {
                let _ = ready.send(Ok(()));
                client
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        while let Some(command) = rx.blocking_recv() {
            match command {
                SmbCommand::List { path, reply } => {
                    let _ = reply.send(list(&client, &path));
                }
                SmbCommand::Read {
                    path,
                    spool_over,
                    reply,
                } => {
                    let _ = reply.send(read(&client, &path, spool_over));
                }
                SmbCommand::Write {
                    path,
                    payload,
                    reply,
                } => {
                    let _ = reply.send(write(&client, &path, payload));
                }
                SmbCommand::Remove { path, reply } => {
                    let _ = reply.send(
                        client
                            .unlink(client_path(&path))
                            .map_err(|e| smb_error(&path, e)),
                    );
                }
                SmbCommand::Rename { from, to, reply } => {
                    let _ = reply.send(
                        client
                            .rename(client_path(&from), client_path(&to))
                            .map_err(|e| smb_error(&from, e)),
                    );
                }
                SmbCommand::Mkdir { path, reply } => {
                    let _ = reply.send(
                        client
                            .mkdir(client_path(&path), SmbMode::from(0o755))
                            .map_err(|e| smb_error(&path, e)),
                    );
                }
                SmbCommand::Close => break,
            }
        }
        debug!(host = %target.host, "SMB worker stopped");
    }

    fn list(client: &SmbClient, path: &str) -> Result<Vec<SmbEntry>> {
        let dir = client_path(path);
        let dirents = client.list_dir(&dir).map_err(|e| smb_error(path, e))?;
        let mut entries = Vec::with_capacity(dirents.len());
        for dirent in dirents {
            let name = dirent.name().to_string();
            let kind = match dirent.get_type() {
                SmbDirentType::Dir => SmbEntryKind::Directory,
                SmbDirentType::File => SmbEntryKind::File,
                _ => SmbEntryKind::Unknown,
            };
            let (size, modified_at) = if kind == SmbEntryKind::Directory {
                (0, None)
            } else {
                let full = if dir.ends_with('/') {
                    format!("{}{}", dir, name)
                } else {
                    format!("{}/{}", dir, name)
                };
                match client.stat(&full) {
                    Ok(stat) => (stat.size, Some(DateTime::<Utc>::from(stat.modified))),
                    Err(_) => (0, None),
                }
            };
            entries.push(SmbEntry {
                name,
                kind,
                size,
                modified_at,
            });
        }
        Ok(entries)
    }

    fn read(client: &SmbClient, path: &str, spool_over: u64) -> Result<SmbPayload> {
        let remote = client_path(path);
        let size = client.stat(&remote).map_err(|e| smb_error(path, e))?.size;
        let mut file = client
            .open_with(&remote, SmbOpenOptions::default().read(true))
            .map_err(|e| smb_error(path, e))?;

        if size > spool_over {
            let mut spool = tempfile::tempfile().map_err(|e| ProviderError::io(path, e))?;
            std::io::copy(&mut file, &mut spool).map_err(|e| ProviderError::io(path, e))?;
            spool
                .seek(SeekFrom::Start(0))
                .map_err(|e| ProviderError::io(path, e))?;
            Ok(SmbPayload::Spooled(spool))
        } else {
            let mut data = Vec::with_capacity(size.min(READ_PREALLOC_LIMIT) as usize);
            file.read_to_end(&mut data)
                .map_err(|e| ProviderError::io(path, e))?;
            Ok(SmbPayload::Memory(data))
        }
    }

    fn write(client: &SmbClient, path: &str, payload: SmbPayload) -> Result<u64> {
        let mut file = client
            .open_with(
                client_path(path),
                SmbOpenOptions::default()
                    .create(true)
                    .write(true)
                    .truncate(true),
            )
            .map_err(|e| smb_error(path, e))?;
        let written = match payload {
            SmbPayload::Memory(data) => {
                std::io::copy(&mut data.as_slice(), &mut file)
            }
            SmbPayload::Spooled(mut spool) => std::io::copy(&mut spool, &mut file),
        }
        .map_err(|e| ProviderError::io(path, e))?;
        Ok(written)
    }

    #[async_trait]
    impl SmbSession for WorkerSession {
        async fn list(&self, path: &str) -> Result<Vec<SmbEntry>> {
            let path = path.to_string();
            self.request(|reply| SmbCommand::List { path, reply }).await
        }

        async fn read(&self, path: &str, spool_over: u64) -> Result<SmbPayload> {
            let path = path.to_string();
            self.request(|reply| SmbCommand::Read {
                path,
                spool_over,
                reply,
            })
            .await
        }

        async fn write(&self, path: &str, payload: SmbPayload) -> Result<u64> {
            let path = path.to_string();
            self.request(|reply| SmbCommand::Write {
                path,
                payload,
                reply,
            })
            .await
        }

        async fn remove(&self, path: &str) -> Result<()> {
            let path = path.to_string();
            self.request(|reply| SmbCommand::Remove { path, reply })
                .await
        }

        async fn rename(&self, from: &str, to: &str) -> Result<()> {
            let from = from.to_string();
            let to = to.to_string();
            self.request(|reply| SmbCommand::Rename { from, to, reply })
                .await
        }

        async fn mkdir(&self, path: &str) -> Result<()> {
            let path = path.to_string();
            self.request(|reply| SmbCommand::Mkdir { path, reply })
                .await
        }

        async fn close(&self) -> Result<()> {
            let _ = self.tx.send(SmbCommand::Close);
            Ok(())
        }
    }
}
