//! SFTP provider on russh + russh-sftp.
//!
//! Reads and writes stream through remote file handles; nothing is buffered
//! beyond the copy loop's chunk.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{HashAlg, PublicKey};
use russh::Disconnect;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    file_name, join_path, parent_path, path_segments, ByteStream, FileInfo, ProviderError, Result,
    StorageProvider,
};
use crate::model::{Connection, Protocol};

const DEFAULT_PORT: u16 = 22;

enum SftpAuth {
    Password(SecretString),
    Key {
        pem: SecretString,
        passphrase: Option<SecretString>,
    },
}

/// Host key policy: accept any key unless a fingerprint is pinned.
struct HostKeyCheck {
    host: String,
    pinned: Option<String>,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.pinned {
            Some(expected) if expected.trim() != actual => {
                warn!(host = %self.host, fingerprint = %actual, "Host key does not match pinned fingerprint");
                Ok(false)
            }
            Some(_) => Ok(true),
            None => {
                debug!(host = %self.host, fingerprint = %actual, "Accepting host key");
                Ok(true)
            }
        }
    }
}

struct SftpConnection {
    handle: Handle<HostKeyCheck>,
    sftp: SftpSession,
    home: String,
}

pub struct SftpProvider {
    host: String,
    port: u16,
    username: String,
    auth: SftpAuth,
    host_fingerprint: Option<String>,
    connect_timeout: Duration,
    conn: Option<SftpConnection>,
}

impl SftpProvider {
    /// Builds a provider from `username` plus `password` or `privateKey`
    /// (with optional `passphrase`). `hostKeyFingerprint` pins the server key.
    pub fn from_connection(connection: &Connection, connect_timeout: Duration) -> Result<Self> {
        let creds = &connection.credentials;
        let username = creds
            .get("username")
            .ok_or_else(|| {
                ProviderError::InvalidConfig(format!(
                    "sftp connection '{}' has no username",
                    connection.name
                ))
            })?
            .to_string();

        let auth = match creds.secret("privateKey")? {
            Some(pem) => SftpAuth::Key {
                pem,
                passphrase: creds.secret("passphrase")?,
            },
            None => SftpAuth::Password(creds.require_secret("password")?),
        };

        if connection.host.trim().is_empty() {
            return Err(ProviderError::InvalidConfig(format!(
                "sftp connection '{}' has no host",
                connection.name
            )));
        }

        Ok(Self {
            host: connection.host.clone(),
            port: if connection.port == 0 {
                DEFAULT_PORT
            } else {
                connection.port
            },
            username,
            auth,
            host_fingerprint: creds.get("hostKeyFingerprint").map(str::to_string),
            connect_timeout,
            conn: None,
        })
    }

    fn session(&self) -> Result<&SftpSession> {
        self.conn
            .as_ref()
            .map(|c| &c.sftp)
            .ok_or(ProviderError::NotConnected)
    }

    async fn open_transport(&self) -> Result<Handle<HostKeyCheck>> {
        let addr = format!("{}:{}", self.host, self.port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| ProviderError::Connection(format!("Failed to resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| ProviderError::Connection(format!("No address found for {}", addr)))?;

        let config = client::Config {
            inactivity_timeout: Some(Duration::from_secs(300)),
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        let handler = HostKeyCheck {
            host: self.host.clone(),
            pinned: self.host_fingerprint.clone(),
        };

        let result = tokio::time::timeout(
            self.connect_timeout,
            client::connect(Arc::new(config), socket_addr, handler),
        )
        .await
        .map_err(|_| ProviderError::Timeout(format!("connecting to {}", addr)))?;

        match result {
            Ok(handle) => Ok(handle),
            Err(russh::Error::UnknownKey) => Err(ProviderError::HostKeyMismatch {
                host: self.host.clone(),
                expected: self.host_fingerprint.clone().unwrap_or_default(),
                actual: "unrecognized key".to_string(),
            }),
            Err(e) => Err(ProviderError::Connection(e.to_string())),
        }
    }

    async fn authenticate(&self, handle: &mut Handle<HostKeyCheck>) -> Result<()> {
        let result = match &self.auth {
            SftpAuth::Password(password) => handle
                .authenticate_password(&self.username, password.expose_secret())
                .await
                .map_err(|e| ProviderError::Authentication(e.to_string()))?,
            SftpAuth::Key { pem, passphrase } => {
                let key = russh::keys::decode_secret_key(
                    pem.expose_secret(),
                    passphrase.as_ref().map(|p| p.expose_secret()),
                )
                .map_err(|e| ProviderError::Authentication(format!("Invalid private key: {}", e)))?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                handle
                    .authenticate_publickey(&self.username, key_with_hash)
                    .await
                    .map_err(|e| ProviderError::Authentication(e.to_string()))?
            }
        };

        if !result.success() {
            return Err(ProviderError::Authentication(
                "Authentication rejected by server".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates every missing directory along `dir`.
    async fn ensure_directory(&self, dir: &str) -> Result<()> {
        let sftp = self.session()?;
        let mut current = if dir.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };
        for segment in path_segments(dir) {
            current = join_path(&current, segment);
            let exists = sftp
                .try_exists(current.as_str())
                .await
                .map_err(|e| sftp_error(&current, e))?;
            if !exists {
                sftp.create_dir(current.as_str())
                    .await
                    .map_err(|e| sftp_error(&current, e))?;
            }
        }
        Ok(())
    }
}

fn sftp_error(path: &str, error: russh_sftp::client::error::Error) -> ProviderError {
    ProviderError::Sftp {
        path: path.to_string(),
        message: error.to_string(),
    }
}

fn mtime(seconds: Option<u32>) -> Option<DateTime<Utc>> {
    seconds.and_then(|s| DateTime::<Utc>::from_timestamp(s as i64, 0))
}

#[async_trait]
impl StorageProvider for SftpProvider {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    async fn connect(&mut self) -> Result<()> {
        info!(host = %self.host, port = self.port, "Connecting to SFTP server");
        let mut handle = self.open_transport().await?;
        self.authenticate(&mut handle).await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ProviderError::Connection(format!("Failed to open channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ProviderError::Connection(format!("SFTP subsystem unavailable: {}", e)))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ProviderError::Connection(format!("SFTP handshake failed: {}", e)))?;
        let home = sftp
            .canonicalize(".")
            .await
            .map_err(|e| sftp_error(".", e))?;

        debug!(home = %home, "SFTP session established");
        self.conn = Some(SftpConnection { handle, sftp, home });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = conn.sftp.close().await {
            debug!(error = %e, "SFTP close failed");
        }
        conn.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>> {
        let sftp = self.session()?;
        let dir = if path.is_empty() { "." } else { path };
        let read_dir = sftp.read_dir(dir).await.map_err(|e| sftp_error(dir, e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let metadata = entry.metadata();
            let modified = mtime(metadata.mtime);
            if metadata.is_dir() {
                entries.push(FileInfo::directory(path, &name, modified));
            } else if metadata.is_regular() {
                entries.push(FileInfo::file(
                    path,
                    &name,
                    metadata.size.unwrap_or(0),
                    modified,
                ));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn download_file(&self, path: &str, _size_hint: Option<u64>) -> Result<ByteStream> {
        let sftp = self.session()?;
        let metadata = sftp.metadata(path).await.map_err(|e| sftp_error(path, e))?;
        if metadata.is_dir() {
            return Err(ProviderError::IsDirectory {
                path: path.to_string(),
            });
        }
        let file = sftp.open(path).await.map_err(|e| sftp_error(path, e))?;
        Ok(Box::pin(file))
    }

    async fn upload_file(
        &self,
        mut stream: ByteStream,
        path: &str,
        _size_hint: Option<u64>,
    ) -> Result<u64> {
        if let Some(parent) = parent_path(path) {
            self.ensure_directory(parent).await?;
        }
        let sftp = self.session()?;
        let mut file = sftp
            .open_with_flags(
                path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| sftp_error(path, e))?;
        let written = tokio::io::copy(&mut stream, &mut file)
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        file.flush().await.map_err(|e| ProviderError::io(path, e))?;
        file.shutdown()
            .await
            .map_err(|e| ProviderError::io(path, e))?;
        Ok(written)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.session()?
            .remove_file(path)
            .await
            .map_err(|e| sftp_error(path, e))
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let target = if to.ends_with('/') {
            join_path(to, file_name(from))
        } else {
            to.to_string()
        };
        self.session()?
            .rename(from, target.as_str())
            .await
            .map_err(|e| sftp_error(from, e))
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        self.ensure_directory(path).await
    }

    async fn working_directory(&self) -> Result<Option<String>> {
        Ok(self.conn.as_ref().map(|c| c.home.clone()))
    }
}
