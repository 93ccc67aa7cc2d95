use thiserror::Error;

use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider is not connected")]
    NotConnected,

    #[error("IO error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path '{path}' escapes the connection root")]
    PathTraversal { path: String },

    #[error("'{path}' is a directory")]
    IsDirectory { path: String },

    #[error("'{path}' not found")]
    NotFound { path: String },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Host key rejected for {host}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        host: String,
        expected: String,
        actual: String,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("SFTP error on '{path}': {message}")]
    Sftp { path: String, message: String },

    #[error("SMB error on '{path}': {message}")]
    Smb { path: String, message: String },

    #[error("Object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid connection settings: {0}")]
    InvalidConfig(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Credential error: {0}")]
    Secret(#[from] SecretError),
}

const EISDIR: i32 = 21;

/// Message fragments different backends use when a directory is opened as a file.
const DIRECTORY_MARKERS: &[&str] = &[
    "is a directory",
    "eisdir",
    "file_is_a_directory",
    "not a regular file",
];

impl ProviderError {
    pub fn io(path: &str, source: std::io::Error) -> Self {
        ProviderError::Io {
            path: path.to_string(),
            source,
        }
    }

    /// Whether the error means a directory was treated as a file.
    ///
    /// Classified by message since each backend reports it differently.
    pub fn is_directory(&self) -> bool {
        match self {
            ProviderError::IsDirectory { .. } => true,
            ProviderError::Io { source, .. } if source.raw_os_error() == Some(EISDIR) => true,
            _ => self.backend_message().is_some_and(|message| {
                let message = message.to_lowercase();
                DIRECTORY_MARKERS.iter().any(|m| message.contains(m))
            }),
        }
    }

    /// The backend's own error text, without the path it was raised for.
    pub fn backend_message(&self) -> Option<String> {
        match self {
            ProviderError::Io { source, .. } => Some(source.to_string()),
            ProviderError::Sftp { message, .. } | ProviderError::Smb { message, .. } => {
                Some(message.clone())
            }
            _ => None,
        }
    }

    /// Whether the error means the target does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::NotFound { .. } => true,
            ProviderError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            ProviderError::ObjectStore(object_store::Error::NotFound { .. }) => true,
            ProviderError::Sftp { message, .. } | ProviderError::Smb { message, .. } => {
                let message = message.to_lowercase();
                message.contains("no such file") || message.contains("not_found")
            }
            _ => false,
        }
    }
}
