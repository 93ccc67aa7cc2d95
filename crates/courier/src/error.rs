use std::path::PathBuf;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::engine::EngineError;
use crate::filter::FilterError;
use crate::provider::ProviderError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Returned when a persisted enum column holds a value this build does not know.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
