pub mod archive;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod filter;
pub mod logging;
pub mod model;
pub mod provider;
pub mod sanitize;
pub mod secrets;

pub use config::{load_config, load_config_from_str, EngineConfig, PollConfig, SmbSettings};
pub use db::{Database, DatabaseError};
pub use engine::{DryRunResult, EngineError, RunReport, RunStore, TransferEngine};
pub use error::{ConfigError, CourierError, Result};
pub use filter::GlobFilter;
pub use logging::{init_logging, LogFormat};
pub use model::{
    Connection, Credentials, Job, JobRun, JobStatus, PostTransferAction, Protocol, RunStatus,
    TransferLog, TransferStatus,
};
pub use provider::{FileInfo, ProviderError, ProviderFactory, ProviderRegistry, StorageProvider};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
