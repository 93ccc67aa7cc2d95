//! Maps stored connection records to provider instances.

use crate::config::EngineConfig;
use crate::model::{Connection, Protocol};

use super::{
    LocalProvider, ObjectStorageProvider, Result, SftpProvider, SmbProvider, StorageProvider,
};

/// Constructs an unconnected provider for a connection.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, connection: &Connection) -> Result<Box<dyn StorageProvider>>;
}

/// The standard factory: one provider type per protocol.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    config: EngineConfig,
}

impl ProviderRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl ProviderFactory for ProviderRegistry {
    fn create(&self, connection: &Connection) -> Result<Box<dyn StorageProvider>> {
        let provider: Box<dyn StorageProvider> = match connection.protocol {
            Protocol::Local => Box::new(LocalProvider::from_connection(connection)?),
            Protocol::Sftp => Box::new(SftpProvider::from_connection(
                connection,
                self.config.ssh_connect_timeout(),
            )?),
            Protocol::Smb => Box::new(SmbProvider::from_connection(
                connection,
                self.config.smb.clone(),
            )?),
            Protocol::ObjectBlob => Box::new(ObjectStorageProvider::from_connection(connection)?),
        };
        Ok(provider)
    }
}
