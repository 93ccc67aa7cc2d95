use thiserror::Error;

use crate::db::DatabaseError;
use crate::filter::FilterError;
use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Run store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Transferred {actual} bytes of '{file}', expected {expected}")]
    ByteCountMismatch {
        file: String,
        expected: u64,
        actual: u64,
    },

    #[error("Verification of '{file}' failed: {reason}")]
    VerificationFailed { file: String, reason: String },

    #[error("Source file '{file}' still listed after delete")]
    DeleteNotConfirmed { file: String },
}

impl EngineError {
    /// A directory was handed to a file operation.
    pub fn is_directory(&self) -> bool {
        matches!(self, EngineError::Provider(e) if e.is_directory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_directory_only_for_provider_errors() {
        let err = EngineError::Provider(ProviderError::IsDirectory { path: "/in/x".into() });
        assert!(err.is_directory());

        let err = EngineError::VerificationFailed {
            file: "is a directory.txt".into(),
            reason: "missing".into(),
        };
        assert!(!err.is_directory());
    }

    #[test]
    fn test_messages() {
        let err = EngineError::ByteCountMismatch {
            file: "a.csv".into(),
            expected: 10,
            actual: 4,
        };
        assert_eq!(err.to_string(), "Transferred 4 bytes of 'a.csv', expected 10");
    }
}
