//! Error type shared by every snapshot operation.

use crate::db::DatabaseError;
use crate::lock::OperationKind;
use strongbox_cipher::CipherError;
use strongbox_compression::CompressionError;
use thiserror::Error;

/// Snapshot and restore failures
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Missing or malformed settings, detected before any work starts
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The archive was encrypted with a different password
    #[error("Incorrect password")]
    IncorrectPassword,

    /// The archive decrypted but its content cannot be restored
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// A required table failed to reload; the transaction was rolled back
    #[error("Critical restore failure on table '{table}': {source}")]
    CriticalRestoreFailure {
        /// Table that failed
        table: String,
        /// Underlying database error
        #[source]
        source: DatabaseError,
    },

    /// Another create or restore holds the operation lock
    #[error("Another backup or restore operation is already in progress")]
    OperationInProgress,

    /// The native database tool is not installed
    #[error("Native database tool unavailable: {0}")]
    ToolUnavailable(String),

    /// The native database tool ran and failed
    #[error("Native database tool failed: {0}")]
    NativeTool(String),

    /// Media files could not be swapped in after the database was restored
    #[error("Media restore failed: {0}")]
    MediaRestore(String),

    /// Encryption or decryption failed for a reason other than the password
    #[error("Encryption error: {0}")]
    Cipher(CipherError),

    /// Building or reading the zip container failed
    #[error("Archive error: {0}")]
    Archive(#[from] CompressionError),

    /// Backend failure outside a per-table restore step
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// JSON encoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected failure inside the engine
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

impl From<CipherError> for SnapshotError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::IncorrectPassword => SnapshotError::IncorrectPassword,
            CipherError::InvalidCiphertext(msg) => SnapshotError::InvalidArchive(msg),
            other => SnapshotError::Cipher(other),
        }
    }
}

impl From<tokio::task::JoinError> for SnapshotError {
    fn from(err: tokio::task::JoinError) -> Self {
        SnapshotError::Internal(format!("background task failed: {err}"))
    }
}

impl SnapshotError {
    /// Classify an extraction failure: unreadable or hostile archives are
    /// the uploader's problem, disk errors are ours.
    pub fn from_extraction(err: CompressionError) -> Self {
        match err {
            CompressionError::DecompressionFailed(msg) => SnapshotError::InvalidArchive(msg),
            CompressionError::UnsafePath(path) => {
                SnapshotError::InvalidArchive(format!("archive entry escapes the target: {path}"))
            }
            CompressionError::IoError(e) => SnapshotError::Io(e),
            other => SnapshotError::Archive(other),
        }
    }

    /// Whether the caller can fix the problem and retry with the same
    /// archive or settings
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SnapshotError::IncorrectPassword
                | SnapshotError::InvalidArchive(_)
                | SnapshotError::OperationInProgress
        )
    }

    /// Message safe to show an administrator. Never contains paths,
    /// connection strings or table contents.
    pub fn user_message(&self, operation: OperationKind) -> String {
        let preserved = "Your original data has been preserved.";
        match (self, operation) {
            (SnapshotError::Configuration(_), _) => {
                "The backup service is not configured correctly. Please contact the site operator."
                    .to_string()
            }
            (SnapshotError::OperationInProgress, _) => {
                "Another backup or restore is already running. Please try again when it finishes."
                    .to_string()
            }
            (SnapshotError::IncorrectPassword, _) => {
                format!("The password is incorrect. {preserved}")
            }
            (SnapshotError::InvalidArchive(_), _) => {
                format!("The uploaded file is not a valid backup archive. {preserved}")
            }
            (SnapshotError::CriticalRestoreFailure { .. }, _) => {
                format!("The restore could not be completed and was rolled back. {preserved}")
            }
            (SnapshotError::ToolUnavailable(_), OperationKind::Restore) => format!(
                "This backup needs database tools that are not installed on the server. {preserved}"
            ),
            (SnapshotError::MediaRestore(_), _) => {
                "The database was restored, but uploaded media could not be replaced. \
                 The previous media files are unchanged."
                    .to_string()
            }
            (_, OperationKind::Create) => {
                "The backup could not be created because of a server error.".to_string()
            }
            (_, OperationKind::Restore) => {
                format!("The restore failed because of a server error. {preserved}")
            }
        }
    }
}
