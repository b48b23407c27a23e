//! Error handling for the cipher crate

use thiserror::Error;

/// Cipher-specific errors
#[derive(Debug, Error)]
pub enum CipherError {
    /// The password does not match the one used to encrypt the archive.
    ///
    /// Raised for padding failures and for plaintext that does not carry the
    /// expected prefix. Safe to retry with another password.
    #[error("Incorrect password")]
    IncorrectPassword,

    /// Ciphertext is truncated or structurally malformed
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Key derivation operation failed
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Invalid key or IV length provided to the block cipher
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Internal error occurred
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CipherError {
    /// Create an `InvalidCiphertext` error with a formatted message
    #[must_use]
    pub fn invalid_ciphertext(msg: impl std::fmt::Display) -> Self {
        Self::InvalidCiphertext(msg.to_string())
    }

    /// Create a `KeyDerivation` error with a formatted message
    #[must_use]
    pub fn key_derivation(msg: impl std::fmt::Display) -> Self {
        Self::KeyDerivation(msg.to_string())
    }

    /// Create an `Internal` error with a formatted message
    #[must_use]
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }

    /// Whether the user can fix this error by supplying another password
    #[must_use]
    pub fn is_incorrect_password(&self) -> bool {
        matches!(self, Self::IncorrectPassword)
    }
}

/// Result type for cipher operations
pub type Result<T> = std::result::Result<T, CipherError>;
