//! # Strongbox Cipher
//!
//! Password-based encryption for snapshot archives.
//!
//! An encrypted archive is laid out as `[32-byte salt][16-byte IV][ciphertext]`.
//! The key is derived from the password and the salt with scrypt, and the
//! payload is encrypted with AES-256 in CBC mode using PKCS#7 padding.
//! Encryption and decryption stream through bounded buffers, so memory use
//! does not grow with the payload.

#![forbid(unsafe_code)]

pub mod error;
pub mod header;
pub mod kdf;
pub mod stream;

pub use error::{CipherError, Result};
pub use header::{ArchiveHeader, HEADER_LEN, IV_LEN, SALT_LEN};
pub use kdf::{DerivedKey, KEY_LEN, KdfParams, derive_key, derive_key_blocking};
pub use stream::{BLOCK_SIZE, DEFAULT_BUFFER_SIZE, StreamCipher};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{CipherError, KdfParams, Result, StreamCipher};
    pub use secrecy::SecretString;
}
