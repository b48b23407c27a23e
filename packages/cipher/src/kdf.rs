//! Password key derivation
//!
//! Keys are derived with scrypt using fixed cost parameters, so the same
//! password and salt always produce the same key while distinct salts make
//! the same password produce unrelated keys.

use crate::{CipherError, Result};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

/// Derived key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// A derived AES-256 key, wiped from memory on drop
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;

/// scrypt cost parameters
///
/// Archives do not record these, so every deployment that reads an archive
/// must use the same values that wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost `N`
    pub log_n: u8,
    /// Block size `r`
    pub r: u32,
    /// Parallelism `p`
    pub p: u32,
}

impl KdfParams {
    /// Archive-compatible parameters: N = 16384, r = 8, p = 1
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }

    /// Cheap parameters for tests and development fixtures
    ///
    /// Archives written with these cannot be read with `standard()`.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            log_n: 10,
            r: 8,
            p: 1,
        }
    }

    fn to_scrypt(self) -> Result<scrypt::Params> {
        scrypt::Params::new(self.log_n, self.r, self.p, KEY_LEN)
            .map_err(|e| CipherError::key_derivation(format!("Invalid scrypt parameters: {e}")))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::standard()
    }
}

/// Derive a key from a password and salt
///
/// # Errors
/// Returns `KeyDerivation` if the parameters are rejected by scrypt
pub fn derive_key(password: &[u8], salt: &[u8], params: KdfParams) -> Result<DerivedKey> {
    let scrypt_params = params.to_scrypt()?;
    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    scrypt::scrypt(password, salt, &scrypt_params, output.as_mut_slice())
        .map_err(|e| CipherError::key_derivation(format!("scrypt key derivation failed: {e}")))?;
    Ok(output)
}

/// Derive a key on the blocking thread pool
///
/// scrypt is memory-hard by construction; running it inline would stall the
/// async worker that polls this future.
///
/// # Errors
/// Returns `KeyDerivation` on invalid parameters and `Internal` if the
/// blocking task panicked
pub async fn derive_key_blocking(
    password: &SecretString,
    salt: &[u8],
    params: KdfParams,
) -> Result<DerivedKey> {
    let password = Zeroizing::new(password.expose_secret().as_bytes().to_vec());
    let salt = salt.to_vec();

    tokio::task::spawn_blocking(move || derive_key(&password, &salt, params))
        .await
        .map_err(|e| CipherError::internal(format!("Key derivation task failed: {e}")))?
}
