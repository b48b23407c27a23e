//! Archive header: the random salt and IV stored in front of the ciphertext

use crate::{CipherError, Result};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Salt length in bytes
pub const SALT_LEN: usize = 32;
/// AES-CBC initialization vector length in bytes
pub const IV_LEN: usize = 16;
/// Total header length in bytes
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN;

/// Per-archive random parameters, written verbatim before the ciphertext
#[derive(Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Salt fed to the key derivation function
    pub salt: [u8; SALT_LEN],
    /// Initialization vector for the first CBC block
    pub iv: [u8; IV_LEN],
}

impl ArchiveHeader {
    /// Generate a fresh header from the thread-local CSPRNG
    #[must_use]
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        let mut rng = rand::rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);
        Self { salt, iv }
    }

    /// Serialize as `salt || iv`
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..SALT_LEN].copy_from_slice(&self.salt);
        out[SALT_LEN..].copy_from_slice(&self.iv);
        out
    }

    /// Parse a header from exactly `HEADER_LEN` bytes
    ///
    /// # Errors
    /// Returns `InvalidCiphertext` if the slice has the wrong length
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_LEN {
            return Err(CipherError::invalid_ciphertext(format!(
                "header must be {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        salt.copy_from_slice(&bytes[..SALT_LEN]);
        iv.copy_from_slice(&bytes[SALT_LEN..]);
        Ok(Self { salt, iv })
    }

    /// Read the header from the front of an encrypted stream
    ///
    /// # Errors
    /// Returns `InvalidCiphertext` if the stream ends before the header is complete
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut bytes = [0u8; HEADER_LEN];
        match reader.read_exact(&mut bytes).await {
            Ok(_) => Self::from_bytes(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                CipherError::invalid_ciphertext("input is shorter than the archive header"),
            ),
            Err(e) => Err(CipherError::Io(e)),
        }
    }
}

impl std::fmt::Debug for ArchiveHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHeader").finish_non_exhaustive()
    }
}
