//! Streaming AES-256-CBC encryption and decryption
//!
//! Data moves through a fixed-size buffer. Encryption pads the final block
//! with PKCS#7; decryption holds the last block back until end of input so
//! the padding can be verified and stripped.

use crate::header::{ArchiveHeader, HEADER_LEN};
use crate::kdf::{DerivedKey, KEY_LEN, KdfParams, derive_key_blocking};
use crate::{CipherError, Result};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, generic_array::GenericArray};
use secrecy::SecretString;
use std::path::Path;
use strongbox_common::LoggingTransformer;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Default streaming buffer size (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Password-based streaming cipher for snapshot archives
#[derive(Debug, Clone)]
pub struct StreamCipher {
    params: KdfParams,
    buffer_size: usize,
}

impl Default for StreamCipher {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}

impl StreamCipher {
    /// Create a cipher using the given key derivation parameters
    #[must_use]
    pub fn new(params: KdfParams) -> Self {
        Self {
            params,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Override the streaming buffer size
    ///
    /// The size is rounded up to a whole number of AES blocks.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        let blocks = size.div_ceil(BLOCK_SIZE).max(1);
        self.buffer_size = blocks * BLOCK_SIZE;
        self
    }

    /// Key derivation parameters in use
    #[must_use]
    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Encrypt `reader` into `writer` as `salt || iv || ciphertext`
    ///
    /// Returns the number of bytes written, header included.
    ///
    /// # Errors
    /// Returns `KeyDerivation` if the key cannot be derived and `Io` on read
    /// or write failure
    pub async fn encrypt<R, W>(
        &self,
        password: &SecretString,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let header = ArchiveHeader::generate();
        let key = derive_key_blocking(password, &header.salt, self.params).await?;
        let mut cipher = new_encryptor(&key, &header.iv)?;

        writer.write_all(&header.to_bytes()).await?;
        let mut written = HEADER_LEN as u64;

        let mut buf = vec![0u8; self.buffer_size];
        let mut pending = 0usize;

        loop {
            let n = reader.read(&mut buf[pending..]).await?;
            if n == 0 {
                break;
            }
            pending += n;

            let ready = pending - pending % BLOCK_SIZE;
            if ready > 0 {
                encrypt_blocks(&mut cipher, &mut buf[..ready]);
                writer.write_all(&buf[..ready]).await?;
                written += ready as u64;
                buf.copy_within(ready..pending, 0);
                pending -= ready;
            }
        }

        // PKCS#7: always emit a final block, a full one of padding if needed
        let pad = BLOCK_SIZE - pending;
        buf[pending..BLOCK_SIZE].fill(pad as u8);
        encrypt_blocks(&mut cipher, &mut buf[..BLOCK_SIZE]);
        writer.write_all(&buf[..BLOCK_SIZE]).await?;
        written += BLOCK_SIZE as u64;

        writer.flush().await?;
        Ok(written)
    }

    /// Decrypt `reader` into `writer`
    ///
    /// A wrong password is reported as `IncorrectPassword` whenever the
    /// padding check fails. Without an expected prefix there is a small chance
    /// that a wrong key produces valid-looking padding, so prefer
    /// [`StreamCipher::decrypt_expecting`] when the plaintext format is known.
    ///
    /// The writer may have received partial output when an error is returned;
    /// callers must discard it.
    ///
    /// # Errors
    /// Returns `IncorrectPassword` on padding failure and `InvalidCiphertext`
    /// on truncated input
    pub async fn decrypt<R, W>(&self, password: &SecretString, reader: R, writer: W) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.decrypt_expecting(password, reader, writer, &[]).await
    }

    /// Decrypt and require the plaintext to start with `expected_prefix`
    ///
    /// The prefix is verified before any plaintext reaches `writer`, so bytes
    /// produced by a wrong key are never emitted.
    ///
    /// # Errors
    /// Returns `IncorrectPassword` on prefix mismatch or padding failure and
    /// `InvalidCiphertext` on truncated input
    pub async fn decrypt_expecting<R, W>(
        &self,
        password: &SecretString,
        mut reader: R,
        mut writer: W,
        expected_prefix: &[u8],
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let header = ArchiveHeader::read_from(&mut reader).await?;
        let key = derive_key_blocking(password, &header.salt, self.params).await?;
        let mut cipher = new_decryptor(&key, &header.iv)?;
        let mut guard = PrefixGuard::new(expected_prefix);

        let mut buf = vec![0u8; self.buffer_size + BLOCK_SIZE];
        let mut pending = 0usize;
        let mut written = 0u64;

        loop {
            let n = reader.read(&mut buf[pending..]).await?;
            if n == 0 {
                break;
            }
            pending += n;

            let mut ready = pending - pending % BLOCK_SIZE;
            if ready == pending {
                // the final block may carry padding; keep it until EOF
                ready = ready.saturating_sub(BLOCK_SIZE);
            }
            if ready == 0 {
                continue;
            }

            decrypt_blocks(&mut cipher, &mut buf[..ready]);
            guard.check(&buf[..ready])?;
            writer.write_all(&buf[..ready]).await?;
            written += ready as u64;
            buf.copy_within(ready..pending, 0);
            pending -= ready;
        }

        if pending != BLOCK_SIZE {
            return Err(CipherError::invalid_ciphertext(
                "ciphertext is empty or not a whole number of blocks",
            ));
        }

        decrypt_blocks(&mut cipher, &mut buf[..BLOCK_SIZE]);
        let plain_len = strip_padding(&buf[..BLOCK_SIZE])?;
        guard.check(&buf[..plain_len])?;
        guard.finish()?;

        writer.write_all(&buf[..plain_len]).await?;
        written += plain_len as u64;
        writer.flush().await?;

        Ok(written)
    }

    /// Encrypt the file at `source` into a new file at `destination`
    ///
    /// A partially written destination is removed on failure.
    ///
    /// # Errors
    /// Propagates any error from [`StreamCipher::encrypt`] or file I/O
    pub async fn encrypt_file(
        &self,
        password: &SecretString,
        source: &Path,
        destination: &Path,
    ) -> Result<u64> {
        let input = File::open(source).await?;
        let output = File::create(destination).await?;

        match self.encrypt(password, input, output).await {
            Ok(written) => Ok(written),
            Err(e) => {
                LoggingTransformer::log_crypto_error("encrypt_file", &e);
                discard_partial(destination).await;
                Err(e)
            }
        }
    }

    /// Decrypt the file at `source` into a new file at `destination`
    ///
    /// When `expected_prefix` is non-empty the plaintext must begin with it.
    /// A partially written destination is removed on failure.
    ///
    /// # Errors
    /// Propagates any error from [`StreamCipher::decrypt_expecting`] or file I/O
    pub async fn decrypt_file(
        &self,
        password: &SecretString,
        source: &Path,
        destination: &Path,
        expected_prefix: &[u8],
    ) -> Result<u64> {
        let input = File::open(source).await?;
        let output = File::create(destination).await?;

        match self
            .decrypt_expecting(password, input, output, expected_prefix)
            .await
        {
            Ok(written) => Ok(written),
            Err(e) => {
                if !e.is_incorrect_password() {
                    LoggingTransformer::log_crypto_error("decrypt_file", &e);
                }
                discard_partial(destination).await;
                Err(e)
            }
        }
    }
}

fn new_encryptor(key: &DerivedKey, iv: &[u8]) -> Result<Aes256CbcEnc> {
    Aes256CbcEnc::new_from_slices(key.as_slice(), iv).map_err(|_| CipherError::InvalidKeyLength {
        expected: KEY_LEN,
        actual: key.len(),
    })
}

fn new_decryptor(key: &DerivedKey, iv: &[u8]) -> Result<Aes256CbcDec> {
    Aes256CbcDec::new_from_slices(key.as_slice(), iv).map_err(|_| CipherError::InvalidKeyLength {
        expected: KEY_LEN,
        actual: key.len(),
    })
}

fn encrypt_blocks(cipher: &mut Aes256CbcEnc, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn decrypt_blocks(cipher: &mut Aes256CbcDec, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// Validate PKCS#7 padding on the final block, returning the plaintext length
fn strip_padding(block: &[u8]) -> Result<usize> {
    let pad = usize::from(block[BLOCK_SIZE - 1]);
    if pad == 0 || pad > BLOCK_SIZE {
        return Err(CipherError::IncorrectPassword);
    }
    let (plain, padding) = block.split_at(BLOCK_SIZE - pad);
    if padding.iter().any(|&b| usize::from(b) != pad) {
        return Err(CipherError::IncorrectPassword);
    }
    Ok(plain.len())
}

async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove partial output {}: {e}", path.display());
        }
    }
}

/// Checks the leading plaintext bytes against an expected prefix
struct PrefixGuard<'a> {
    expected: &'a [u8],
    matched: usize,
}

impl<'a> PrefixGuard<'a> {
    fn new(expected: &'a [u8]) -> Self {
        Self {
            expected,
            matched: 0,
        }
    }

    fn check(&mut self, plaintext: &[u8]) -> Result<()> {
        if self.matched >= self.expected.len() {
            return Ok(());
        }
        let take = (self.expected.len() - self.matched).min(plaintext.len());
        if plaintext[..take] != self.expected[self.matched..self.matched + take] {
            return Err(CipherError::IncorrectPassword);
        }
        self.matched += take;
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.matched < self.expected.len() {
            return Err(CipherError::IncorrectPassword);
        }
        Ok(())
    }
}
