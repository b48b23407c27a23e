//! Streaming AES-256-CBC round trips and failure normalization

use proptest::prelude::*;
use secrecy::SecretString;
use strongbox_cipher::{BLOCK_SIZE, CipherError, HEADER_LEN, KdfParams, StreamCipher};

fn password(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

fn cipher() -> StreamCipher {
    StreamCipher::new(KdfParams::fast())
}

async fn encrypt(cipher: &StreamCipher, pw: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    cipher
        .encrypt(&password(pw), data, &mut out)
        .await
        .expect("encrypt");
    out
}

async fn decrypt(cipher: &StreamCipher, pw: &str, data: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut out = Vec::new();
    cipher.decrypt(&password(pw), data, &mut out).await?;
    Ok(out)
}

#[tokio::test]
async fn test_roundtrip_empty_payload() {
    let cipher = cipher();
    let encrypted = encrypt(&cipher, "Sup3rSecretPW!", b"").await;

    // header plus a single block of padding
    assert_eq!(encrypted.len(), HEADER_LEN + BLOCK_SIZE);
    assert_eq!(decrypt(&cipher, "Sup3rSecretPW!", &encrypted).await.expect("decrypt"), b"");
}

#[tokio::test]
async fn test_roundtrip_small_payload() {
    let cipher = cipher();
    let plaintext = b"listing #42: two-bedroom flat, balcony, quiet street";
    let encrypted = encrypt(&cipher, "Sup3rSecretPW!", plaintext).await;

    let padded = (plaintext.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
    assert_eq!(encrypted.len(), HEADER_LEN + padded);
    assert_ne!(&encrypted[HEADER_LEN..HEADER_LEN + 16], &plaintext[..16]);

    let decrypted = decrypt(&cipher, "Sup3rSecretPW!", &encrypted).await.expect("decrypt");
    assert_eq!(decrypted, plaintext);
}

#[tokio::test]
async fn test_roundtrip_block_aligned_payload() {
    let cipher = cipher();
    let plaintext = vec![0xAB; BLOCK_SIZE * 4];
    let encrypted = encrypt(&cipher, "Sup3rSecretPW!", &plaintext).await;

    assert_eq!(encrypted.len(), HEADER_LEN + plaintext.len() + BLOCK_SIZE);
    assert_eq!(decrypt(&cipher, "Sup3rSecretPW!", &encrypted).await.expect("decrypt"), plaintext);
}

#[tokio::test]
async fn test_roundtrip_multi_megabyte_payload_with_small_buffer() {
    let cipher = cipher().with_buffer_size(1000);
    let plaintext: Vec<u8> = (0..3 * 1024 * 1024 + 7).map(|i| (i * 31 % 251) as u8).collect();

    let encrypted = encrypt(&cipher, "Sup3rSecretPW!", &plaintext).await;
    let decrypted = decrypt(&cipher, "Sup3rSecretPW!", &encrypted).await.expect("decrypt");

    assert_eq!(decrypted.len(), plaintext.len());
    assert!(decrypted == plaintext);
}

#[tokio::test]
async fn test_each_encryption_uses_fresh_salt_and_iv() {
    let cipher = cipher();
    let first = encrypt(&cipher, "Sup3rSecretPW!", b"same input").await;
    let second = encrypt(&cipher, "Sup3rSecretPW!", b"same input").await;

    assert_ne!(&first[..HEADER_LEN], &second[..HEADER_LEN]);
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_wrong_password_with_expected_prefix_is_rejected() {
    let cipher = cipher();
    let mut plaintext = b"PK\x03\x04".to_vec();
    plaintext.extend(std::iter::repeat_n(b'x', 200_000));
    let encrypted = encrypt(&cipher, "Sup3rSecretPW!", &plaintext).await;

    let mut out = Vec::new();
    let result = cipher
        .decrypt_expecting(&password("WrongPW!!!"), &encrypted[..], &mut out, b"PK\x03\x04")
        .await;

    assert!(matches!(result, Err(CipherError::IncorrectPassword)));
    assert!(out.is_empty(), "no plaintext may be emitted for a wrong password");
}

#[tokio::test]
async fn test_correct_password_with_expected_prefix_succeeds() {
    let cipher = cipher();
    let plaintext = b"PK\x03\x04 archive body".to_vec();
    let encrypted = encrypt(&cipher, "Sup3rSecretPW!", &plaintext).await;

    let mut out = Vec::new();
    cipher
        .decrypt_expecting(&password("Sup3rSecretPW!"), &encrypted[..], &mut out, b"PK\x03\x04")
        .await
        .expect("decrypt");
    assert_eq!(out, plaintext);
}

#[tokio::test]
async fn test_plaintext_shorter_than_prefix_is_rejected() {
    let cipher = cipher();
    let encrypted = encrypt(&cipher, "Sup3rSecretPW!", b"PK").await;

    let mut out = Vec::new();
    let result = cipher
        .decrypt_expecting(&password("Sup3rSecretPW!"), &encrypted[..], &mut out, b"PK\x03\x04")
        .await;
    assert!(matches!(result, Err(CipherError::IncorrectPassword)));
}

#[tokio::test]
async fn test_input_shorter_than_header_is_invalid() {
    let result = decrypt(&cipher(), "Sup3rSecretPW!", &[0u8; 20]).await;
    assert!(matches!(result, Err(CipherError::InvalidCiphertext(_))));
}

#[tokio::test]
async fn test_header_without_ciphertext_is_invalid() {
    let result = decrypt(&cipher(), "Sup3rSecretPW!", &[0u8; HEADER_LEN]).await;
    assert!(matches!(result, Err(CipherError::InvalidCiphertext(_))));
}

#[tokio::test]
async fn test_truncated_ciphertext_is_invalid() {
    let cipher = cipher();
    let encrypted = encrypt(&cipher, "Sup3rSecretPW!", &[5u8; 100]).await;
    let truncated = &encrypted[..encrypted.len() - 3];

    let result = decrypt(&cipher, "Sup3rSecretPW!", truncated).await;
    assert!(matches!(result, Err(CipherError::InvalidCiphertext(_))));
}

#[tokio::test]
async fn test_file_roundtrip_and_partial_output_cleanup() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let source = dir.path().join("plain.bin");
    let encrypted = dir.path().join("archive.enc");
    let restored = dir.path().join("restored.bin");
    let rejected = dir.path().join("rejected.bin");

    let mut payload = b"PK\x03\x04".to_vec();
    payload.extend((0..150_000u32).map(|i| (i % 97) as u8));
    tokio::fs::write(&source, &payload).await.expect("write source");

    let cipher = cipher();
    let pw = password("Sup3rSecretPW!");
    cipher.encrypt_file(&pw, &source, &encrypted).await.expect("encrypt file");
    cipher
        .decrypt_file(&pw, &encrypted, &restored, b"PK\x03\x04")
        .await
        .expect("decrypt file");
    assert_eq!(tokio::fs::read(&restored).await.expect("read"), payload);

    let result = cipher
        .decrypt_file(&password("WrongPW!!!"), &encrypted, &rejected, b"PK\x03\x04")
        .await;
    assert!(matches!(result, Err(CipherError::IncorrectPassword)));
    assert!(!rejected.exists(), "partial plaintext must be removed");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_roundtrip_arbitrary_payload(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let decrypted = runtime.block_on(async {
            let cipher = cipher().with_buffer_size(48);
            let encrypted = encrypt(&cipher, "Sup3rSecretPW!", &data).await;
            decrypt(&cipher, "Sup3rSecretPW!", &encrypted).await
        });
        prop_assert_eq!(decrypted.expect("decrypt"), data);
    }
}
