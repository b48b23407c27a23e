//! scrypt key derivation determinism and salt separation

use strongbox_cipher::{KdfParams, derive_key};

#[test]
fn test_same_password_and_salt_yield_same_key() {
    let salt = [7u8; 32];
    let first = derive_key(b"Sup3rSecretPW!", &salt, KdfParams::fast()).expect("derive");
    let second = derive_key(b"Sup3rSecretPW!", &salt, KdfParams::fast()).expect("derive");

    assert_eq!(first.as_slice(), second.as_slice());
}

#[test]
fn test_different_salts_yield_different_keys() {
    let first = derive_key(b"Sup3rSecretPW!", &[1u8; 32], KdfParams::fast()).expect("derive");
    let second = derive_key(b"Sup3rSecretPW!", &[2u8; 32], KdfParams::fast()).expect("derive");

    assert_ne!(first.as_slice(), second.as_slice());
}

#[test]
fn test_different_passwords_yield_different_keys() {
    let salt = [9u8; 32];
    let first = derive_key(b"Sup3rSecretPW!", &salt, KdfParams::fast()).expect("derive");
    let second = derive_key(b"WrongPW!!!", &salt, KdfParams::fast()).expect("derive");

    assert_ne!(first.as_slice(), second.as_slice());
}

#[test]
fn test_standard_params_match_archive_format() {
    let params = KdfParams::standard();
    assert_eq!(params.log_n, 14);
    assert_eq!(params.r, 8);
    assert_eq!(params.p, 1);
    assert_eq!(KdfParams::default(), params);
}

#[test]
fn test_invalid_params_are_rejected() {
    let params = KdfParams {
        log_n: 0,
        r: 0,
        p: 0,
    };
    let result = derive_key(b"password", &[0u8; 32], params);
    assert!(result.is_err(), "zero cost parameters must be rejected");
}
