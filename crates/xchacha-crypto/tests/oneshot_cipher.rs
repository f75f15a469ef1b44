//! Integration tests for the one-shot constructions.

use proptest::prelude::*;
use xchacha_crypto::{
    AeadCipher, Key, Nonce, SecretBoxCipher, XChaChaError, AEAD_ABYTES, SECRETBOX_MACBYTES,
};

fn fixed_key() -> Key {
    Key::from_bytes(&[0x5Au8; 32]).unwrap()
}

#[test]
fn aead_length_and_aad_mismatch() {
    let cipher = AeadCipher::new();
    let key = Key::generate().unwrap();
    let nonce = Nonce::generate();
    let message = b"one-shot message body";

    let ct = cipher.encrypt(message, b"context-a", &key, &nonce).unwrap();
    assert_eq!(ct.len(), message.len() + AEAD_ABYTES);

    let err = cipher.decrypt(&ct, b"context-b", &key, &nonce).unwrap_err();
    assert!(matches!(err, XChaChaError::AuthenticationFailed));
    assert!(err.is_authentication_failure());
}

#[test]
fn empty_nonce_rejected_before_any_cipher_call() {
    assert!(matches!(Nonce::from_slice(b""), Err(XChaChaError::EmptyNonce)));
}

#[test]
fn secretbox_and_aead_are_not_interchangeable() {
    let key = fixed_key();
    let nonce = Nonce::from([7u8; 24]);
    let ct = AeadCipher::new().encrypt(b"payload", b"", &key, &nonce).unwrap();

    let boxed = SecretBoxCipher::new();
    assert_eq!(ct.len(), 7 + SECRETBOX_MACBYTES);
    assert!(boxed.decrypt(&ct, b"", &key, &nonce).is_err());
}

#[test]
fn disposed_key_is_a_usage_error() {
    let mut key = Key::generate().unwrap();
    key.dispose();
    let err = AeadCipher::new()
        .encrypt(b"x", b"", &key, &Nonce::generate())
        .unwrap_err();
    assert!(matches!(err, XChaChaError::KeyDisposed));
    assert_eq!(err.class(), xchacha_crypto::ErrorClass::Usage);
}

proptest! {
    #[test]
    fn aead_roundtrip(
        message in proptest::collection::vec(any::<u8>(), 0..=4096),
        aad in proptest::collection::vec(any::<u8>(), 0..=64),
        nonce in any::<[u8; 24]>(),
    ) {
        let cipher = AeadCipher::new();
        let key = fixed_key();
        let nonce = Nonce::from(nonce);
        let ct = cipher.encrypt(&message, &aad, &key, &nonce).unwrap();
        prop_assert_eq!(ct.len(), cipher.ciphertext_len(message.len()));
        prop_assert_eq!(cipher.decrypt(&ct, &aad, &key, &nonce).unwrap(), message);
    }

    #[test]
    fn secretbox_detects_any_flip(
        message in proptest::collection::vec(any::<u8>(), 1..=512),
        flip in any::<prop::sample::Index>(),
    ) {
        let cipher = SecretBoxCipher::new();
        let key = fixed_key();
        let nonce = Nonce::from([1u8; 24]);
        let mut ct = cipher.encrypt(&message, b"", &key, &nonce).unwrap();

        let pos = flip.index(ct.len());
        ct[pos] ^= 0x01;
        let mut out = vec![0u8; message.len()];
        prop_assert!(!cipher.try_decrypt(&ct, b"", &key, &nonce, &mut out).unwrap());
        prop_assert!(out.iter().all(|&b| b == 0));
    }
}
