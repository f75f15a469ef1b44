//! 192-bit XChaCha nonces for one-shot encryption

use rand::RngCore;
use xchacha_core::{XChaChaError, XChaChaResult};

use crate::NONCE_SIZE;

/// A 24-byte nonce. There is deliberately no `Default`: an unset nonce is
/// an error, never an implicit all-zero value.
///
/// A nonce must never be used twice with the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    pub fn from_slice(bytes: &[u8]) -> XChaChaResult<Self> {
        if bytes.is_empty() {
            return Err(XChaChaError::EmptyNonce);
        }
        let array = <[u8; NONCE_SIZE]>::try_from(bytes).map_err(|_| {
            XChaChaError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: bytes.len(),
            }
        })?;
        Ok(Self(array))
    }

    /// Generate a random nonce from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl From<[u8; NONCE_SIZE]> for Nonce {
    fn from(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Nonce {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
