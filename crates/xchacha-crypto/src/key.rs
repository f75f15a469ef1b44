//! 256-bit XChaCha keys held in guarded memory

use std::fmt;

use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use xchacha_core::{XChaChaError, XChaChaResult};

use crate::guarded::{GuardedRegion, ReadOnly};
use crate::KEY_SIZE;

/// A 256-bit key shared by every XChaCha construction in this crate.
///
/// The bytes live in a read-only guarded region from construction until
/// disposal; they are never staged through ordinary heap memory. Any number
/// of cipher operations may borrow a key at once, and disposal needs
/// exclusive access, so it cannot race with a reader.
pub struct Key {
    region: GuardedRegion<ReadOnly>,
}

impl Key {
    /// Copy caller-supplied key bytes into guarded memory.
    pub fn from_bytes(bytes: &[u8]) -> XChaChaResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(XChaChaError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let region = GuardedRegion::allocate(KEY_SIZE)
            .write(bytes)?
            .make_read_only()?;
        Ok(Self { region })
    }

    /// Build a key from a secret already wrapped by the caller.
    pub fn from_secret(secret: &SecretSlice<u8>) -> XChaChaResult<Self> {
        Self::from_bytes(secret.expose_secret())
    }

    /// Generate a random key directly inside guarded memory.
    pub fn generate() -> XChaChaResult<Self> {
        let region = GuardedRegion::allocate(KEY_SIZE)
            .fill_with(|buf| rand::thread_rng().fill_bytes(buf))
            .make_read_only()?;
        Ok(Self { region })
    }

    /// Borrow the raw key bytes.
    ///
    /// This is the only way to read a key. The returned reference points into
    /// the guarded region; do not copy it anywhere that outlives the key.
    pub fn expose_secret(&self) -> XChaChaResult<&[u8; KEY_SIZE]> {
        self.region
            .as_slice()
            .and_then(|bytes| <&[u8; KEY_SIZE]>::try_from(bytes).ok())
            .ok_or(XChaChaError::KeyDisposed)
    }

    /// Zero and release the key. Idempotent.
    pub fn dispose(&mut self) {
        self.region.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.region.is_disposed()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("bytes", &"[REDACTED]")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
