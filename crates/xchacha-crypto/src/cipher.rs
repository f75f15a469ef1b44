//! One-shot XChaCha20-Poly1305 encryption of a single buffer
//!
//! Two constructions share one generic front end:
//!
//! ```text
//! XChaChaAead:      [N bytes: ciphertext][16 bytes: Poly1305 tag]   AAD supported
//! XChaChaSecretBox: [16 bytes: Poly1305 tag][N bytes: ciphertext]   no AAD
//! ```
//!
//! The nonce and associated data travel out of band. A nonce must never be
//! reused with the same key.
//!
//! Every argument is validated before the key is touched. Decryption
//! failures of any kind (wrong key, nonce, associated data, or tampered
//! bytes) surface as a single `AuthenticationFailed`, and the output buffer
//! is zeroed.

use std::fmt;
use std::marker::PhantomData;

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use xchacha_core::{XChaChaError, XChaChaResult};
use zeroize::Zeroize;

use crate::key::Key;
use crate::nonce::Nonce;
use crate::{AEAD_ABYTES, KEY_SIZE, SECRETBOX_MACBYTES};

/// Largest message the ChaCha20 keystream can cover under one nonce.
const CHACHA_MAX_MESSAGE_LEN: u64 = (1 << 38) - 64;

/// A single-buffer authenticated cipher construction.
pub trait Construction {
    const NAME: &'static str;
    /// Bytes added to every ciphertext.
    const OVERHEAD: usize;
    const SUPPORTS_AAD: bool;

    /// Encrypt `message` into `out`, which is exactly
    /// `message.len() + OVERHEAD` bytes.
    fn seal(
        key: &[u8; KEY_SIZE],
        nonce: &Nonce,
        aad: &[u8],
        message: &[u8],
        out: &mut [u8],
    ) -> XChaChaResult<()>;

    /// Decrypt `ciphertext` into `out`, which is exactly
    /// `ciphertext.len() - OVERHEAD` bytes.
    fn open(
        key: &[u8; KEY_SIZE],
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
        out: &mut [u8],
    ) -> XChaChaResult<()>;
}

/// IETF XChaCha20-Poly1305 AEAD: ciphertext followed by the tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct XChaChaAead;

impl Construction for XChaChaAead {
    const NAME: &'static str = "xchacha20poly1305-ietf";
    const OVERHEAD: usize = AEAD_ABYTES;
    const SUPPORTS_AAD: bool = true;

    fn seal(
        key: &[u8; KEY_SIZE],
        nonce: &Nonce,
        aad: &[u8],
        message: &[u8],
        out: &mut [u8],
    ) -> XChaChaResult<()> {
        let cipher = chacha20poly1305::XChaCha20Poly1305::new(key.into());
        let (body, tag_out) = out.split_at_mut(message.len());
        body.copy_from_slice(message);

        let tag = cipher
            .encrypt_in_place_detached(nonce.as_bytes().into(), aad, body)
            .map_err(|e| XChaChaError::PrimitiveFailure(format!("aead seal failed: {e}")))?;
        tag_out.copy_from_slice(&tag);
        Ok(())
    }

    fn open(
        key: &[u8; KEY_SIZE],
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
        out: &mut [u8],
    ) -> XChaChaResult<()> {
        let cipher = chacha20poly1305::XChaCha20Poly1305::new(key.into());
        let (body, tag) = ciphertext.split_at(ciphertext.len() - Self::OVERHEAD);
        out.copy_from_slice(body);

        if cipher
            .decrypt_in_place_detached(
                nonce.as_bytes().into(),
                aad,
                out,
                GenericArray::from_slice(tag),
            )
            .is_err()
        {
            out.zeroize();
            return Err(XChaChaError::AuthenticationFailed);
        }
        Ok(())
    }
}

/// XChaCha20-Poly1305 secret box in the libsodium "easy" layout: the tag
/// precedes the ciphertext. Associated data is not supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct XChaChaSecretBox;

impl Construction for XChaChaSecretBox {
    const NAME: &'static str = "xchacha20poly1305-secretbox";
    const OVERHEAD: usize = SECRETBOX_MACBYTES;
    const SUPPORTS_AAD: bool = false;

    fn seal(
        key: &[u8; KEY_SIZE],
        nonce: &Nonce,
        _aad: &[u8],
        message: &[u8],
        out: &mut [u8],
    ) -> XChaChaResult<()> {
        let cipher = crypto_secretbox::XChaCha20Poly1305::new(key.into());
        let (tag_out, body) = out.split_at_mut(Self::OVERHEAD);
        body.copy_from_slice(message);

        let tag = cipher
            .encrypt_in_place_detached(nonce.as_bytes().into(), b"", body)
            .map_err(|e| XChaChaError::PrimitiveFailure(format!("secretbox seal failed: {e}")))?;
        tag_out.copy_from_slice(&tag);
        Ok(())
    }

    fn open(
        key: &[u8; KEY_SIZE],
        nonce: &Nonce,
        _aad: &[u8],
        ciphertext: &[u8],
        out: &mut [u8],
    ) -> XChaChaResult<()> {
        let cipher = crypto_secretbox::XChaCha20Poly1305::new(key.into());
        let (tag, body) = ciphertext.split_at(Self::OVERHEAD);
        out.copy_from_slice(body);

        if cipher
            .decrypt_in_place_detached(
                nonce.as_bytes().into(),
                b"",
                out,
                GenericArray::from_slice(tag),
            )
            .is_err()
        {
            out.zeroize();
            return Err(XChaChaError::AuthenticationFailed);
        }
        Ok(())
    }
}

/// Stateless one-shot cipher over a [`Construction`].
pub struct OneShotCipher<C> {
    _construction: PhantomData<C>,
}

pub type AeadCipher = OneShotCipher<XChaChaAead>;
pub type SecretBoxCipher = OneShotCipher<XChaChaSecretBox>;

impl<C: Construction> OneShotCipher<C> {
    pub const OVERHEAD: usize = C::OVERHEAD;

    pub fn new() -> Self {
        Self {
            _construction: PhantomData,
        }
    }

    pub fn ciphertext_len(&self, plaintext_len: usize) -> usize {
        plaintext_len.saturating_add(C::OVERHEAD)
    }

    /// Plaintext length for a ciphertext of `ciphertext_len` bytes; 0 for
    /// anything shorter than the overhead.
    pub fn plaintext_len(&self, ciphertext_len: usize) -> usize {
        ciphertext_len.saturating_sub(C::OVERHEAD)
    }

    pub fn max_message_len(&self) -> usize {
        usize::try_from(CHACHA_MAX_MESSAGE_LEN)
            .unwrap_or(usize::MAX)
            .min(isize::MAX as usize - C::OVERHEAD)
    }

    pub fn encrypt(
        &self,
        message: &[u8],
        aad: &[u8],
        key: &Key,
        nonce: &Nonce,
    ) -> XChaChaResult<Vec<u8>> {
        self.check_message_len(message.len())?;
        let mut out = vec![0u8; self.ciphertext_len(message.len())];
        self.encrypt_into(message, aad, key, nonce, &mut out)?;
        Ok(out)
    }

    /// Encrypt into the front of `out`, returning the ciphertext length.
    pub fn encrypt_into(
        &self,
        message: &[u8],
        aad: &[u8],
        key: &Key,
        nonce: &Nonce,
        out: &mut [u8],
    ) -> XChaChaResult<usize> {
        self.check_message_len(message.len())?;
        self.check_aad(aad)?;
        let needed = self.ciphertext_len(message.len());
        if out.len() < needed {
            return Err(XChaChaError::BufferTooSmall {
                needed,
                actual: out.len(),
            });
        }

        C::seal(key.expose_secret()?, nonce, aad, message, &mut out[..needed])?;
        Ok(needed)
    }

    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        aad: &[u8],
        key: &Key,
        nonce: &Nonce,
    ) -> XChaChaResult<Vec<u8>> {
        let mut out = vec![0u8; self.plaintext_len(ciphertext.len())];
        self.decrypt_into(ciphertext, aad, key, nonce, &mut out)?;
        Ok(out)
    }

    /// Decrypt into the front of `out`, returning the plaintext length.
    /// On failure the first `plaintext_len` bytes of `out` are zeroed.
    pub fn decrypt_into(
        &self,
        ciphertext: &[u8],
        aad: &[u8],
        key: &Key,
        nonce: &Nonce,
        out: &mut [u8],
    ) -> XChaChaResult<usize> {
        self.check_aad(aad)?;
        let needed = self.plaintext_len(ciphertext.len());
        if out.len() < needed {
            return Err(XChaChaError::BufferTooSmall {
                needed,
                actual: out.len(),
            });
        }
        let key = key.expose_secret()?;
        if ciphertext.len() < C::OVERHEAD {
            return Err(XChaChaError::AuthenticationFailed);
        }

        let result = C::open(key, nonce, aad, ciphertext, &mut out[..needed]);
        if result.is_err() {
            out[..needed].zeroize();
            tracing::trace!(construction = C::NAME, "one-shot decryption failed");
        }
        result.map(|()| needed)
    }

    /// Like [`decrypt_into`](Self::decrypt_into), but an authentication
    /// failure is `Ok(false)` instead of an error. Usage errors still
    /// propagate.
    pub fn try_decrypt(
        &self,
        ciphertext: &[u8],
        aad: &[u8],
        key: &Key,
        nonce: &Nonce,
        out: &mut [u8],
    ) -> XChaChaResult<bool> {
        match self.decrypt_into(ciphertext, aad, key, nonce, out) {
            Ok(_) => Ok(true),
            Err(e) if e.is_authentication_failure() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn check_message_len(&self, len: usize) -> XChaChaResult<()> {
        let max = self.max_message_len();
        if len > max {
            return Err(XChaChaError::MessageTooLong { len, max });
        }
        Ok(())
    }

    fn check_aad(&self, aad: &[u8]) -> XChaChaResult<()> {
        if !aad.is_empty() && !C::SUPPORTS_AAD {
            return Err(XChaChaError::AssociatedDataUnsupported {
                construction: C::NAME,
            });
        }
        Ok(())
    }
}

impl<C: Construction> Default for OneShotCipher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for OneShotCipher<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for OneShotCipher<C> {}

impl<C: Construction> fmt::Debug for OneShotCipher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShotCipher")
            .field("construction", &C::NAME)
            .field("overhead", &C::OVERHEAD)
            .finish()
    }
}
