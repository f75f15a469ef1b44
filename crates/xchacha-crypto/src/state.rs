//! Per-stream secretstream state
//!
//! Wraps the XChaCha20-Poly1305 secretstream primitive's mutable state
//! (derived sub-key, counter and inner nonce). A state is bound to one key
//! and one header, advances with every block, and is zeroized on drop.
//! It is never cloned or exposed: the only operations are block-level
//! `push` (encrypt side) and `pull` (decrypt side).
//!
//! Each pushed block is `plaintext.len() + ABYTES` bytes. The overhead
//! carries the encrypted tag byte and the Poly1305 MAC; the tag is only
//! recovered by a successful `pull`.

use std::fmt;
use std::marker::PhantomData;

use dryoc::classic::crypto_secretstream_xchacha20poly1305::{
    crypto_secretstream_xchacha20poly1305_init_pull,
    crypto_secretstream_xchacha20poly1305_init_push, crypto_secretstream_xchacha20poly1305_pull,
    crypto_secretstream_xchacha20poly1305_push, crypto_secretstream_xchacha20poly1305_rekey,
    State,
};
use xchacha_core::{XChaChaError, XChaChaResult};
use zeroize::Zeroize;

use crate::key::Key;
use crate::{HEADER_SIZE, STREAM_ABYTES};

/// Stream header: transmitted once, ahead of the first block.
pub type Header = [u8; HEADER_SIZE];

/// Block tag, authenticated inside each block's overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// More blocks follow.
    Message = 0,
    /// End of a logical chunk; reserved.
    Push = 1,
    /// Ratchet the sub-key after this block; reserved.
    Rekey = 2,
    /// Last block of the stream.
    Final = 3,
}

impl Tag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Message),
            1 => Some(Self::Push),
            2 => Some(Self::Rekey),
            3 => Some(Self::Final),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Encrypting side.
pub struct Push;
/// Decrypting side.
pub struct Pull;

pub struct StreamCipherState<M> {
    state: State,
    last_tag: Option<Tag>,
    blocks: u64,
    _mode: PhantomData<M>,
}

impl StreamCipherState<Push> {
    /// Start an encrypting stream. Returns the fresh random header that the
    /// decrypting side needs.
    pub fn init_push(key: &Key) -> XChaChaResult<(Self, Header)> {
        let key = key.expose_secret()?;
        let mut state = State::new();
        let mut header: Header = [0u8; HEADER_SIZE];
        crypto_secretstream_xchacha20poly1305_init_push(&mut state, &mut header, key);

        tracing::debug!("secretstream push state initialized");
        Ok((Self::from_state(state), header))
    }

    /// Encrypt one block into `out`, returning the ciphertext length
    /// (`plaintext.len() + ABYTES`).
    pub fn push(
        &mut self,
        plaintext: &[u8],
        aad: Option<&[u8]>,
        tag: Tag,
        out: &mut [u8],
    ) -> XChaChaResult<usize> {
        let needed = plaintext.len() + STREAM_ABYTES;
        if out.len() < needed {
            return Err(XChaChaError::BufferTooSmall {
                needed,
                actual: out.len(),
            });
        }

        crypto_secretstream_xchacha20poly1305_push(
            &mut self.state,
            &mut out[..needed],
            plaintext,
            aad,
            tag.as_byte(),
        )
        .map_err(|_| XChaChaError::PrimitiveFailure("block encryption failed".into()))?;

        self.blocks += 1;
        self.last_tag = Some(tag);
        tracing::trace!(block = self.blocks, len = plaintext.len(), ?tag, "block pushed");
        Ok(needed)
    }
}

impl StreamCipherState<Pull> {
    /// Start a decrypting stream from the header written by `init_push`.
    pub fn init_pull(key: &Key, header: &Header) -> XChaChaResult<Self> {
        let key = key.expose_secret()?;
        let mut state = State::new();
        crypto_secretstream_xchacha20poly1305_init_pull(&mut state, header, key);

        tracing::debug!("secretstream pull state initialized");
        Ok(Self::from_state(state))
    }

    /// Authenticate and decrypt one block into `out`.
    ///
    /// Returns the plaintext length and the block's tag. A block that fails
    /// authentication yields `CorruptBlock` and leaves `out` zeroed; the
    /// stream must not be used afterwards.
    pub fn pull(
        &mut self,
        ciphertext: &[u8],
        aad: Option<&[u8]>,
        out: &mut [u8],
    ) -> XChaChaResult<(usize, Tag)> {
        if ciphertext.len() < STREAM_ABYTES {
            return Err(XChaChaError::CorruptBlock);
        }
        let mlen = ciphertext.len() - STREAM_ABYTES;
        if out.len() < mlen {
            return Err(XChaChaError::BufferTooSmall {
                needed: mlen,
                actual: out.len(),
            });
        }

        let mut raw_tag = 0u8;
        let result = crypto_secretstream_xchacha20poly1305_pull(
            &mut self.state,
            &mut out[..mlen],
            &mut raw_tag,
            ciphertext,
            aad,
        );

        // The primitive decrypts before comparing MACs.
        let Ok(len) = result else {
            out[..mlen].zeroize();
            tracing::debug!(block = self.blocks + 1, "block failed authentication");
            return Err(XChaChaError::CorruptBlock);
        };
        let Some(tag) = Tag::from_byte(raw_tag) else {
            out[..mlen].zeroize();
            return Err(XChaChaError::CorruptBlock);
        };

        self.blocks += 1;
        self.last_tag = Some(tag);
        tracing::trace!(block = self.blocks, len, ?tag, "block pulled");
        Ok((len, tag))
    }

    /// Whether the last pulled block was tagged `Final`.
    pub fn verify_final(&self) -> bool {
        self.last_tag == Some(Tag::Final)
    }
}

impl<M> StreamCipherState<M> {
    fn from_state(state: State) -> Self {
        Self {
            state,
            last_tag: None,
            blocks: 0,
            _mode: PhantomData,
        }
    }

    /// Tag of the most recent block pushed or pulled.
    pub fn last_tag(&self) -> Option<Tag> {
        self.last_tag
    }

    /// Number of blocks processed so far.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Ratchet the sub-key explicitly. Both sides must rekey at the same
    /// position in the stream.
    pub fn rekey(&mut self) {
        crypto_secretstream_xchacha20poly1305_rekey(&mut self.state);
    }
}

impl<M> fmt::Debug for StreamCipherState<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCipherState")
            .field("state", &"[REDACTED]")
            .field("blocks", &self.blocks)
            .field("last_tag", &self.last_tag)
            .finish()
    }
}
