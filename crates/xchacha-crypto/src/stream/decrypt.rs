use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use xchacha_core::config::validate_block_length;
use xchacha_core::{StreamConfig, XChaChaError, XChaChaResult, DEFAULT_BLOCK_LENGTH};
use zeroize::Zeroize;

use super::{read_full, read_header, Phase};
use crate::key::Key;
use crate::pool::{BufferPool, PooledBuffer};
use crate::state::{Pull, StreamCipherState, Tag};
use crate::STREAM_ABYTES;

/// Buffered decrypting reader.
///
/// Reads one `block_length + ABYTES` chunk at a time from the underlying
/// reader and hands out its plaintext across as many `read` calls as the
/// caller needs. `read` returns `Ok(0)` once the input is exhausted or the
/// `FINAL` chunk has been consumed. Neither says anything about
/// completeness: call [`finish`](Self::finish) (or check
/// [`verify_final`](Self::verify_final)) to make sure the stream was not
/// truncated.
///
/// Nothing is read from the underlying reader after the `FINAL` chunk, so a
/// transport that stays open once the sender is done does not block
/// `read_to_end`. Bytes following `FINAL` are reported by `finish`.
///
/// Any authentication failure poisons the stream.
pub struct DecryptStream<R: Read> {
    inner: Option<R>,
    state: StreamCipherState<Pull>,
    block_length: usize,
    ciphertext: PooledBuffer,
    plaintext: PooledBuffer,
    pos: usize,
    end: usize,
    eof: bool,
    phase: Phase,
}

impl<R: Read> DecryptStream<R> {
    /// Read the stream header from `inner` and prepare to decrypt with the
    /// default block length.
    pub fn new(inner: R, key: &Key) -> XChaChaResult<Self> {
        Self::with_block_length(inner, key, DEFAULT_BLOCK_LENGTH)
    }

    pub fn with_block_length(inner: R, key: &Key, block_length: usize) -> XChaChaResult<Self> {
        Self::with_pool(inner, key, block_length, BufferPool::shared())
    }

    pub fn with_config(inner: R, key: &Key, config: &StreamConfig) -> XChaChaResult<Self> {
        config.validate()?;
        Self::with_pool(
            inner,
            key,
            config.block_length,
            BufferPool::for_config(&config.pool),
        )
    }

    pub fn with_pool(
        mut inner: R,
        key: &Key,
        block_length: usize,
        pool: Arc<BufferPool>,
    ) -> XChaChaResult<Self> {
        validate_block_length(block_length)?;
        // Fail on a disposed key before consuming any input.
        key.expose_secret()?;
        let header = read_header(&mut inner)?;
        let state = StreamCipherState::init_pull(key, &header)?;

        tracing::debug!(block_length, "decrypt stream opened");
        Ok(Self {
            inner: Some(inner),
            state,
            block_length,
            ciphertext: pool.rent(block_length + STREAM_ABYTES),
            plaintext: pool.rent(block_length),
            pos: 0,
            end: 0,
            eof: false,
            phase: Phase::Open,
        })
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    /// Whether the last chunk decrypted so far was tagged `FINAL`.
    pub fn verify_final(&self) -> bool {
        self.phase == Phase::Finalized
    }

    /// Check that the stream ended with a `FINAL` chunk and nothing follows
    /// it, then hand back the underlying reader. Unread plaintext is
    /// discarded.
    pub fn finish(mut self) -> XChaChaResult<R> {
        match self.phase {
            Phase::Poisoned => return Err(XChaChaError::StreamPoisoned),
            Phase::Open => {
                tracing::debug!(blocks = self.state.blocks(), "stream ended without final chunk");
                return Err(XChaChaError::Truncated);
            }
            Phase::Finalized => {}
        }

        if !self.eof {
            let mut probe = [0u8; 1];
            let inner = self.inner.as_mut().ok_or(XChaChaError::StreamPoisoned)?;
            if read_full(inner, &mut probe)? > 0 {
                tracing::debug!("data after final chunk");
                return Err(XChaChaError::TrailingData);
            }
        }
        self.inner.take().ok_or(XChaChaError::StreamPoisoned)
    }

    fn read_plaintext(&mut self, dest: &mut [u8]) -> XChaChaResult<usize> {
        let mut produced = 0;
        while produced < dest.len() {
            if self.pos < self.end {
                let n = (self.end - self.pos).min(dest.len() - produced);
                dest[produced..produced + n].copy_from_slice(&self.plaintext[self.pos..self.pos + n]);
                self.pos += n;
                produced += n;
                if self.pos == self.end {
                    self.plaintext[..self.end].zeroize();
                    self.pos = 0;
                    self.end = 0;
                }
                continue;
            }

            if !self.next_block()? {
                break;
            }
        }
        Ok(produced)
    }

    /// Read and decrypt the next chunk into the leftover buffer. Returns
    /// `false` at end of input or after the final chunk.
    fn next_block(&mut self) -> XChaChaResult<bool> {
        if self.eof || self.phase == Phase::Finalized {
            return Ok(false);
        }

        let inner = self.inner.as_mut().ok_or(XChaChaError::StreamPoisoned)?;
        let n = read_full(inner, &mut self.ciphertext)?;
        if n < self.ciphertext.len() {
            self.eof = true;
        }
        if n == 0 {
            return Ok(false);
        }

        let (len, tag) = self
            .state
            .pull(&self.ciphertext[..n], None, &mut self.plaintext)?;
        if tag == Tag::Final {
            self.phase = Phase::Finalized;
        }
        self.pos = 0;
        self.end = len;
        Ok(true)
    }
}

impl<R: Read> Read for DecryptStream<R> {
    /// Fills `buf` as far as the remaining stream allows. Asking for more
    /// than remains returns only what is available.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.phase == Phase::Poisoned {
            return Err(XChaChaError::StreamPoisoned.into());
        }

        let result = self.read_plaintext(buf);
        if result.is_err() {
            self.phase = Phase::Poisoned;
            self.plaintext.zeroize();
            self.pos = 0;
            self.end = 0;
        }
        result.map_err(io::Error::from)
    }
}

impl<R: Read> fmt::Debug for DecryptStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptStream")
            .field("block_length", &self.block_length)
            .field("pending", &(self.end - self.pos))
            .field("eof", &self.eof)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
