use std::io::{Read, Write};

use xchacha_core::{XChaChaError, XChaChaResult};

use super::{read_full, read_header, Phase};
use crate::key::Key;
use crate::state::{Header, Pull, Push, StreamCipherState, Tag};
use crate::STREAM_ABYTES;

/// Unbuffered encrypting writer: every call is exactly one chunk.
///
/// Associated data given per block is authenticated but not written; the
/// decrypting side must supply the same bytes for the same block.
///
/// Dropping an encryptor before [`write_final_block`](Self::write_final_block)
/// leaves the output unterminated and logs a warning. The final chunk is not
/// written on drop, since only the caller knows its associated data.
pub struct BlockEncryptor<W: Write> {
    inner: Option<W>,
    state: StreamCipherState<Push>,
    header: Header,
    header_written: bool,
    ciphertext: Vec<u8>,
    phase: Phase,
}

impl<W: Write> BlockEncryptor<W> {
    pub fn new(inner: W, key: &Key) -> XChaChaResult<Self> {
        let (state, header) = StreamCipherState::init_push(key)?;
        Ok(Self {
            inner: Some(inner),
            state,
            header,
            header_written: false,
            ciphertext: Vec::new(),
            phase: Phase::Open,
        })
    }

    /// Encrypt `data` as one `MESSAGE` chunk. Empty data writes nothing.
    pub fn write_block(&mut self, data: &[u8], aad: Option<&[u8]>) -> XChaChaResult<()> {
        if data.is_empty() {
            return self.check_open();
        }
        self.push_block(data, aad, Tag::Message)
    }

    /// Encrypt `data` as the `FINAL` chunk. `data` may be empty.
    pub fn write_final_block(&mut self, data: &[u8], aad: Option<&[u8]>) -> XChaChaResult<()> {
        self.push_block(data, aad, Tag::Final)
    }

    /// Encrypt `data` as one chunk with an explicit tag.
    pub fn push_block(&mut self, data: &[u8], aad: Option<&[u8]>, tag: Tag) -> XChaChaResult<()> {
        self.check_open()?;

        let result = self.push_inner(data, aad, tag);
        self.phase = match (&result, tag) {
            (Err(_), _) => Phase::Poisoned,
            (Ok(()), Tag::Final) => Phase::Finalized,
            (Ok(()), _) => Phase::Open,
        };
        result
    }

    /// Write the header if needed and flush the underlying writer.
    pub fn flush(&mut self) -> XChaChaResult<()> {
        if self.phase == Phase::Poisoned {
            return Err(XChaChaError::StreamPoisoned);
        }
        self.ensure_header()?;
        self.writer()?.flush()?;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == Phase::Finalized
    }

    /// Hand back the underlying writer. Does not terminate the stream.
    pub fn into_inner(mut self) -> XChaChaResult<W> {
        self.inner.take().ok_or(XChaChaError::StreamFinalized)
    }

    fn push_inner(&mut self, data: &[u8], aad: Option<&[u8]>, tag: Tag) -> XChaChaResult<()> {
        self.ensure_header()?;
        self.ciphertext.resize(data.len() + STREAM_ABYTES, 0);
        let len = self.state.push(data, aad, tag, &mut self.ciphertext)?;
        let inner = self.inner.as_mut().ok_or(XChaChaError::StreamFinalized)?;
        inner.write_all(&self.ciphertext[..len])?;
        Ok(())
    }

    fn ensure_header(&mut self) -> XChaChaResult<()> {
        if !self.header_written {
            let header = self.header;
            self.writer()?.write_all(&header)?;
            self.header_written = true;
        }
        Ok(())
    }

    fn writer(&mut self) -> XChaChaResult<&mut W> {
        self.inner.as_mut().ok_or(XChaChaError::StreamFinalized)
    }

    fn check_open(&self) -> XChaChaResult<()> {
        match self.phase {
            Phase::Open => Ok(()),
            Phase::Finalized => Err(XChaChaError::StreamFinalized),
            Phase::Poisoned => Err(XChaChaError::StreamPoisoned),
        }
    }
}

impl<W: Write> Drop for BlockEncryptor<W> {
    fn drop(&mut self) {
        if self.phase == Phase::Open && self.inner.is_some() {
            tracing::warn!(
                blocks = self.state.blocks(),
                "block encryptor dropped without a final block; output is unterminated"
            );
        }
    }
}

/// Unbuffered decrypting reader: every call consumes exactly one chunk.
///
/// The caller must ask for each block with the plaintext length it was
/// written with.
pub struct BlockDecryptor<R: Read> {
    inner: R,
    state: StreamCipherState<Pull>,
    ciphertext: Vec<u8>,
    phase: Phase,
}

impl<R: Read> BlockDecryptor<R> {
    /// Read the stream header from `inner`.
    pub fn new(mut inner: R, key: &Key) -> XChaChaResult<Self> {
        key.expose_secret()?;
        let header = read_header(&mut inner)?;
        let state = StreamCipherState::init_pull(key, &header)?;
        Ok(Self {
            inner,
            state,
            ciphertext: Vec::new(),
            phase: Phase::Open,
        })
    }

    /// Read up to `dest.len() + ABYTES` bytes and decrypt them as one chunk
    /// into `dest`. Returns the plaintext length; `Ok(0)` with nothing
    /// consumed means end of input (or an empty chunk, see
    /// [`last_tag`](Self::last_tag)).
    pub fn read_block(&mut self, dest: &mut [u8], aad: Option<&[u8]>) -> XChaChaResult<usize> {
        if self.phase == Phase::Poisoned {
            return Err(XChaChaError::StreamPoisoned);
        }

        let result = self.read_inner(dest, aad);
        if result.is_err() {
            self.phase = Phase::Poisoned;
        }
        result
    }

    /// Tag of the last chunk read.
    pub fn last_tag(&self) -> Option<Tag> {
        self.state.last_tag()
    }

    pub fn verify_final(&self) -> bool {
        self.state.verify_final()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_inner(&mut self, dest: &mut [u8], aad: Option<&[u8]>) -> XChaChaResult<usize> {
        self.ciphertext.resize(dest.len() + STREAM_ABYTES, 0);
        let n = read_full(&mut self.inner, &mut self.ciphertext)?;
        if n == 0 {
            return Ok(0);
        }
        if self.phase == Phase::Finalized {
            return Err(XChaChaError::TrailingData);
        }

        let (len, tag) = self.state.pull(&self.ciphertext[..n], aad, dest)?;
        if tag == Tag::Final {
            self.phase = Phase::Finalized;
        }
        Ok(len)
    }
}
