use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use xchacha_core::config::validate_block_length;
use xchacha_core::{StreamConfig, XChaChaError, XChaChaResult, DEFAULT_BLOCK_LENGTH};
use zeroize::Zeroize;

use super::Phase;
use crate::key::Key;
use crate::pool::{BufferPool, PooledBuffer};
use crate::state::{Header, Push, StreamCipherState, Tag};
use crate::STREAM_ABYTES;

/// Buffered encrypting writer.
///
/// Plaintext is accumulated into `block_length`-sized blocks, each pushed as
/// one chunk tagged `MESSAGE`. The stream must be terminated with
/// [`flush_final`](Self::flush_final) or [`finish`](Self::finish), which
/// pushes whatever is buffered (possibly nothing) tagged `FINAL`.
///
/// The header is written lazily, before the first chunk or on the first
/// flush. Dropping an unfinished stream runs the final flush as a safety
/// net; failures on that path can only be logged. A stream that was never
/// written to or flushed emits just the header when dropped.
pub struct EncryptStream<W: Write> {
    inner: Option<W>,
    state: StreamCipherState<Push>,
    header: Header,
    header_written: bool,
    block_length: usize,
    plaintext: PooledBuffer,
    filled: usize,
    ciphertext: PooledBuffer,
    phase: Phase,
}

impl<W: Write> EncryptStream<W> {
    /// Encrypt into `inner` with the default 128 KiB block length.
    pub fn new(inner: W, key: &Key) -> XChaChaResult<Self> {
        Self::with_block_length(inner, key, DEFAULT_BLOCK_LENGTH)
    }

    pub fn with_block_length(inner: W, key: &Key, block_length: usize) -> XChaChaResult<Self> {
        Self::with_pool(inner, key, block_length, BufferPool::shared())
    }

    pub fn with_config(inner: W, key: &Key, config: &StreamConfig) -> XChaChaResult<Self> {
        config.validate()?;
        Self::with_pool(
            inner,
            key,
            config.block_length,
            BufferPool::for_config(&config.pool),
        )
    }

    /// Like [`with_block_length`](Self::with_block_length), renting block
    /// buffers from `pool`.
    pub fn with_pool(
        inner: W,
        key: &Key,
        block_length: usize,
        pool: Arc<BufferPool>,
    ) -> XChaChaResult<Self> {
        validate_block_length(block_length)?;
        let (state, header) = StreamCipherState::init_push(key)?;

        tracing::debug!(block_length, "encrypt stream opened");
        Ok(Self {
            inner: Some(inner),
            state,
            header,
            header_written: false,
            block_length,
            plaintext: pool.rent(block_length),
            filled: 0,
            ciphertext: pool.rent(block_length + STREAM_ABYTES),
            phase: Phase::Open,
        })
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    /// Whether the FINAL chunk has been written.
    pub fn is_finalized(&self) -> bool {
        self.phase == Phase::Finalized
    }

    /// Push buffered plaintext tagged `FINAL` and flush the underlying
    /// writer. Further writes fail with `StreamFinalized`; calling this
    /// again does nothing.
    pub fn flush_final(&mut self) -> XChaChaResult<()> {
        match self.phase {
            Phase::Finalized => return Ok(()),
            Phase::Poisoned => return Err(XChaChaError::StreamPoisoned),
            Phase::Open => {}
        }

        let result = self.finalize();
        self.phase = match result {
            Ok(()) => Phase::Finalized,
            Err(_) => Phase::Poisoned,
        };
        result
    }

    /// Terminate the stream and hand back the underlying writer.
    pub fn finish(mut self) -> XChaChaResult<W> {
        self.flush_final()?;
        self.inner.take().ok_or(XChaChaError::StreamFinalized)
    }

    fn finalize(&mut self) -> XChaChaResult<()> {
        self.ensure_header()?;
        self.push_buffered(Tag::Final)?;
        self.writer()?.flush()?;
        tracing::debug!(blocks = self.state.blocks(), "encrypt stream finalized");
        Ok(())
    }

    fn check_open(&self) -> XChaChaResult<()> {
        match self.phase {
            Phase::Open => Ok(()),
            Phase::Finalized => Err(XChaChaError::StreamFinalized),
            Phase::Poisoned => Err(XChaChaError::StreamPoisoned),
        }
    }

    /// Run `op`, poisoning the stream if it fails part-way.
    fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> XChaChaResult<T>,
    ) -> XChaChaResult<T> {
        self.check_open()?;
        let result = op(self);
        if result.is_err() {
            self.phase = Phase::Poisoned;
        }
        result
    }

    fn write_plaintext(&mut self, mut data: &[u8]) -> XChaChaResult<()> {
        self.ensure_header()?;

        while !data.is_empty() {
            if self.filled == self.block_length {
                self.push_buffered(Tag::Message)?;
                continue;
            }

            if self.filled == 0 && data.len() > self.block_length {
                let (block, rest) = data.split_at(self.block_length);
                self.push_direct(block)?;
                data = rest;
                continue;
            }

            let n = (self.block_length - self.filled).min(data.len());
            self.plaintext[self.filled..self.filled + n].copy_from_slice(&data[..n]);
            self.filled += n;
            data = &data[n..];
        }
        Ok(())
    }

    fn soft_flush(&mut self) -> XChaChaResult<()> {
        self.ensure_header()?;
        if self.filled > 0 {
            self.push_buffered(Tag::Message)?;
        }
        self.writer()?.flush()?;
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

    /// Push the accumulation buffer as one chunk and empty it.
    fn push_buffered(&mut self, tag: Tag) -> XChaChaResult<()> {
        let len = self.state.push(
            &self.plaintext[..self.filled],
            None,
            tag,
            &mut self.ciphertext,
        )?;
        self.plaintext[..self.filled].zeroize();
        self.filled = 0;
        self.emit(len)
    }

    /// Push a full block straight from the caller's slice.
    fn push_direct(&mut self, block: &[u8]) -> XChaChaResult<()> {
        let len = self
            .state
            .push(block, None, Tag::Message, &mut self.ciphertext)?;
        self.emit(len)
    }

    fn emit(&mut self, len: usize) -> XChaChaResult<()> {
        let inner = self.inner.as_mut().ok_or(XChaChaError::StreamFinalized)?;
        inner.write_all(&self.ciphertext[..len])?;
        Ok(())
    }

    fn writer(&mut self) -> XChaChaResult<&mut W> {
        self.inner.as_mut().ok_or(XChaChaError::StreamFinalized)
    }
}

impl<W: Write> Write for EncryptStream<W> {
    /// Always consumes the whole of `buf`. An empty `buf` is a no-op and
    /// does not write the header.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            self.check_open()?;
            return Ok(0);
        }
        self.guarded(|s| s.write_plaintext(buf))?;
        Ok(buf.len())
    }

    /// Push buffered plaintext as a `MESSAGE` chunk without ending the
    /// stream. Always writes the header.
    fn flush(&mut self) -> io::Result<()> {
        if self.phase == Phase::Finalized {
            return Ok(());
        }
        self.guarded(Self::soft_flush)?;
        Ok(())
    }
}

impl<W: Write> Drop for EncryptStream<W> {
    fn drop(&mut self) {
        match self.phase {
            Phase::Finalized => {}
            Phase::Poisoned => {
                tracing::warn!("encrypt stream dropped after failure; output is incomplete");
            }
            Phase::Open if !self.header_written => {
                let result = self.ensure_header().and_then(|()| {
                    self.writer()?.flush()?;
                    Ok(())
                });
                if let Err(e) = result {
                    tracing::error!(error = %e, "writing header on drop failed");
                }
            }
            Phase::Open => {
                tracing::warn!("encrypt stream dropped without flush_final; finalizing on drop");
                if let Err(e) = self.flush_final() {
                    tracing::error!(error = %e, "final flush on drop failed");
                }
            }
        }
    }
}

impl<W: Write> fmt::Debug for EncryptStream<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptStream")
            .field("block_length", &self.block_length)
            .field("buffered", &self.filled)
            .field("header_written", &self.header_written)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HEADER_SIZE;
    use xchacha_core::PoolConfig;

    fn test_key() -> Key {
        Key::from_bytes(&[7u8; 32]).unwrap()
    }

    /// Writer that counts `write` calls and fails once `fail_after` bytes
    /// have been accepted.
    struct FailingWriter {
        written: usize,
        fail_after: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written + buf.len() > self.fail_after {
                return Err(io::Error::other("disk full"));
            }
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_stream_drop_emits_header_only() {
        let mut out = Vec::new();
        {
            let _stream = EncryptStream::new(&mut out, &test_key()).unwrap();
        }
        assert_eq!(out.len(), HEADER_SIZE);
    }

    #[test]
    fn test_zero_length_write_does_not_emit_header() {
        let mut out = Vec::new();
        let mut stream = EncryptStream::new(&mut out, &test_key()).unwrap();
        assert_eq!(stream.write(&[]).unwrap(), 0);
        assert!(!stream.header_written);
        drop(stream);
        assert_eq!(out.len(), HEADER_SIZE);
    }

    #[test]
    fn test_finish_empty_stream_pushes_final_chunk() {
        let stream = EncryptStream::new(Vec::new(), &test_key()).unwrap();
        let out = stream.finish().unwrap();
        assert_eq!(out.len(), HEADER_SIZE + STREAM_ABYTES);
    }

    #[test]
    fn test_soft_flush_writes_header_and_buffer() {
        let mut stream = EncryptStream::with_block_length(Vec::new(), &test_key(), 64).unwrap();
        stream.flush().unwrap();
        assert!(stream.header_written);

        stream.write_all(b"abc").unwrap();
        stream.flush().unwrap();
        assert_eq!(stream.filled, 0);

        let out = stream.finish().unwrap();
        // header + MESSAGE(3) + FINAL(0)
        assert_eq!(out.len(), HEADER_SIZE + 3 + STREAM_ABYTES + STREAM_ABYTES);
    }

    #[test]
    fn test_small_writes_are_coalesced() {
        let mut stream = EncryptStream::with_block_length(Vec::new(), &test_key(), 16).unwrap();
        for _ in 0..10 {
            stream.write_all(b"abcd").unwrap();
        }
        // 40 bytes: two full blocks pushed, 8 bytes buffered
        assert_eq!(stream.state.blocks(), 2);
        assert_eq!(stream.filled, 8);

        let out = stream.finish().unwrap();
        assert_eq!(out.len(), HEADER_SIZE + 40 + 3 * STREAM_ABYTES);
    }

    #[test]
    fn test_large_write_bypasses_buffer() {
        let mut stream = EncryptStream::with_block_length(Vec::new(), &test_key(), 16).unwrap();
        stream.write_all(&[1u8; 50]).unwrap();
        // 16 + 16 + 16 pushed directly, 2 left in the buffer
        assert_eq!(stream.state.blocks(), 3);
        assert_eq!(stream.filled, 2);
    }

    #[test]
    fn test_exact_block_stays_buffered_until_final() {
        let mut stream = EncryptStream::with_block_length(Vec::new(), &test_key(), 16).unwrap();
        stream.write_all(&[1u8; 16]).unwrap();
        assert_eq!(stream.state.blocks(), 0);
        assert_eq!(stream.filled, 16);

        let out = stream.finish().unwrap();
        assert_eq!(out.len(), HEADER_SIZE + 16 + STREAM_ABYTES);
    }

    #[test]
    fn test_flush_final_idempotent_and_write_after_fails() {
        let mut stream = EncryptStream::new(Vec::new(), &test_key()).unwrap();
        stream.write_all(b"data").unwrap();
        stream.flush_final().unwrap();
        stream.flush_final().unwrap();
        assert!(stream.is_finalized());

        let err = stream.write(b"more").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(matches!(
            XChaChaError::from_io(&err),
            Some(XChaChaError::StreamFinalized)
        ));
    }

    #[test]
    fn test_io_failure_poisons_stream() {
        let writer = FailingWriter {
            written: 0,
            fail_after: HEADER_SIZE + 10,
        };
        let mut stream = EncryptStream::with_block_length(writer, &test_key(), 16).unwrap();
        assert!(stream.write_all(&[0u8; 64]).is_err());

        let err = stream.write(b"x").unwrap_err();
        assert!(matches!(
            XChaChaError::from_io(&err),
            Some(XChaChaError::StreamPoisoned)
        ));
        assert!(matches!(
            stream.flush_final(),
            Err(XChaChaError::StreamPoisoned)
        ));
    }

    #[test]
    fn test_rejects_invalid_block_length() {
        assert!(matches!(
            EncryptStream::with_block_length(Vec::new(), &test_key(), 0),
            Err(XChaChaError::InvalidBlockLength { len: 0, .. })
        ));
    }

    #[test]
    fn test_with_config() {
        let config = StreamConfig {
            block_length: 32,
            ..Default::default()
        };
        let stream = EncryptStream::with_config(Vec::new(), &test_key(), &config).unwrap();
        assert_eq!(stream.block_length(), 32);
    }

    #[test]
    fn test_with_config_uses_configured_pool() {
        let config = StreamConfig {
            block_length: 32,
            pool: PoolConfig {
                max_retained: 0,
                max_buffer_len: 0,
            },
        };
        let mut stream = EncryptStream::with_config(Vec::new(), &test_key(), &config).unwrap();
        let pool = Arc::clone(stream.plaintext.pool());
        assert!(!Arc::ptr_eq(&pool, &BufferPool::shared()));
        assert!(Arc::ptr_eq(stream.ciphertext.pool(), &pool));

        stream.write_all(&[4u8; 100]).unwrap();
        let out = stream.finish().unwrap();
        assert_eq!(out.len(), HEADER_SIZE + 100 + 4 * STREAM_ABYTES);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_default_config_uses_shared_pool() {
        let stream =
            EncryptStream::with_config(Vec::new(), &test_key(), &StreamConfig::default()).unwrap();
        assert!(Arc::ptr_eq(stream.plaintext.pool(), &BufferPool::shared()));
    }

    #[test]
    fn test_with_pool_returns_buffers_to_caller_pool() {
        let pool = BufferPool::new(&PoolConfig {
            max_retained: 4,
            max_buffer_len: 1024,
        });
        let mut stream =
            EncryptStream::with_pool(Vec::new(), &test_key(), 64, Arc::clone(&pool)).unwrap();
        assert_eq!(pool.idle_count(), 0);

        stream.write_all(&[1u8; 200]).unwrap();
        let out = stream.finish().unwrap();
        assert_eq!(out.len(), HEADER_SIZE + 200 + 4 * STREAM_ABYTES);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_failed_final_flush_on_drop_does_not_panic() {
        let mut writer = FailingWriter {
            written: 0,
            fail_after: HEADER_SIZE,
        };
        {
            let mut stream = EncryptStream::with_block_length(&mut writer, &test_key(), 16).unwrap();
            stream.write_all(b"partial").unwrap();
            assert_eq!(stream.filled, 7);
        }
        // Only the header made it out; the FINAL chunk failed and was logged
        assert_eq!(writer.written, HEADER_SIZE);
    }

    #[test]
    fn test_disposed_key_rejected() {
        let mut key = test_key();
        key.dispose();
        assert!(matches!(
            EncryptStream::new(Vec::new(), &key),
            Err(XChaChaError::KeyDisposed)
        ));
    }
}
