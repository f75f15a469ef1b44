//! Reusable scratch buffers for stream blocks
//!
//! Streams rent their plaintext and ciphertext block buffers from a
//! `BufferPool` instead of allocating per stream. A buffer is zeroized the
//! moment it is returned, so plaintext or ciphertext from one stream can
//! never surface in another stream's rental.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, OnceLock};

use xchacha_core::PoolConfig;
use zeroize::Zeroize;

#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_retained: usize,
    max_buffer_len: usize,
}

impl BufferPool {
    pub fn new(config: &PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(config.max_retained)),
            max_retained: config.max_retained,
            max_buffer_len: config.max_buffer_len,
        })
    }

    /// Process-wide pool with default settings.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<BufferPool>> = OnceLock::new();
        SHARED
            .get_or_init(|| BufferPool::new(&PoolConfig::default()))
            .clone()
    }

    /// The shared pool for default settings, otherwise a private pool built
    /// from `config`.
    pub fn for_config(config: &PoolConfig) -> Arc<Self> {
        if *config == PoolConfig::default() {
            Self::shared()
        } else {
            Self::new(config)
        }
    }

    /// Check out a zero-filled buffer of exactly `len` bytes.
    pub fn rent(self: &Arc<Self>, len: usize) -> PooledBuffer {
        let recycled = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.iter()
                .position(|buf| buf.capacity() >= len)
                .map(|i| idle.swap_remove(i))
        };

        let mut buf = recycled.unwrap_or_default();
        buf.resize(len, 0);
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn give_back(&self, mut buf: Vec<u8>) {
        // Vec::zeroize wipes the spare capacity too, then clears.
        buf.zeroize();
        if buf.capacity() > self.max_buffer_len {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.max_retained {
            idle.push(buf);
        }
    }
}

/// A buffer checked out of a `BufferPool`; returned (zeroized) on drop.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// The pool this buffer goes back to.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .finish()
    }
}
