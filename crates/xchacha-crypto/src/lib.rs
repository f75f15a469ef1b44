//! xchacha-crypto: chunked XChaCha20-Poly1305 stream encryption
//!
//! Architecture: libsodium-compatible secretstream over `std::io`, with keys
//! held in guarded memory
//!
//! ```text
//! Key (256-bit, guarded pages, read-only after write)
//!   ├── EncryptStream / DecryptStream  buffered, fixed block length (default 128 KiB)
//!   │   └── StreamCipherState          header → push/pull per chunk, FINAL tag ends the stream
//!   ├── BlockEncryptor / BlockDecryptor one chunk per call, per-chunk associated data
//!   └── OneShotCipher                  single buffer: XChaChaAead | XChaChaSecretBox
//! ```
//!
//! Stream wire format: `[24-byte header][chunk]...[chunk tagged FINAL]`, each
//! chunk being one block of ciphertext plus 17 bytes of overhead.

pub mod cipher;
pub mod guarded;
pub mod key;
pub mod nonce;
pub mod pool;
pub mod state;
pub mod stream;

pub use cipher::{
    AeadCipher, Construction, OneShotCipher, SecretBoxCipher, XChaChaAead, XChaChaSecretBox,
};
pub use key::Key;
pub use nonce::Nonce;
pub use pool::{BufferPool, PooledBuffer};
pub use state::{Header, StreamCipherState, Tag};
pub use stream::{BlockDecryptor, BlockEncryptor, DecryptStream, EncryptStream};
pub use xchacha_core::{
    ErrorClass, PoolConfig, StreamConfig, XChaChaError, XChaChaResult, DEFAULT_BLOCK_LENGTH, MAX_BLOCK_LENGTH,
};

/// Size of a key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a secretstream header
pub const HEADER_SIZE: usize = 24;

/// Per-chunk secretstream overhead: encrypted tag byte + Poly1305 MAC
pub const STREAM_ABYTES: usize = 17;

/// One-shot AEAD overhead (Poly1305 tag)
pub const AEAD_ABYTES: usize = 16;

/// One-shot secret box overhead (Poly1305 tag)
pub const SECRETBOX_MACBYTES: usize = 16;

/// Ciphertext length of a stream written with `block_length`, with no soft
/// flushes, and finished with `flush_final`.
pub fn stream_ciphertext_len(plaintext_len: usize, block_length: usize) -> usize {
    let chunks = plaintext_len.div_ceil(block_length.max(1)).max(1);
    HEADER_SIZE + plaintext_len + chunks * STREAM_ABYTES
}
