//! Chunked secretstream encryption over `std::io`
//!
//! Wire format:
//! ```text
//! [24 bytes: header][chunk 0][chunk 1]...[chunk N (tag FINAL)]
//! chunk = encrypted block (≤ block_length bytes) + 17 bytes overhead
//! ```
//!
//! Chunk boundaries are not written to the wire. The decoder must use the
//! same block length as the encoder; any other length puts the boundaries in
//! the wrong place and the first misaligned chunk fails authentication.
//!
//! - [`EncryptStream`] / [`DecryptStream`] buffer arbitrary writes and reads
//!   into fixed-size blocks.
//! - [`BlockEncryptor`] / [`BlockDecryptor`] map every call to exactly one
//!   chunk, with optional per-chunk associated data.

mod block;
mod decrypt;
mod encrypt;

pub use block::{BlockDecryptor, BlockEncryptor};
pub use decrypt::DecryptStream;
pub use encrypt::EncryptStream;

use std::io::{self, Read};

use xchacha_core::{XChaChaError, XChaChaResult};

use crate::state::Header;
use crate::HEADER_SIZE;

/// Lifecycle of a stream instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    /// Encrypt side: FINAL pushed. Decrypt side: FINAL pulled.
    Finalized,
    /// A protocol or I/O failure left the cipher state unusable.
    Poisoned,
}

/// Fill `buf` from `reader` until it is full or the reader reports EOF.
/// Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read exactly one stream header. A short read is a corrupt header.
fn read_header<R: Read>(reader: &mut R) -> XChaChaResult<Header> {
    let mut header: Header = [0u8; HEADER_SIZE];
    let n = read_full(reader, &mut header)?;
    if n < HEADER_SIZE {
        tracing::debug!(read = n, "stream header truncated");
        return Err(XChaChaError::CorruptHeader);
    }
    Ok(header)
}
