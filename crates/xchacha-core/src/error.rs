use std::io;

use thiserror::Error;

pub type XChaChaResult<T> = Result<T, XChaChaError>;

/// Broad failure classes. Callers branch on these rather than on variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid arguments, rejected before any key material is touched.
    Usage,
    /// Corrupt, forged, truncated or otherwise unauthenticated input.
    Protocol,
    /// The primitive refused to operate; the security guarantee cannot be met.
    Fatal,
    /// Underlying transport or configuration failure.
    Io,
}

#[derive(Debug, Error)]
pub enum XChaChaError {
    #[error("invalid key length: {actual} bytes (expected {expected})")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("nonce is empty")]
    EmptyNonce,

    #[error("invalid nonce length: {actual} bytes (expected {expected})")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("output buffer too small: {actual} bytes (need {needed})")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("message too long: {len} bytes (maximum {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("invalid block length {len} (must be between 1 and {max})")]
    InvalidBlockLength { len: usize, max: usize },

    #[error("{construction} does not authenticate associated data")]
    AssociatedDataUnsupported { construction: &'static str },

    #[error("key has been disposed")]
    KeyDisposed,

    #[error("stream already finalized")]
    StreamFinalized,

    #[error("stream aborted by an earlier error")]
    StreamPoisoned,

    #[error("invalid or corrupt stream header")]
    CorruptHeader,

    #[error("block is invalid or corrupt")]
    CorruptBlock,

    #[error("decryption failed")]
    AuthenticationFailed,

    #[error("stream ended without a final block")]
    Truncated,

    #[error("data found after the final block")]
    TrailingData,

    #[error("cipher primitive failure: {0}")]
    PrimitiveFailure(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl XChaChaError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidKeyLength { .. }
            | Self::EmptyNonce
            | Self::InvalidNonceLength { .. }
            | Self::BufferTooSmall { .. }
            | Self::MessageTooLong { .. }
            | Self::InvalidBlockLength { .. }
            | Self::AssociatedDataUnsupported { .. }
            | Self::KeyDisposed
            | Self::StreamFinalized
            | Self::StreamPoisoned => ErrorClass::Usage,
            Self::CorruptHeader
            | Self::CorruptBlock
            | Self::AuthenticationFailed
            | Self::Truncated
            | Self::TrailingData => ErrorClass::Protocol,
            Self::PrimitiveFailure(_) => ErrorClass::Fatal,
            Self::Config(_) | Self::Io(_) | Self::Other(_) => ErrorClass::Io,
        }
    }

    /// True for the single "decryption failed" outcome: a header, block or
    /// one-shot ciphertext that did not authenticate.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::CorruptHeader | Self::CorruptBlock | Self::AuthenticationFailed
        )
    }

    /// Recover the crate error carried inside an `io::Error` produced by a
    /// stream's `Read`/`Write` impl.
    pub fn from_io(err: &io::Error) -> Option<&XChaChaError> {
        err.get_ref()?.downcast_ref::<XChaChaError>()
    }
}

impl From<XChaChaError> for io::Error {
    fn from(err: XChaChaError) -> Self {
        match err {
            XChaChaError::Io(inner) => inner,
            other => {
                let kind = match other.class() {
                    ErrorClass::Usage => io::ErrorKind::InvalidInput,
                    _ => io::ErrorKind::InvalidData,
                };
                io::Error::new(kind, other)
            }
        }
    }
}
