//! xchacha-core: shared error taxonomy and stream configuration
//!
//! - `error`: the crate-wide `XChaChaError` and its usage/protocol/fatal/io classes
//! - `config`: `StreamConfig` (block length, buffer pool), loadable from TOML

pub mod config;
pub mod error;

pub use config::{PoolConfig, StreamConfig, DEFAULT_BLOCK_LENGTH, MAX_BLOCK_LENGTH};
pub use error::{ErrorClass, XChaChaError, XChaChaResult};
