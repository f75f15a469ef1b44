use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{XChaChaError, XChaChaResult};

/// Default plaintext block length: 128 KiB
pub const DEFAULT_BLOCK_LENGTH: usize = 128 * 1024;

/// Largest block length a stream accepts: 64 MiB
pub const MAX_BLOCK_LENGTH: usize = 64 * 1024 * 1024;

/// Stream configuration (loadable from a TOML file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Plaintext bytes per encrypted block (default: 131072).
    ///
    /// Block boundaries are not recorded on the wire: a stream must be
    /// decrypted with the block length it was encrypted with.
    pub block_length: usize,
    /// Scratch buffer pool settings
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle buffers kept for reuse (default: 8)
    pub max_retained: usize,
    /// Buffers larger than this are freed instead of pooled (default: 4 MiB)
    pub max_buffer_len: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            block_length: DEFAULT_BLOCK_LENGTH,
            pool: PoolConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retained: 8,
            max_buffer_len: 4 * 1024 * 1024,
        }
    }
}

impl StreamConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> XChaChaResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| XChaChaError::Config(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> XChaChaResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> XChaChaResult<()> {
        validate_block_length(self.block_length)
    }
}

/// Check that `len` is a usable block length.
pub fn validate_block_length(len: usize) -> XChaChaResult<()> {
    if len == 0 || len > MAX_BLOCK_LENGTH {
        return Err(XChaChaError::InvalidBlockLength {
            len,
            max: MAX_BLOCK_LENGTH,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
block_length = 65536

[pool]
max_retained = 2
max_buffer_len = 1048576
"#;
        let config = StreamConfig::from_toml_str(toml_str).unwrap();

        assert_eq!(config.block_length, 65536);
        assert_eq!(config.pool.max_retained, 2);
        assert_eq!(config.pool.max_buffer_len, 1048576);
    }

    #[test]
    fn test_parse_defaults() {
        let config = StreamConfig::from_toml_str("").unwrap();

        assert_eq!(config.block_length, DEFAULT_BLOCK_LENGTH);
        assert_eq!(config.pool.max_retained, 8);
        assert_eq!(config.pool.max_buffer_len, 4 * 1024 * 1024);
    }

    #[test]
    fn test_parse_partial_config() {
        let config = StreamConfig::from_toml_str("[pool]\nmax_retained = 0\n").unwrap();

        // Overridden
        assert_eq!(config.pool.max_retained, 0);
        // Defaults
        assert_eq!(config.block_length, DEFAULT_BLOCK_LENGTH);
        assert_eq!(config.pool.max_buffer_len, 4 * 1024 * 1024);
    }

    #[test]
    fn test_rejects_zero_block_length() {
        let err = StreamConfig::from_toml_str("block_length = 0").unwrap_err();
        assert!(matches!(err, XChaChaError::InvalidBlockLength { len: 0, .. }));
    }

    #[test]
    fn test_rejects_oversized_block_length() {
        let toml_str = format!("block_length = {}", MAX_BLOCK_LENGTH + 1);
        assert!(StreamConfig::from_toml_str(&toml_str).is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = StreamConfig::from_toml_str("block_length = \"big\"").unwrap_err();
        assert!(matches!(err, XChaChaError::Config(_)));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = StreamConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = StreamConfig::from_toml_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = StreamConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, StreamConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stream.toml");
        std::fs::write(&path, "block_length = 4096\n").unwrap();

        let config = StreamConfig::load(&path).unwrap();
        assert_eq!(config.block_length, 4096);
    }
}
