//! Persistence configuration.
//!
//! ## Environment
//!
//! - `PERSIST_VERSION`: writer/reader version (default: 1.0.0)
//! - `PERSIST_FORMAT`: `json`, `pretty_json` or `msgpack` (default: json)
//! - `PERSIST_COMPRESSION`: `none`, `gzip` or `gzip:<level>` (default: none)
//! - `PERSIST_AES_KEY` / `PERSIST_AES_IV`: hex key (16, 24 or 32 bytes) and
//!   16-byte IV; both set enables AES-CBC
//! - `PERSIST_CHECKSUM`: `xxh64`, `sha256` or `hmac_sha256` (default: xxh64)
//! - `PERSIST_HMAC_KEY`: hex key, required for `hmac_sha256`
//!
//! Unparsable non-secret values fall back to their default with a warning.
//! Incomplete crypto settings are errors: silently saving in the clear
//! would be worse than not saving.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::DataFormat;
use crate::types::SemVer;

/// Default gzip level.
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required setting is absent.
    #[error("missing configuration: {0}")]
    Missing(String),

    /// A setting is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Compression stage selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompressionConfig {
    /// No compression.
    #[default]
    None,
    /// Gzip at `level` 0-9.
    Gzip {
        /// Compression level.
        level: u32,
    },
}

/// Encryption stage selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncryptionConfig {
    /// No encryption.
    #[default]
    None,
    /// AES-CBC; key length picks AES-128/192/256.
    AesCbc {
        /// Hex-encoded key.
        key_hex: String,
        /// Hex-encoded 16-byte IV.
        iv_hex: String,
    },
}

/// Checksum stage selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChecksumConfig {
    /// xxh64.
    #[default]
    Xxh64,
    /// SHA-256.
    Sha256,
    /// Keyed HMAC-SHA-256.
    HmacSha256 {
        /// Hex-encoded key.
        key_hex: String,
    },
}

/// Everything needed to build a [`Pipeline`](crate::pipeline::Pipeline) and
/// gate versions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Version written to metadata and required on read.
    pub version: SemVer,
    /// Data file format.
    pub format: DataFormat,
    /// Compression stage.
    pub compression: CompressionConfig,
    /// Encryption stage.
    pub encryption: EncryptionConfig,
    /// Checksum stage.
    pub checksum: ChecksumConfig,
}

impl PersistenceConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key → value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("PERSIST_VERSION") {
            match raw.parse() {
                Ok(version) => config.version = version,
                Err(e) => warn!(value = %raw, error = %e, "PERSIST_VERSION invalid, using default"),
            }
        }

        if let Some(raw) = lookup("PERSIST_FORMAT") {
            match raw.parse() {
                Ok(format) => config.format = format,
                Err(e) => warn!(value = %raw, error = %e, "PERSIST_FORMAT invalid, using json"),
            }
        }

        if let Some(raw) = lookup("PERSIST_COMPRESSION") {
            match parse_compression(&raw) {
                Some(compression) => config.compression = compression,
                None => warn!(value = %raw, "PERSIST_COMPRESSION invalid, compression disabled"),
            }
        }

        config.encryption = match (lookup("PERSIST_AES_KEY"), lookup("PERSIST_AES_IV")) {
            (Some(key_hex), Some(iv_hex)) => EncryptionConfig::AesCbc { key_hex, iv_hex },
            (None, None) => EncryptionConfig::None,
            (Some(_), None) => return Err(ConfigError::Missing("PERSIST_AES_IV".to_string())),
            (None, Some(_)) => return Err(ConfigError::Missing("PERSIST_AES_KEY".to_string())),
        };

        let checksum = lookup("PERSIST_CHECKSUM").map(|s| s.trim().to_ascii_lowercase());
        config.checksum = match checksum.as_deref() {
            None | Some("xxh64") => ChecksumConfig::Xxh64,
            Some("sha256") => ChecksumConfig::Sha256,
            Some("hmac_sha256") | Some("hmac-sha256") => match lookup("PERSIST_HMAC_KEY") {
                Some(key_hex) => ChecksumConfig::HmacSha256 { key_hex },
                None => return Err(ConfigError::Missing("PERSIST_HMAC_KEY".to_string())),
            },
            Some(other) => return Err(ConfigError::Invalid(format!("unknown checksum '{}'", other))),
        };

        Ok(config)
    }
}

fn parse_compression(raw: &str) -> Option<CompressionConfig> {
    let raw = raw.trim().to_ascii_lowercase();
    match raw.split_once(':') {
        None if raw == "none" => Some(CompressionConfig::None),
        None if raw == "gzip" => Some(CompressionConfig::Gzip {
            level: DEFAULT_GZIP_LEVEL,
        }),
        Some(("gzip", level)) => level
            .parse()
            .ok()
            .filter(|l| *l <= 9)
            .map(|level| CompressionConfig::Gzip { level }),
        _ => None,
    }
}
