//! Persistence pipeline.
//!
//! Writes run the stages forward and reads run them in reverse:
//!
//! ```text
//! write:  value → encode → compress → encrypt → checksum(bytes)
//! read:   verify(bytes) → decrypt → decompress → decode → value
//! ```
//!
//! The checksum covers the final bytes and travels in the metadata file,
//! so a corrupted payload is rejected before any stage touches it.
//! Stages are independent: any compression composes with any encryption.

pub mod checksum;
pub mod compression;
pub mod encryption;
pub mod format;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

pub use checksum::{Checksum, HmacSha256Checksum, Sha256Checksum, Xxh64Checksum};
pub use compression::{Compression, GzipCompression, NoCompression};
pub use encryption::{AesCbcEncryption, Encryption, NoEncryption, AES_IV_LEN};
pub use format::DataFormat;

use crate::config::{
    ChecksumConfig, CompressionConfig, ConfigError, EncryptionConfig, PersistenceConfig,
};

/// Stage failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Value could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the requested type.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Compressor failed.
    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    /// Decompressor rejected the stream.
    #[error("decompression failed: {0}")]
    Decompression(#[source] std::io::Error),

    /// Cipher setup or encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Ciphertext could not be decrypted.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Checksum stage could not be built.
    #[error("checksum setup failed: {0}")]
    Checksum(String),

    /// Stored checksum does not match the bytes.
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Checksum recorded in the metadata.
        expected: String,
        /// Checksum of the bytes read.
        actual: String,
    },

    /// File was sealed with a different checksum algorithm.
    #[error("checksum algorithm mismatch: configured {configured}, recorded {recorded}")]
    ChecksumAlgorithmMismatch {
        /// Algorithm of this pipeline.
        configured: String,
        /// Algorithm named in the metadata.
        recorded: String,
    },
}

impl PipelineError {
    /// Whether this error means the stored bytes failed verification.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            PipelineError::ChecksumMismatch { .. } | PipelineError::ChecksumAlgorithmMismatch { .. }
        )
    }
}

/// Output of a write: the bytes to store and their checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Final encrypted bytes.
    pub bytes: Vec<u8>,
    /// Checksum over `bytes`.
    pub checksum: String,
    /// Algorithm that produced `checksum`.
    pub algorithm: String,
}

/// Configured chain of format, compression, encryption and checksum.
#[derive(Clone)]
pub struct Pipeline {
    format: DataFormat,
    compression: Arc<dyn Compression>,
    encryption: Arc<dyn Encryption>,
    checksum: Arc<dyn Checksum>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            format: DataFormat::Json,
            compression: Arc::new(NoCompression),
            encryption: Arc::new(NoEncryption),
            checksum: Arc::new(Xxh64Checksum),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("format", &self.format)
            .field("compression", &self.compression.name())
            .field("encryption", &self.encryption.name())
            .field("checksum", &self.checksum.algorithm())
            .finish()
    }
}

impl Pipeline {
    /// JSON, no compression, no encryption, xxh64.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the pipeline a config describes.
    pub fn from_config(config: &PersistenceConfig) -> Result<Self, ConfigError> {
        let compression: Arc<dyn Compression> = match config.compression {
            CompressionConfig::None => Arc::new(NoCompression),
            CompressionConfig::Gzip { level } => {
                if level > 9 {
                    return Err(ConfigError::Invalid(format!("gzip level {} out of range 0-9", level)));
                }
                Arc::new(GzipCompression::new(level))
            }
        };

        let encryption: Arc<dyn Encryption> = match &config.encryption {
            EncryptionConfig::None => Arc::new(NoEncryption),
            EncryptionConfig::AesCbc { key_hex, iv_hex } => {
                let key = decode_hex("AES key", key_hex)?;
                let iv = decode_hex("AES IV", iv_hex)?;
                Arc::new(AesCbcEncryption::new(&key, &iv).map_err(|e| ConfigError::Invalid(e.to_string()))?)
            }
        };

        let checksum: Arc<dyn Checksum> = match &config.checksum {
            ChecksumConfig::Xxh64 => Arc::new(Xxh64Checksum),
            ChecksumConfig::Sha256 => Arc::new(Sha256Checksum),
            ChecksumConfig::HmacSha256 { key_hex } => {
                let key = decode_hex("HMAC key", key_hex)?;
                if key.is_empty() {
                    return Err(ConfigError::Invalid("HMAC key must not be empty".to_string()));
                }
                Arc::new(HmacSha256Checksum::new(&key).map_err(|e| ConfigError::Invalid(e.to_string()))?)
            }
        };

        Ok(Self {
            format: config.format,
            compression,
            encryption,
            checksum,
        })
    }

    /// Replace the data format.
    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    /// Replace the compression stage.
    pub fn with_compression(mut self, compression: impl Compression + 'static) -> Self {
        self.compression = Arc::new(compression);
        self
    }

    /// Replace the encryption stage.
    pub fn with_encryption(mut self, encryption: impl Encryption + 'static) -> Self {
        self.encryption = Arc::new(encryption);
        self
    }

    /// Replace the checksum stage.
    pub fn with_checksum(mut self, checksum: impl Checksum + 'static) -> Self {
        self.checksum = Arc::new(checksum);
        self
    }

    /// Configured data format.
    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// Name of the configured checksum algorithm.
    pub fn checksum_algorithm(&self) -> &'static str {
        self.checksum.algorithm()
    }

    /// Encode and seal `value`.
    pub fn write<T: Serialize>(&self, value: &T) -> Result<SealedPayload, PipelineError> {
        let encoded = self.format.encode(value)?;
        self.seal(&encoded)
    }

    /// Verify, open and decode bytes sealed by [`write`](Pipeline::write).
    pub fn read<T: DeserializeOwned>(&self, bytes: &[u8], expected: &str, algorithm: &str) -> Result<T, PipelineError> {
        let plain = self.open(bytes, expected, algorithm)?;
        self.format.decode(&plain)
    }

    /// Compress, encrypt and checksum already-encoded bytes.
    pub fn seal(&self, encoded: &[u8]) -> Result<SealedPayload, PipelineError> {
        let compressed = self.compression.compress(encoded)?;
        let bytes = self.encryption.encrypt(&compressed)?;
        let checksum = self.checksum.compute(&bytes);

        debug!(
            encoded = encoded.len(),
            compressed = compressed.len(),
            sealed = bytes.len(),
            compression = self.compression.name(),
            encryption = self.encryption.name(),
            "payload sealed"
        );
        Ok(SealedPayload {
            bytes,
            checksum,
            algorithm: self.checksum.algorithm().to_string(),
        })
    }

    /// Verify then decrypt and decompress; returns encoded bytes.
    pub fn open(&self, bytes: &[u8], expected: &str, algorithm: &str) -> Result<Vec<u8>, PipelineError> {
        self.verify(bytes, expected, algorithm)?;
        let compressed = self.encryption.decrypt(bytes)?;
        self.compression.decompress(&compressed)
    }

    /// Checksum gate only.
    pub fn verify(&self, bytes: &[u8], expected: &str, algorithm: &str) -> Result<(), PipelineError> {
        if algorithm != self.checksum.algorithm() {
            return Err(PipelineError::ChecksumAlgorithmMismatch {
                configured: self.checksum.algorithm().to_string(),
                recorded: algorithm.to_string(),
            });
        }
        self.checksum.verify(bytes, expected)
    }
}

fn decode_hex(what: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
    hex::decode(value.trim()).map_err(|e| ConfigError::Invalid(format!("{} is not valid hex: {}", what, e)))
}
