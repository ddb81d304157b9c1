//! Compression stage.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

use super::PipelineError;

/// Byte-level compression.
pub trait Compression: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Compress `bytes`.
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError>;

    /// Reverse [`compress`](Compression::compress).
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError>;
}

/// Pass-through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Compression for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        Ok(bytes.to_vec())
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        Ok(bytes.to_vec())
    }
}

/// Gzip via flate2.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompression {
    level: u32,
}

impl GzipCompression {
    /// Gzip at `level` (0-9, clamped).
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }

    /// Configured level.
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for GzipCompression {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Compression for GzipCompression {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder.write_all(bytes).map_err(PipelineError::Compression)?;
        encoder.finish().map_err(PipelineError::Compression)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(PipelineError::Decompression)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_shrinks_repetitive_input() {
        let input = vec![b'a'; 4096];
        let gz = GzipCompression::default();
        let packed = gz.compress(&input).unwrap();
        assert!(packed.len() < input.len());
        assert_eq!(gz.decompress(&packed).unwrap(), input);
    }

    #[test]
    fn test_malformed_stream_is_an_error() {
        let gz = GzipCompression::default();
        assert!(matches!(
            gz.decompress(b"definitely not gzip"),
            Err(PipelineError::Decompression(_))
        ));
    }

    #[test]
    fn test_level_is_clamped() {
        assert_eq!(GzipCompression::new(42).level(), 9);
    }
}
