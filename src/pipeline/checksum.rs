//! Checksum stage.
//!
//! Computed over the final (encrypted) bytes and stored in the metadata file,
//! never in the payload. Verification happens before anything is decrypted.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use xxhash_rust::xxh64::xxh64;

use super::PipelineError;

/// Integrity checksum over payload bytes.
pub trait Checksum: Send + Sync {
    /// Algorithm name recorded in the metadata.
    fn algorithm(&self) -> &'static str;

    /// Hex checksum of `bytes`.
    fn compute(&self, bytes: &[u8]) -> String;

    /// Check `bytes` against a stored checksum.
    fn verify(&self, bytes: &[u8], expected: &str) -> Result<(), PipelineError> {
        let actual = self.compute(bytes);
        if constant_time_eq(actual.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(PipelineError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Fast non-cryptographic xxh64.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh64Checksum;

impl Checksum for Xxh64Checksum {
    fn algorithm(&self) -> &'static str {
        "xxh64"
    }

    fn compute(&self, bytes: &[u8]) -> String {
        format!("{:016x}", xxh64(bytes, 0))
    }
}

/// SHA-256 digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Checksum;

impl Checksum for Sha256Checksum {
    fn algorithm(&self) -> &'static str {
        "sha256"
    }

    fn compute(&self, bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }
}

/// Keyed HMAC-SHA-256; detects tampering by anyone without the key.
#[derive(Clone)]
pub struct HmacSha256Checksum {
    mac: Hmac<Sha256>,
}

impl HmacSha256Checksum {
    /// Create a keyed checksum.
    pub fn new(key: &[u8]) -> Result<Self, PipelineError> {
        let mac = Hmac::<Sha256>::new_from_slice(key)
            .map_err(|e| PipelineError::Checksum(e.to_string()))?;
        Ok(Self { mac })
    }
}

impl Checksum for HmacSha256Checksum {
    fn algorithm(&self) -> &'static str {
        "hmac-sha256"
    }

    fn compute(&self, bytes: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(bytes);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for HmacSha256Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HmacSha256Checksum")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            Sha256Checksum.compute(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_xxh64_is_fixed_width() {
        assert_eq!(Xxh64Checksum.compute(b"").len(), 16);
        assert_eq!(Xxh64Checksum.compute(b"payload"), Xxh64Checksum.compute(b"payload"));
    }

    #[test]
    fn test_verify_detects_single_byte_flip() {
        for checksum in [
            Box::new(Xxh64Checksum) as Box<dyn Checksum>,
            Box::new(Sha256Checksum),
            Box::new(HmacSha256Checksum::new(b"k").unwrap()),
        ] {
            let mut bytes = b"persisted payload".to_vec();
            let stored = checksum.compute(&bytes);
            assert!(checksum.verify(&bytes, &stored).is_ok());

            bytes[3] ^= 0x01;
            assert!(matches!(
                checksum.verify(&bytes, &stored),
                Err(PipelineError::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_hmac_depends_on_key() {
        let a = HmacSha256Checksum::new(b"key-a").unwrap();
        let b = HmacSha256Checksum::new(b"key-b").unwrap();
        assert_ne!(a.compute(b"data"), b.compute(b"data"));
    }
}
