//! Encryption stage.
//!
//! Symmetric AES-CBC with PKCS#7 padding and a caller-supplied key and IV.
//! The key length selects AES-128, AES-192 or AES-256.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::PipelineError;

/// AES block (and IV) size in bytes.
pub const AES_IV_LEN: usize = 16;

/// Byte-level symmetric encryption.
pub trait Encryption: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Encrypt `bytes`.
    fn encrypt(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError>;

    /// Reverse [`encrypt`](Encryption::encrypt).
    fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError>;
}

/// Pass-through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEncryption;

impl Encryption for NoEncryption {
    fn name(&self) -> &'static str {
        "none"
    }

    fn encrypt(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        Ok(bytes.to_vec())
    }

    fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        Ok(bytes.to_vec())
    }
}

/// AES-CBC with PKCS#7 padding.
#[derive(Clone)]
pub struct AesCbcEncryption {
    key: Vec<u8>,
    iv: [u8; AES_IV_LEN],
}

impl AesCbcEncryption {
    /// Create the stage. `key` must be 16, 24 or 32 bytes; `iv` 16 bytes.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, PipelineError> {
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(PipelineError::Encryption(format!(
                "AES key must be 16, 24 or 32 bytes, got {}",
                key.len()
            )));
        }
        let iv: [u8; AES_IV_LEN] = iv.try_into().map_err(|_| {
            PipelineError::Encryption(format!("AES IV must be {} bytes, got {}", AES_IV_LEN, iv.len()))
        })?;
        Ok(Self {
            key: key.to_vec(),
            iv,
        })
    }

    fn key_error(e: impl std::fmt::Display) -> PipelineError {
        PipelineError::Encryption(e.to_string())
    }
}

impl Encryption for AesCbcEncryption {
    fn name(&self) -> &'static str {
        match self.key.len() {
            16 => "aes-128-cbc",
            24 => "aes-192-cbc",
            _ => "aes-256-cbc",
        }
    }

    fn encrypt(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let out = match self.key.len() {
            16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(&self.key, &self.iv)
                .map_err(Self::key_error)?
                .encrypt_padded_vec_mut::<Pkcs7>(bytes),
            24 => cbc::Encryptor::<aes::Aes192>::new_from_slices(&self.key, &self.iv)
                .map_err(Self::key_error)?
                .encrypt_padded_vec_mut::<Pkcs7>(bytes),
            _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(&self.key, &self.iv)
                .map_err(Self::key_error)?
                .encrypt_padded_vec_mut::<Pkcs7>(bytes),
        };
        Ok(out)
    }

    fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let unpadded = match self.key.len() {
            16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(&self.key, &self.iv)
                .map_err(Self::key_error)?
                .decrypt_padded_vec_mut::<Pkcs7>(bytes),
            24 => cbc::Decryptor::<aes::Aes192>::new_from_slices(&self.key, &self.iv)
                .map_err(Self::key_error)?
                .decrypt_padded_vec_mut::<Pkcs7>(bytes),
            _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(&self.key, &self.iv)
                .map_err(Self::key_error)?
                .decrypt_padded_vec_mut::<Pkcs7>(bytes),
        };
        unpadded.map_err(|_| PipelineError::Decryption("invalid padding (wrong key or IV?)".to_string()))
    }
}

impl std::fmt::Debug for AesCbcEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCbcEncryption")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}
