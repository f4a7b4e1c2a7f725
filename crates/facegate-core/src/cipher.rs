//! AES-256-GCM encryption of face descriptors.
//!
//! The only form of a descriptor that leaves process memory is the blob
//! produced here: 12-byte random nonce || ciphertext || 16-byte GCM tag.
//! Error messages are static; they never carry descriptor bytes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{EncryptedDescriptor, FaceDescriptor};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    #[error("descriptor encryption failed")]
    EncryptionFailed,
    #[error("descriptor decryption failed: key mismatch or tampered data")]
    DecryptionFailed,
    #[error("invalid descriptor blob size: {0} bytes")]
    InvalidBlob(usize),
}

/// Symmetric cipher for descriptors under one application-level key.
#[derive(Clone)]
pub struct DescriptorCipher {
    key: [u8; 32],
}

impl DescriptorCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the 256-bit key from an application secret with SHA-256.
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    pub fn encrypt(&self, descriptor: &FaceDescriptor) -> Result<EncryptedDescriptor, CipherError> {
        let plaintext = descriptor_to_bytes(descriptor.values());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(EncryptedDescriptor::from_bytes(blob))
    }

    /// Decrypt to raw descriptor values. Shape validation happens in
    /// [`crate::descriptor`].
    pub(crate) fn decrypt_values(
        &self,
        encrypted: &EncryptedDescriptor,
    ) -> Result<Vec<f32>, CipherError> {
        let blob = encrypted.as_bytes();
        if blob.len() <= NONCE_LEN + TAG_LEN {
            return Err(CipherError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)?;

        if plaintext.len() % 4 != 0 {
            return Err(CipherError::DecryptionFailed);
        }
        Ok(bytes_to_values(&plaintext))
    }
}

fn descriptor_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_values(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> FaceDescriptor {
        FaceDescriptor::from_validated((0..136).map(|i| i as f32 / 136.0).collect())
    }

    #[test]
    fn value_byte_fidelity() {
        let values = vec![0.0f32, -0.0, 1.0, -1.0, f32::MIN_POSITIVE, std::f32::consts::PI];
        let recovered = bytes_to_values(&descriptor_to_bytes(&values));
        for (orig, rec) in values.iter().zip(recovered.iter()) {
            assert_eq!(orig.to_bits(), rec.to_bits());
        }
    }

    #[test]
    fn nonce_is_fresh_per_encryption() {
        let cipher = DescriptorCipher::from_secret("test-secret");
        let a = cipher.encrypt(&descriptor()).unwrap();
        let b = cipher.encrypt(&descriptor()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), NONCE_LEN + 136 * 4 + TAG_LEN);
    }

    #[test]
    fn wrong_key_fails() {
        let blob = DescriptorCipher::new([1u8; 32]).encrypt(&descriptor()).unwrap();
        let err = DescriptorCipher::new([2u8; 32]).decrypt_values(&blob).unwrap_err();
        assert_eq!(err, CipherError::DecryptionFailed);
    }

    #[test]
    fn truncated_blob_rejected() {
        let cipher = DescriptorCipher::new([7u8; 32]);
        let blob = EncryptedDescriptor::from_bytes(vec![0u8; 20]);
        assert_eq!(cipher.decrypt_values(&blob).unwrap_err(), CipherError::InvalidBlob(20));
    }

    #[test]
    fn secret_derivation_is_stable() {
        let a = DescriptorCipher::from_secret("s");
        let b = DescriptorCipher::from_secret("s");
        assert_eq!(a.key, b.key);
        assert_ne!(a.key, DescriptorCipher::from_secret("t").key);
    }
}
