//! AES-256-GCM primitives.

use crate::error::{CoreError, CoreResult};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// HKDF info string binding derived keys to this format.
const KEY_INFO: &[u8] = b"emberdb-line-key-v1";

/// AES-256 key, zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from exactly 32 raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKeySize`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CoreError::invalid_key_size(bytes.len(), KEY_SIZE))?;
        Ok(Self { bytes })
    }

    /// Returns the raw key. Never log the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key with HKDF-SHA256.
    ///
    /// HKDF does not slow down guessing, so `password` must already carry
    /// enough entropy (a generated passphrase, not a user password).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EncryptionFailed`] if expansion fails.
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> CoreResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), password);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(KEY_INFO, &mut bytes)
            .map_err(|_| CoreError::encryption_failed("key derivation failed"))?;
        Ok(Self { bytes })
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts byte strings as `nonce || ciphertext || tag`.
pub struct CryptoManager {
    cipher: Aes256Gcm,
}

impl CryptoManager {
    /// Creates a manager for `key`.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EncryptionFailed`] if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CoreError::encryption_failed("AES-GCM encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend(sealed);
        Ok(out)
    }

    /// Decrypts the output of [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] for truncated input, a wrong
    /// key or tampered data.
    pub fn decrypt(&self, sealed: &[u8]) -> CoreResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::decryption_failed("ciphertext too short"));
        }
        let (nonce, body) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CoreError::decryption_failed("authentication failed"))
    }
}

impl fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoManager")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        assert_ne!(
            EncryptionKey::generate().as_bytes(),
            EncryptionKey::generate().as_bytes()
        );
    }

    #[test]
    fn key_size_checked() {
        assert!(EncryptionKey::from_bytes(&[7u8; KEY_SIZE]).is_ok());
        let err = EncryptionKey::from_bytes(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidKeySize { expected: 32, actual: 16 }));
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = EncryptionKey::derive_from_password(b"correct horse", b"people.db").unwrap();
        let b = EncryptionKey::derive_from_password(b"correct horse", b"people.db").unwrap();
        let c = EncryptionKey::derive_from_password(b"correct horse", b"pets.db").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn sealing_roundtrip_and_tamper() {
        let manager = CryptoManager::new(&EncryptionKey::generate());
        let sealed = manager.encrypt(b"{\"_id\":\"a\"}").unwrap();
        assert_ne!(sealed, manager.encrypt(b"{\"_id\":\"a\"}").unwrap());
        assert_eq!(manager.decrypt(&sealed).unwrap(), b"{\"_id\":\"a\"}");

        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(manager.decrypt(&tampered).is_err());
        assert!(manager.decrypt(&sealed[..NONCE_SIZE]).is_err());

        let other = CryptoManager::new(&EncryptionKey::generate());
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let rendered = format!("{:?}", EncryptionKey::from_bytes(&[0xAB; KEY_SIZE]).unwrap());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("171"));
    }
}
