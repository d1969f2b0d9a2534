//! Line transform encrypting every stored line.

use super::cipher::{CryptoManager, EncryptionKey};
use crate::error::{CoreError, CoreResult};
use crate::persistence::LineTransform;
use std::fmt;

/// Stores each line as the lowercase hex of its AES-256-GCM sealing.
///
/// Hex output never contains a newline, and a line that fails to decrypt
/// is reported as an error so loading counts it as corrupt.
pub struct EncryptedTransform {
    manager: CryptoManager,
}

impl EncryptedTransform {
    /// Creates a transform for `key`.
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        Self {
            manager: CryptoManager::new(&key),
        }
    }
}

impl fmt::Debug for EncryptedTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedTransform").finish_non_exhaustive()
    }
}

impl LineTransform for EncryptedTransform {
    fn after_serialization(&self, line: &str) -> CoreResult<String> {
        Ok(to_hex(&self.manager.encrypt(line.as_bytes())?))
    }

    fn before_deserialization(&self, line: &str) -> CoreResult<String> {
        let plain = self.manager.decrypt(&from_hex(line)?)?;
        String::from_utf8(plain)
            .map_err(|_| CoreError::decryption_failed("decrypted line is not UTF-8"))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(DIGITS[usize::from(byte >> 4)]));
        out.push(char::from(DIGITS[usize::from(byte & 0x0f)]));
    }
    out
}

fn from_hex(text: &str) -> CoreResult<Vec<u8>> {
    fn nibble(c: u8) -> CoreResult<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(CoreError::decryption_failed("stored line is not hex")),
        }
    }
    let bytes = text.as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(CoreError::decryption_failed("stored line has odd length"));
    }
    bytes
        .chunks_exact(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}
