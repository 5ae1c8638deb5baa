//! AES-256-GCM encryption and decryption for locker passwords and the PIN.
//!
//! One deployment-wide key, taken from configuration. Key bytes are the
//! SHA-256 digest of the configured passphrase; there is no salt and no
//! per-user key material. Each value is encrypted under a fresh random
//! 96-bit nonce, and the transport form is base64 of
//! `nonce(12) || ciphertext || auth_tag(16)`.

use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Nonce length in bytes (96-bit GCM nonce)
const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes
const TAG_LEN: usize = 16;

/// The deployment-wide string cipher.
///
/// Both locker passwords and the PIN record go through this one key.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
}

impl Cipher {
    /// Build the cipher from the configured passphrase.
    ///
    /// An empty passphrase is a configuration error and is rejected here,
    /// at startup, never at encrypt/decrypt time.
    pub fn new(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(CryptoError::EmptyKey);
        }

        let digest = Sha256::digest(passphrase.as_bytes());
        Ok(Self { key: digest.into() })
    }

    /// Encrypt a string value for storage.
    ///
    /// Each call uses a fresh random nonce, so two encryptions of the same
    /// plaintext produce different ciphertexts. Empty plaintext is legal.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(&self.key.into());

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let nonce_bytes: [u8; NONCE_LEN] = nonce.into();

        // AES-GCM appends the auth tag to the ciphertext
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(raw))
    }

    /// Decrypt a stored string value.
    ///
    /// Fails with [`CryptoError::DecryptionFailed`] on malformed input and
    /// [`CryptoError::AuthenticationFailed`] on a key mismatch or tampered
    /// ciphertext. Callers treat any failure as "could not recover value"
    /// and degrade rather than crash.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let raw = BASE64
            .decode(ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid base64: {}", e)))?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::DecryptionFailed(
                "ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, body) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new(&self.key.into());
        let plaintext = cipher
            .decrypt(nonce, body)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::DecryptionFailed("invalid UTF-8".to_string()))
    }
}

impl Drop for Cipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(Cipher::new(""), Err(CryptoError::EmptyKey)));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = Cipher::new("test_key").unwrap();
        let plaintext = "Hello, World! This is a test.";

        let encrypted = cipher.encrypt(plaintext).unwrap();
        let decrypted = cipher.decrypt(&encrypted).unwrap();

        assert_eq!(plaintext, decrypted);
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cipher = Cipher::new("test_key").unwrap();

        let encrypted = cipher.encrypt("").unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "");
    }

    #[test]
    fn test_unicode_roundtrip() {
        let cipher = Cipher::new("test_key").unwrap();
        let plaintext = "pässwörd ロッカー 🔐";

        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_different_nonces() {
        let cipher = Cipher::new("test_key").unwrap();
        let plaintext = "Same data";

        let encrypted1 = cipher.encrypt(plaintext).unwrap();
        let encrypted2 = cipher.encrypt(plaintext).unwrap();

        // Ciphertexts differ because each call draws a fresh nonce
        assert_ne!(encrypted1, encrypted2);

        // But both decrypt to the same plaintext
        assert_eq!(cipher.decrypt(&encrypted1).unwrap(), plaintext);
        assert_eq!(cipher.decrypt(&encrypted2).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher1 = Cipher::new("key_one").unwrap();
        let cipher2 = Cipher::new("key_two").unwrap();

        let encrypted = cipher1.encrypt("Secret data").unwrap();

        // Never silently returns the correct plaintext under the wrong key
        assert!(matches!(
            cipher2.decrypt(&encrypted),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampering_detected() {
        let cipher = Cipher::new("test_key").unwrap();

        let encrypted = cipher.encrypt("Original data").unwrap();
        let mut raw = BASE64.decode(&encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_malformed_ciphertext_fails() {
        let cipher = Cipher::new("test_key").unwrap();

        assert!(matches!(
            cipher.decrypt("not base64!!!"),
            Err(CryptoError::DecryptionFailed(_))
        ));
        assert!(matches!(
            cipher.decrypt("c2hvcnQ="),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }
}
