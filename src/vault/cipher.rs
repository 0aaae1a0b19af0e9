//! Machine-bound secret encryption.
//!
//! AES-256-GCM with a key derived from the host name and the user profile
//! path. Tokens are `BASE64(nonce || ciphertext || tag)`. A vault copied to
//! another machine (or another user profile) cannot be decrypted there; the
//! identity has to be added again.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key length in bytes (256 bits for AES-256)
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

/// GCM authentication tag length
const TAG_LENGTH: usize = 16;

/// Domain separation for the machine key.
const KEY_DOMAIN: &str = "arngit-vault-key-v1";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// Derive the machine key from host identity and profile directory.
///
/// Never persisted; recomputed per process.
pub fn derive_key() -> [u8; KEY_LENGTH] {
    let hostname = sysinfo::System::host_name().unwrap_or_default();
    let home = crate::storage::home_dir();
    derive_key_from(&hostname, &home.to_string_lossy())
}

fn derive_key_from(hostname: &str, home: &str) -> [u8; KEY_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update([0u8]);
    hasher.update(home.as_bytes());
    hasher.update([0u8]);
    hasher.update(KEY_DOMAIN.as_bytes());

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Authenticated encryption of short secrets.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; KEY_LENGTH],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Cipher keyed to this machine and user.
    pub fn for_machine() -> Self {
        Self::with_key(derive_key())
    }

    pub fn with_key(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm, String> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| format!("invalid key: {}", e))
    }

    /// Encrypt with a fresh random nonce. Two calls never share a token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = self.cipher().map_err(CipherError::Encrypt)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let combined = BASE64
            .decode(token.trim())
            .map_err(|e| CipherError::Decrypt(format!("malformed token: {}", e)))?;

        if combined.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CipherError::Decrypt("token too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);
        let cipher = self.cipher().map_err(CipherError::Decrypt)?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
            CipherError::Decrypt(
                "invalid key or corrupted data (was it encrypted on another machine?)".to_string(),
            )
        })?;

        String::from_utf8(plaintext)
            .map_err(|_| CipherError::Decrypt("plaintext is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_LENGTH] {
        let mut key = [0u8; KEY_LENGTH];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = SecretCipher::with_key(test_key());
        for plaintext in ["ghp_abc123", "", "Hello, 世界! 🎉", " padded \r\n"] {
            let token = cipher.encrypt(plaintext).unwrap();
            assert_eq!(cipher.decrypt(&token).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_different_encryptions_differ() {
        let cipher = SecretCipher::with_key(test_key());
        let a = cipher.encrypt("same-data").unwrap();
        let b = cipher.encrypt("same-data").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut other = test_key();
        other[0] = 255;

        let token = SecretCipher::with_key(test_key()).encrypt("secret").unwrap();
        let result = SecretCipher::with_key(other).decrypt(&token);
        assert!(matches!(result, Err(CipherError::Decrypt(_))));
    }

    #[test]
    fn test_tampered_token_fails() {
        let cipher = SecretCipher::with_key(test_key());
        let token = cipher.encrypt("secret").unwrap();

        let mut bytes = BASE64.decode(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(&bytes);

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_malformed_and_truncated_tokens_fail() {
        let cipher = SecretCipher::with_key(test_key());
        assert!(cipher.decrypt("not base64 !!").is_err());
        assert!(cipher.decrypt(&BASE64.encode([0u8; 8])).is_err());
        assert!(cipher.decrypt("").is_err());
    }

    #[test]
    fn test_key_is_bound_to_machine_identity() {
        let a = derive_key_from("host-a", "/home/alice");
        assert_eq!(a, derive_key_from("host-a", "/home/alice"));
        assert_ne!(a, derive_key_from("host-b", "/home/alice"));
        assert_ne!(a, derive_key_from("host-a", "/home/bob"));
        // Field boundaries matter.
        assert_ne!(
            derive_key_from("ab", "c"),
            derive_key_from("a", "bc")
        );
    }

    #[test]
    fn test_machine_cipher_roundtrip() {
        let cipher = SecretCipher::for_machine();
        let token = cipher.encrypt("token").unwrap();
        assert_eq!(SecretCipher::for_machine().decrypt(&token).unwrap(), "token");
    }
}
