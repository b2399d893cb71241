//! Symmetric encryption of secrets at rest.
//!
//! Every sensitive credential column (`client_secret`, `private_key`,
//! `refresh_token`) and every cached access token passes through a
//! [`SecretCodec`] on its way out of the process.
//!
//! [`AesGcmCodec`] uses AES-256-GCM with a fresh random 96-bit nonce per value.
//! The stored form is `base64(nonce || ciphertext)`, so a single string column
//! is enough to hold it.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

use crate::store::Secret;

/// Size of the encryption key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM).
const NONCE_SIZE: usize = 12;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The key is not valid base64 or has the wrong length.
    #[error("invalid encryption key: {message}")]
    InvalidKey { message: String },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    Encryption { message: String },

    /// Ciphertext is malformed, was produced under another key, or was tampered with.
    #[error("failed to decode secret: {message}")]
    Decoding { message: String },
}

/// Reversible, keyed transformation for opaque string secrets.
pub trait SecretCodec: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CodecError>;

    /// Fails with [`CodecError::Decoding`] on malformed or foreign ciphertext.
    fn decrypt(&self, ciphertext: &str) -> Result<String, CodecError>;
}

/// Encrypt an optional secret. Absent and empty values are stored as `None`.
pub fn encrypt_optional(
    codec: &dyn SecretCodec,
    value: Option<&Secret>,
) -> Result<Option<String>, CodecError> {
    match value {
        Some(secret) if !secret.is_empty() => codec.encrypt(secret.expose()).map(Some),
        _ => Ok(None),
    }
}

/// Decrypt an optional column. Absent and empty values read back as `None`.
pub fn decrypt_optional(
    codec: &dyn SecretCodec,
    value: Option<&str>,
) -> Result<Option<Secret>, CodecError> {
    match value {
        Some(ciphertext) if !ciphertext.is_empty() => {
            codec.decrypt(ciphertext).map(|plain| Some(Secret::new(plain)))
        }
        _ => Ok(None),
    }
}

/// AES-256-GCM codec.
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    /// Create a codec from raw key bytes.
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Create a codec from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> Result<Self, CodecError> {
        let bytes = BASE64
            .decode(key_base64.trim())
            .map_err(|e| CodecError::InvalidKey {
                message: format!("not valid base64: {}", e),
            })?;

        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CodecError::InvalidKey {
                message: format!(
                    "key must be {} bytes (256 bits), got {} bytes",
                    KEY_SIZE,
                    bytes.len()
                ),
            }
        })?;

        Ok(Self::new(&key))
    }

    /// Generate a fresh random key, base64-encoded.
    pub fn generate_key() -> String {
        BASE64.encode(Aes256Gcm::generate_key(OsRng))
    }
}

impl std::fmt::Debug for AesGcmCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCodec").finish_non_exhaustive()
    }
}

impl SecretCodec for AesGcmCodec {
    fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CodecError::Encryption {
                message: e.to_string(),
            })?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(payload))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CodecError> {
        let payload = BASE64
            .decode(ciphertext)
            .map_err(|e| CodecError::Decoding {
                message: format!("not valid base64: {}", e),
            })?;

        if payload.len() <= NONCE_SIZE {
            return Err(CodecError::Decoding {
                message: format!("payload too short ({} bytes)", payload.len()),
            });
        }

        let (nonce, sealed) = payload.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CodecError::Decoding {
                message: "wrong key or corrupted data".to_string(),
            })?;

        String::from_utf8(plaintext).map_err(|_| CodecError::Decoding {
            message: "decrypted data is not valid UTF-8".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> AesGcmCodec {
        AesGcmCodec::new(&[7u8; KEY_SIZE])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let codec = codec();
        for plaintext in ["client-secret", "", "ключ с юникодом", "a\nb\tc"] {
            let ciphertext = codec.encrypt(plaintext).unwrap();
            assert_ne!(ciphertext, plaintext);
            assert_eq!(codec.decrypt(&ciphertext).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_nonces_differ() {
        let codec = codec();
        let first = codec.encrypt("same").unwrap();
        let second = codec.encrypt("same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = codec().encrypt("secret").unwrap();
        let other = AesGcmCodec::new(&[8u8; KEY_SIZE]);
        assert!(matches!(
            other.decrypt(&ciphertext),
            Err(CodecError::Decoding { .. })
        ));
    }

    #[test]
    fn test_malformed_ciphertext_fails() {
        let codec = codec();
        assert!(matches!(
            codec.decrypt("not base64 !!"),
            Err(CodecError::Decoding { .. })
        ));
        assert!(matches!(
            codec.decrypt(&BASE64.encode([1u8; 4])),
            Err(CodecError::Decoding { .. })
        ));

        let mut tampered = BASE64.decode(codec.encrypt("secret").unwrap()).unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        assert!(matches!(
            codec.decrypt(&BASE64.encode(tampered)),
            Err(CodecError::Decoding { .. })
        ));
    }

    #[test]
    fn test_key_validation() {
        assert!(AesGcmCodec::from_base64(&BASE64.encode([0u8; 32])).is_ok());
        assert!(matches!(
            AesGcmCodec::from_base64(&BASE64.encode([0u8; 16])),
            Err(CodecError::InvalidKey { .. })
        ));
        assert!(matches!(
            AesGcmCodec::from_base64("not-valid-base64!@#$"),
            Err(CodecError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_generated_key_is_usable() {
        let key = AesGcmCodec::generate_key();
        let codec = AesGcmCodec::from_base64(&key).unwrap();
        let ciphertext = codec.encrypt("value").unwrap();
        assert_eq!(codec.decrypt(&ciphertext).unwrap(), "value");
    }

    #[test]
    fn test_optional_helpers_pass_empty_through() {
        let codec = codec();
        assert_eq!(encrypt_optional(&codec, None).unwrap(), None);
        assert_eq!(encrypt_optional(&codec, Some(&Secret::new(""))).unwrap(), None);
        assert!(decrypt_optional(&codec, Some("")).unwrap().is_none());

        let stored = encrypt_optional(&codec, Some(&Secret::new("refresh"))).unwrap();
        let restored = decrypt_optional(&codec, stored.as_deref()).unwrap().unwrap();
        assert_eq!(restored.expose(), "refresh");
    }
}
