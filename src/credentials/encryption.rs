//! AES-256-GCM encryption for OAuth tokens at rest.
//!
//! Each token is encrypted separately with a fresh random 96-bit IV. The
//! serialized envelope is `iv.ciphertext.tag`, every segment hex-encoded and
//! dot-joined. Rows written by earlier deployments use this exact format, so
//! it must not change.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the IV in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes (128 bits)
const TAG_SIZE: usize = 16;

/// Errors raised by [`SecretCipher`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// The configured key is not exactly 64 hex characters. Fatal at startup.
    #[error("ENCRYPTION_KEY must be a 64-char hex string (32 bytes): {0}")]
    InvalidKeyConfiguration(String),

    /// The input is not three hex segments with a 12-byte IV and 16-byte tag.
    #[error("Malformed cipher envelope: {0}")]
    MalformedEnvelope(&'static str),

    /// Tag verification failed (wrong key, tampered or truncated data).
    #[error("Cipher envelope failed authentication")]
    AuthenticationFailure,

    /// The AEAD primitive refused to encrypt (plaintext too large).
    #[error("Encryption failed")]
    Encryption,
}

/// Parsed form of an `iv.ciphertext.tag` string. Never leaves this module.
struct CipherEnvelope {
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl CipherEnvelope {
    fn parse(envelope: &str) -> Result<Self, CipherError> {
        let mut segments = envelope.split('.');
        let (Some(iv), Some(ciphertext), Some(tag), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(CipherError::MalformedEnvelope("expected three segments"));
        };

        let iv = hex::decode(iv).map_err(|_| CipherError::MalformedEnvelope("iv is not hex"))?;
        let ciphertext = hex::decode(ciphertext)
            .map_err(|_| CipherError::MalformedEnvelope("ciphertext is not hex"))?;
        let tag = hex::decode(tag).map_err(|_| CipherError::MalformedEnvelope("tag is not hex"))?;

        if iv.len() != NONCE_SIZE {
            return Err(CipherError::MalformedEnvelope("iv must be 12 bytes"));
        }
        if tag.len() != TAG_SIZE {
            return Err(CipherError::MalformedEnvelope("tag must be 16 bytes"));
        }

        Ok(Self { iv, ciphertext, tag })
    }

    fn encode(&self) -> String {
        format!(
            "{}.{}.{}",
            hex::encode(&self.iv),
            hex::encode(&self.ciphertext),
            hex::encode(&self.tag)
        )
    }
}

/// Symmetric authenticated cipher for OAuth tokens.
///
/// # Security
/// - Key is held in memory only and never logged
/// - A fresh IV is drawn from the OS RNG on every call (never reused)
/// - Authenticated encryption: tampering is detected, never decrypted
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Builds a cipher from a 64-character hex key.
    ///
    /// # Returns
    /// * `Ok(SecretCipher)` - Ready to encrypt/decrypt
    /// * `Err(InvalidKeyConfiguration)` - Wrong length or not hex
    pub fn from_hex_key(key_hex: &str) -> Result<Self, CipherError> {
        if key_hex.len() != KEY_SIZE * 2 {
            return Err(CipherError::InvalidKeyConfiguration(format!(
                "expected {} hex characters, got {}",
                KEY_SIZE * 2,
                key_hex.len()
            )));
        }

        let key_bytes = hex::decode(key_hex).map_err(|e| {
            CipherError::InvalidKeyConfiguration(format!("key is not valid hex: {}", e))
        })?;

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CipherError::InvalidKeyConfiguration(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` into an `iv.ciphertext.tag` envelope string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        // Generate random nonce (never reuse!)
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(CipherEnvelope {
            iv: nonce.to_vec(),
            ciphertext: sealed,
            tag,
        }
        .encode())
    }

    /// Decrypts an envelope produced by [`SecretCipher::encrypt`].
    ///
    /// # Returns
    /// * `Ok(String)` - Original plaintext
    /// * `Err(MalformedEnvelope)` - Input does not parse as an envelope
    /// * `Err(AuthenticationFailure)` - Tag did not verify
    pub fn decrypt(&self, envelope: &str) -> Result<String, CipherError> {
        let CipherEnvelope {
            iv,
            mut ciphertext,
            tag,
        } = CipherEnvelope::parse(envelope)?;

        ciphertext.extend_from_slice(&tag);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|_| CipherError::AuthenticationFailure)?;

        // Only reachable with a valid tag, so this was encrypted from a &str
        String::from_utf8(plaintext).map_err(|_| CipherError::AuthenticationFailure)
    }
}
