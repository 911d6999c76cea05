//! Optional symmetric encryption of layer payloads.
//!
//! When a layer is configured with `symmetric_encryption_keys`, every wire
//! payload is sealed with ChaCha20-Poly1305. The first configured key
//! encrypts; decryption tries each key in order, which allows rotating keys
//! by prepending the new one and draining the old.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use wirebus_core::{Error, Result};

const NONCE_LEN: usize = 12;

/// A multi-key payload cipher.
pub struct PayloadCipher {
    ciphers: Vec<ChaCha20Poly1305>,
}

impl PayloadCipher {
    /// Build a cipher from configured key strings. Keys of any length are
    /// accepted; each is stretched to 32 bytes with SHA-256.
    pub fn new<K: AsRef<str>>(keys: &[K]) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::Encoding(
                "symmetric encryption requires at least one key".to_string(),
            ));
        }

        let ciphers = keys
            .iter()
            .map(|key| {
                let digest = Sha256::digest(key.as_ref().as_bytes());
                ChaCha20Poly1305::new(Key::from_slice(digest.as_slice()))
            })
            .collect();
        Ok(Self { ciphers })
    }

    /// Seal `plaintext` with the primary key. Output is `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self.ciphers[0]
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Encoding("payload encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed payload, trying every configured key in order.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(Error::Encoding(
                "sealed payload shorter than nonce".to_string(),
            ));
        }

        let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
        let ciphertext = &sealed[NONCE_LEN..];

        for cipher in &self.ciphers {
            if let Ok(plaintext) = cipher.decrypt(nonce, ciphertext) {
                return Ok(plaintext);
            }
        }
        Err(Error::Encoding(
            "payload did not decrypt under any configured key".to_string(),
        ))
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("keys", &self.ciphers.len())
            .finish()
    }
}
