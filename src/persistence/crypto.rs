//! AES-256-GCM sealing of stored strategy settings.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// Seals strings as hex(nonce || ciphertext).
///
/// The key is the SHA-256 digest of the configured secret.
pub struct ConfigCipher {
    cipher: Aes256Gcm,
}

impl ConfigCipher {
    pub fn new(secret: &str) -> Result<Self> {
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).context("init aes-gcm")?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("encrypt state"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(hex::encode(combined))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let data = hex::decode(sealed).context("decode sealed state as hex")?;
        if data.len() < NONCE_LEN {
            bail!("sealed state too short");
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("decrypt state"))?;
        String::from_utf8(plaintext).context("decode state as utf-8")
    }
}
