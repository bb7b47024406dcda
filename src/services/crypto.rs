//! AES-256-GCM sealing of stored connection secrets.
//!
//! Sealed form: base64(nonce || ciphertext), with a fresh random 96-bit nonce
//! per value. The 32-byte key lives base64-encoded in a key file created on
//! first start.

use crate::services::{StorageError, StorageResult};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::{RngCore, rngs::OsRng};
use std::{fs, io, path::Path};
use tracing::info;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Cipher with a fresh random key. Nothing sealed with it survives a
    /// restart.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Load the key from `path`, creating the file with a random key if it
    /// does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let encoded = fs::read_to_string(path)?;
            let decoded = STANDARD
                .decode(encoded.trim())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let key: [u8; KEY_LEN] = decoded.try_into().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("secret key in {} must be {} bytes", path.display(), KEY_LEN),
                )
            })?;
            return Ok(Self::new(key));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        fs::write(path, STANDARD.encode(key))?;
        info!("generated new secret key at {}", path.display());
        Ok(Self::new(key))
    }

    pub fn seal(&self, plaintext: &str) -> StorageResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| StorageError::Crypto("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> StorageResult<String> {
        let raw = STANDARD
            .decode(sealed)
            .map_err(|e| StorageError::Crypto(format!("malformed sealed value: {}", e)))?;
        if raw.len() <= NONCE_LEN {
            return Err(StorageError::Crypto("sealed value is truncated".into()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StorageError::Crypto("decryption failed (wrong key?)".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| StorageError::Crypto("decrypted secret is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_values_differ_and_open() {
        let cipher = SecretCipher::generate();
        let a = cipher.seal("minioadmin").unwrap();
        let b = cipher.seal("minioadmin").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("minioadmin"));
        assert_eq!(cipher.open(&a).unwrap(), "minioadmin");
    }

    #[test]
    fn wrong_key_cannot_open() {
        let sealed = SecretCipher::generate().seal("secret").unwrap();
        let err = SecretCipher::generate().open(&sealed).unwrap_err();
        assert!(matches!(err, StorageError::Crypto(_)));
    }

    #[test]
    fn key_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("secret.key");

        let first = SecretCipher::load_or_create(&path).unwrap();
        let sealed = first.seal("s3cr3t").unwrap();
        let second = SecretCipher::load_or_create(&path).unwrap();
        assert_eq!(second.open(&sealed).unwrap(), "s3cr3t");
    }

    #[test]
    fn short_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        fs::write(&path, STANDARD.encode([1u8; 16])).unwrap();
        assert!(SecretCipher::load_or_create(&path).is_err());
    }
}
