//! Encryption for persisted queue records
//!
//! Every record is sealed with AES-256-GCM. The record id is bound as
//! associated data, so a ciphertext copied onto another row fails to open.
//! Stored layout: 12-byte nonce followed by ciphertext and tag.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use bridge_traits::storage::SecureStore;
use std::fmt;
use tracing::{debug, info};

use crate::error::{Result, SyncError};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256 key protecting queue records.
#[derive(Clone)]
pub struct RecordKey {
    key_bytes: [u8; KEY_LEN],
}

impl RecordKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut key_bytes = [0u8; KEY_LEN];
        key_bytes.copy_from_slice(&key);
        Self { key_bytes }
    }

    /// Create from existing key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key_bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            SyncError::Encryption(format!(
                "Invalid key length {}. Expected {} bytes for AES-256.",
                bytes.len(),
                KEY_LEN
            ))
        })?;
        Ok(Self { key_bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    /// Load the key stored under `key_name`, creating and persisting one on first use.
    ///
    /// A stored value of the wrong length is an error rather than being
    /// replaced: overwriting it would make every existing record unreadable.
    pub async fn load_or_create(store: &dyn SecureStore, key_name: &str) -> Result<Self> {
        if let Some(existing) = store.get_secret(key_name).await? {
            debug!(key_name, "Loaded queue record key");
            return Self::from_bytes(&existing);
        }

        let key = Self::generate();
        store.set_secret(key_name, key.as_bytes()).await?;
        info!(key_name, "Generated new queue record key");
        Ok(key)
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordKey")
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens individual queue records.
pub struct RecordCipher {
    cipher: Aes256Gcm,
}

impl RecordCipher {
    pub fn new(key: &RecordKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt `plaintext`, binding `record_id` as associated data.
    pub fn seal(&self, record_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: record_id.as_bytes(),
                },
            )
            .map_err(|e| SyncError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a record produced by [`seal`](Self::seal) for the same `record_id`.
    pub fn open(&self, record_id: &str, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(SyncError::Encryption(
                "Invalid ciphertext: too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: record_id.as_bytes(),
                },
            )
            .map_err(|_| {
                SyncError::Encryption("Decryption failed: wrong key or tampered record".to_string())
            })
    }
}
