use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crypto::{CryptoError, CryptoProvider, EncryptedRecord};

/// Namespace prefix for all store files
const STORE_PREFIX: &str = "bt_secure_";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage encryption error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Per-write options for `SecureStore::set_item`.
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Encrypt the serialized envelope. Costs a key derivation per
    /// read/write, so only sensitive values should ask for it.
    pub encrypt: bool,
    /// Logical lifetime; expired records read as absent and are deleted
    /// on next access.
    pub expiry: Option<Duration>,
    /// Accepted and recorded but currently a no-op.
    pub compress: bool,
}

impl StorageOptions {
    pub fn encrypted() -> Self {
        Self {
            encrypt: true,
            ..Self::default()
        }
    }

    pub fn encrypted_with_expiry(expiry: Duration) -> Self {
        Self {
            encrypt: true,
            expiry: Some(expiry),
            ..Self::default()
        }
    }
}

/// Metadata wrapper around every stored value.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageEnvelope {
    value: serde_json::Value,
    written_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    integrity_hash: Option<String>,
    #[serde(default)]
    compressed: bool,
}

/// Namespaced key-value store backed by one JSON file per key.
///
/// Values are wrapped in a `StorageEnvelope` and optionally encrypted via
/// the crypto provider. Reads auto-detect encryption by file shape; any
/// record that fails decryption, integrity verification, or expiry is
/// deleted and reported as absent.
pub struct SecureStore {
    dir: PathBuf,
    passphrase: String,
}

impl SecureStore {
    pub fn new(dir: PathBuf, passphrase: impl Into<String>) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            passphrase: passphrase.into(),
        })
    }

    fn item_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}.json", STORE_PREFIX, key))
    }

    /// Store a value under a namespaced key, overwriting any prior value.
    ///
    /// The write goes through a temp file and rename, so a concurrent
    /// reader sees either the old or the new record, never a torn one.
    pub fn set_item<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: &StorageOptions,
    ) -> Result<(), StorageError> {
        let value_json = serde_json::to_value(value)?;

        let integrity_hash = if options.encrypt {
            Some(CryptoProvider::hash(value_json.to_string().as_bytes()))
        } else {
            None
        };

        let envelope = StorageEnvelope {
            value: value_json,
            written_at: Utc::now(),
            expires_at: options
                .expiry
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| Utc::now() + d),
            integrity_hash,
            compressed: options.compress,
        };

        let serialized = serde_json::to_vec(&envelope)?;
        let contents = if options.encrypt {
            let record = CryptoProvider::encrypt(&serialized, &self.passphrase)?;
            serde_json::to_vec(&record)?
        } else {
            serialized
        };

        let path = self.item_path(key);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &contents)?;
        std::fs::rename(&tmp_path, &path)?;

        debug!(key, encrypted = options.encrypt, "Stored item");
        Ok(())
    }

    /// Read a value back, or `None` when the key is absent, expired, or
    /// the record is corrupt. Corrupt and expired records are deleted so
    /// the store self-heals; corruption is never surfaced as an error.
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let path = self.item_path(key);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope = match self.decode_envelope(&contents) {
            Some(envelope) => envelope,
            None => {
                warn!(key, "Discarding unreadable record");
                self.remove_item(key)?;
                return Ok(None);
            }
        };

        if let Some(expires_at) = envelope.expires_at {
            if Utc::now() > expires_at {
                debug!(key, "Record expired");
                self.remove_item(key)?;
                return Ok(None);
            }
        }

        if let Some(ref expected) = envelope.integrity_hash {
            if !CryptoProvider::verify_hash(envelope.value.to_string().as_bytes(), expected) {
                warn!(key, "Integrity check failed, discarding record");
                self.remove_item(key)?;
                return Ok(None);
            }
        }

        match serde_json::from_value(envelope.value) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Stored value has unexpected shape, discarding");
                self.remove_item(key)?;
                Ok(None)
            }
        }
    }

    /// Decode raw file contents into an envelope, decrypting when the file
    /// holds an `EncryptedRecord`. `None` means corrupt.
    fn decode_envelope(&self, contents: &[u8]) -> Option<StorageEnvelope> {
        let raw: serde_json::Value = serde_json::from_slice(contents).ok()?;

        let is_encrypted = raw.get("ciphertext").is_some()
            && raw.get("nonce").is_some()
            && raw.get("salt").is_some();

        if is_encrypted {
            let record: EncryptedRecord = serde_json::from_value(raw).ok()?;
            let plaintext = match CryptoProvider::decrypt(&record, &self.passphrase) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    debug!(error = %e, "Decryption failed");
                    return None;
                }
            };
            serde_json::from_slice(&plaintext).ok()
        } else {
            serde_json::from_value(raw).ok()
        }
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.item_path(key);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.item_path(key).exists()
    }

    /// All keys currently present in the namespace (including expired
    /// records not yet swept).
    pub fn get_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(STORE_PREFIX) {
                if let Some(key) = rest.strip_suffix(".json") {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Remove every record in the namespace.
    pub fn clear(&self) -> Result<(), StorageError> {
        for key in self.get_keys()? {
            self.remove_item(&key)?;
        }
        Ok(())
    }

    /// Proactive sweep of expired and corrupt records. Expiry is otherwise
    /// enforced lazily on read.
    pub fn cleanup_expired_items(&self) -> Result<usize, StorageError> {
        let mut cleaned = 0;
        for key in self.get_keys()? {
            let before = self.has_item(&key);
            let _ = self.get_item::<serde_json::Value>(&key)?;
            if before && !self.has_item(&key) {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Bulk snapshot of all live values, for backup or migration.
    /// Corrupt or expired records are skipped.
    pub fn export_data(&self) -> Result<HashMap<String, serde_json::Value>, StorageError> {
        let mut data = HashMap::new();
        for key in self.get_keys()? {
            if let Some(value) = self.get_item::<serde_json::Value>(&key)? {
                data.insert(key, value);
            }
        }
        Ok(data)
    }

    /// Re-apply a previously exported snapshot. Every value is written with
    /// the same options.
    pub fn import_data(
        &self,
        data: &HashMap<String, serde_json::Value>,
        options: &StorageOptions,
    ) -> Result<(), StorageError> {
        for (key, value) in data {
            self.set_item(key, value, options)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &tempfile::TempDir) -> SecureStore {
        SecureStore::new(dir.path().to_path_buf(), "test-passphrase").unwrap()
    }

    #[test]
    fn test_plain_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        store
            .set_item("theme", &"dark".to_string(), &StorageOptions::default())
            .unwrap();
        let value: Option<String> = store.get_item("theme").unwrap();
        assert_eq!(value.as_deref(), Some("dark"));
    }

    #[test]
    fn test_encrypted_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        store
            .set_item("access_token", &"tok-123".to_string(), &StorageOptions::encrypted())
            .unwrap();

        // On-disk form must not contain the plaintext
        let raw = std::fs::read_to_string(dir.path().join("bt_secure_access_token.json")).unwrap();
        assert!(!raw.contains("tok-123"));
        assert!(raw.contains("ciphertext"));

        let value: Option<String> = store.get_item("access_token").unwrap();
        assert_eq!(value.as_deref(), Some("tok-123"));
    }

    #[test]
    fn test_expiry_lazy_deletion() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        let options = StorageOptions {
            expiry: Some(Duration::from_millis(100)),
            ..StorageOptions::default()
        };
        store.set_item("draft", &42u32, &options).unwrap();

        // Still live before the deadline
        assert_eq!(store.get_item::<u32>("draft").unwrap(), Some(42));

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(store.get_item::<u32>("draft").unwrap(), None);
        assert!(!store.has_item("draft"));
    }

    #[test]
    fn test_corrupted_record_self_heals() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        store
            .set_item("profile", &"data".to_string(), &StorageOptions::encrypted())
            .unwrap();
        std::fs::write(dir.path().join("bt_secure_profile.json"), b"{garbage!!").unwrap();

        let value: Option<String> = store.get_item("profile").unwrap();
        assert_eq!(value, None);
        assert!(!store.has_item("profile"));
    }

    #[test]
    fn test_tampered_ciphertext_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        store
            .set_item("refresh_token", &"rt-9".to_string(), &StorageOptions::encrypted())
            .unwrap();

        let path = dir.path().join("bt_secure_refresh_token.json");
        let mut record: EncryptedRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        // Swap in a ciphertext of valid base64 but wrong content
        record.ciphertext = CryptoProvider::hash(b"not the ciphertext");
        std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        let value: Option<String> = store.get_item("refresh_token").unwrap();
        assert_eq!(value, None);
        assert!(!store.has_item("refresh_token"));
    }

    #[test]
    fn test_integrity_mismatch_discards() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        // Hand-write a plain envelope whose hash does not match its value
        let envelope = serde_json::json!({
            "value": "current",
            "writtenAt": Utc::now(),
            "integrityHash": CryptoProvider::hash(b"\"previous\""),
        });
        std::fs::write(
            dir.path().join("bt_secure_cache.json"),
            serde_json::to_vec(&envelope).unwrap(),
        )
        .unwrap();

        let value: Option<String> = store.get_item("cache").unwrap();
        assert_eq!(value, None);
        assert!(!store.has_item("cache"));
    }

    #[test]
    fn test_keys_clear_and_cleanup() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        store.set_item("a", &1u8, &StorageOptions::default()).unwrap();
        store
            .set_item(
                "b",
                &2u8,
                &StorageOptions {
                    expiry: Some(Duration::from_millis(20)),
                    ..StorageOptions::default()
                },
            )
            .unwrap();
        assert_eq!(store.get_keys().unwrap(), vec!["a", "b"]);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.cleanup_expired_items().unwrap(), 1);
        assert_eq!(store.get_keys().unwrap(), vec!["a"]);

        store.clear().unwrap();
        assert!(store.get_keys().unwrap().is_empty());
    }

    #[test]
    fn test_export_import() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        store
            .set_item("language", &"en".to_string(), &StorageOptions::default())
            .unwrap();
        store
            .set_item("onboarding_step", &3u32, &StorageOptions::encrypted())
            .unwrap();

        let snapshot = store.export_data().unwrap();
        assert_eq!(snapshot.len(), 2);

        let other_dir = tempdir().unwrap();
        let other = SecureStore::new(other_dir.path().to_path_buf(), "test-passphrase").unwrap();
        other
            .import_data(&snapshot, &StorageOptions::encrypted())
            .unwrap();
        assert_eq!(
            other.get_item::<u32>("onboarding_step").unwrap(),
            Some(3)
        );
        assert_eq!(
            other.get_item::<String>("language").unwrap().as_deref(),
            Some("en")
        );
    }
}
