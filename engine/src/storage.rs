use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::vault::{self, EncryptedPayload};

/// The single logical key holding the serialized encrypted phrase.
pub const KEY_PAYLOAD: &str = "wallet.encryptedMnemonic.v";
const KEY_ADDRESS: &str = "wallet.address";
const KEY_NEEDS_BACKUP: &str = "wallet.needsBackup";
const KEY_HAS_BACKED_UP: &str = "wallet.hasBackedUp";
const KEY_SELECTED_NETWORK: &str = "wallet.selectedNetwork";

const BACKUP_EXTENSION: &str = "payload.bak";

/// Key-value persistence consumed by the wallet engine.
///
/// One logical key holds the encrypted payload; the backup flags and the
/// selected network are small independent entries. Implementations must
/// make `set` atomic with respect to crashes.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> WalletResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> WalletResult<()>;
    fn remove(&self, key: &str) -> WalletResult<()>;
}

/// File-backed store: one file per key under a root directory.
///
/// Writes go through a `.new` temp file, fsync, then rename. Overwrites of
/// the payload key first copy the existing file into `backups/` with a
/// timestamped name, so a failed migration or password change can be
/// rolled back.
#[derive(Debug, Clone)]
pub struct FileStore {
    root_dir: PathBuf,
    backup_dir: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Store root directory cannot be empty".to_string(),
            ));
        }

        let backup_dir = root_dir.join("backups");
        fs::create_dir_all(&root_dir)?;
        fs::create_dir_all(&backup_dir)?;

        Ok(Self {
            root_dir,
            backup_dir,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// List payload backups, newest first.
    pub fn list_backups(&self) -> WalletResult<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(BACKUP_EXTENSION))
            {
                backups.push(path);
            }
        }

        backups.sort_by(|a, b| {
            let a_time = fs::metadata(a).and_then(|m| m.modified()).ok();
            let b_time = fs::metadata(b).and_then(|m| m.modified()).ok();
            b_time.cmp(&a_time)
        });
        Ok(backups)
    }

    /// Replace the current payload file with the most recent backup.
    pub fn restore_latest_backup(&self) -> WalletResult<()> {
        let backups = self.list_backups()?;
        let latest = backups.first().ok_or_else(|| {
            WalletError::NotFound("No payload backups available".to_string())
        })?;

        fs::copy(latest, self.key_path(KEY_PAYLOAD))?;
        log::info!("Restored payload from backup {}", latest.display());
        Ok(())
    }

    /// Delete old payload backups, keeping the N most recent.
    pub fn prune_backups(&self, keep_count: usize) -> WalletResult<usize> {
        let backups = self.list_backups()?;
        let mut deleted = 0;
        for path in backups.iter().skip(keep_count) {
            fs::remove_file(path)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root_dir.join(sanitized)
    }

    fn snapshot_payload(&self, path: &Path) -> WalletResult<()> {
        if !path.exists() {
            return Ok(());
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let backup_path = self
            .backup_dir
            .join(format!("payload_{}.{}", timestamp, BACKUP_EXTENSION));
        fs::copy(path, &backup_path)?;

        let original_size = fs::metadata(path)?.len();
        let backup_size = fs::metadata(&backup_path)?.len();
        if original_size != backup_size {
            fs::remove_file(&backup_path)?;
            return Err(WalletError::StorageError(
                "Backup verification failed: size mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> WalletResult<Option<String>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> WalletResult<()> {
        let path = self.key_path(key);
        if key == KEY_PAYLOAD {
            self.snapshot_payload(&path)?;
        }

        let tmp_path = path.with_extension("new");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> WalletResult<()> {
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> WalletResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> WalletResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> WalletResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Startup probe: what the store holds, without requiring the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProbe {
    pub has_wallet: bool,
    pub version: Option<u8>,
    pub needs_migration: bool,
}

/// Typed accessors over a raw key-value store.
#[derive(Clone)]
pub struct WalletStore {
    inner: Arc<dyn KeyValueStore>,
}

impl WalletStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    pub fn load_payload(&self) -> WalletResult<Option<EncryptedPayload>> {
        match self.inner.get(KEY_PAYLOAD)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn store_payload(&self, payload: &EncryptedPayload) -> WalletResult<()> {
        let serialized = serde_json::to_string(payload)?;
        self.inner.set(KEY_PAYLOAD, &serialized)?;
        log::debug!("Encrypted payload persisted (version {})", payload.version);
        Ok(())
    }

    pub fn address(&self) -> WalletResult<Option<String>> {
        self.inner.get(KEY_ADDRESS)
    }

    pub fn set_address(&self, address: &str) -> WalletResult<()> {
        self.inner.set(KEY_ADDRESS, address)
    }

    pub fn needs_backup(&self) -> WalletResult<bool> {
        self.flag(KEY_NEEDS_BACKUP)
    }

    pub fn set_needs_backup(&self, value: bool) -> WalletResult<()> {
        self.set_flag(KEY_NEEDS_BACKUP, value)
    }

    pub fn has_backed_up(&self) -> WalletResult<bool> {
        self.flag(KEY_HAS_BACKED_UP)
    }

    pub fn set_has_backed_up(&self, value: bool) -> WalletResult<()> {
        self.set_flag(KEY_HAS_BACKED_UP, value)
    }

    pub fn selected_network(&self) -> WalletResult<Option<String>> {
        self.inner.get(KEY_SELECTED_NETWORK)
    }

    pub fn set_selected_network(&self, name: &str) -> WalletResult<()> {
        self.inner.set(KEY_SELECTED_NETWORK, name)
    }

    /// Report what exists at rest without touching the password path.
    pub fn probe(&self) -> WalletResult<StorageProbe> {
        match self.load_payload()? {
            Some(payload) => Ok(StorageProbe {
                has_wallet: true,
                version: Some(payload.version),
                needs_migration: vault::needs_migration(&payload),
            }),
            None => Ok(StorageProbe {
                has_wallet: false,
                version: None,
                needs_migration: false,
            }),
        }
    }

    /// Remove every persisted wallet entry. Irreversible.
    pub fn wipe(&self) -> WalletResult<()> {
        self.inner.remove(KEY_PAYLOAD)?;
        self.inner.remove(KEY_ADDRESS)?;
        self.inner.remove(KEY_NEEDS_BACKUP)?;
        self.inner.remove(KEY_HAS_BACKED_UP)?;
        self.inner.remove(KEY_SELECTED_NETWORK)?;
        log::warn!("All persisted wallet entries removed");
        Ok(())
    }

    fn flag(&self, key: &str) -> WalletResult<bool> {
        Ok(self.inner.get(key)?.as_deref() == Some("true"))
    }

    fn set_flag(&self, key: &str, value: bool) -> WalletResult<()> {
        self.inner.set(key, if value { "true" } else { "false" })
    }
}
