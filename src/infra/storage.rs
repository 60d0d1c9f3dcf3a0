//! Persistent key-value storage shared by every context of the extension.

use anyhow::{anyhow, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

pub mod keys {
  pub const ACCESS_TOKEN: &str = "access_token";
  pub const REFRESH_TOKEN: &str = "refresh_token";
  /// Older builds kept the refresh token under this name as well.
  pub const LEGACY_REFRESH_TOKEN: &str = "spotify_refresh_token";
  pub const CODE_VERIFIER: &str = "code_verifier";
  pub const CLIENT_ID: &str = "CLIENT_ID";

  /// Everything a disconnect has to wipe.
  pub const AUTH_KEYS: [&str; 4] = [
    ACCESS_TOKEN,
    REFRESH_TOKEN,
    LEGACY_REFRESH_TOKEN,
    CODE_VERIFIER,
  ];
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
  pub key: String,
  pub old_value: Option<String>,
  pub new_value: Option<String>,
}

impl StorageChange {
  pub fn was_added(&self) -> bool {
    self.old_value.is_none() && self.new_value.is_some()
  }

  pub fn was_removed(&self) -> bool {
    self.old_value.is_some() && self.new_value.is_none()
  }
}

pub trait KeyValueStore {
  fn get(&self, key: &str) -> Option<String>;
  fn set(&self, key: &str, value: &str) -> Result<()>;
  fn remove(&self, keys: &[&str]) -> Result<()>;
  /// Change notifications for every key whose value actually changed.
  fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Process-local store; also the cache behind [`FileStore`].
pub struct MemoryStore {
  values: Mutex<BTreeMap<String, String>>,
  changes: broadcast::Sender<StorageChange>,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::with_values(BTreeMap::new())
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_values(values: BTreeMap<String, String>) -> Self {
    let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
    Self {
      values: Mutex::new(values),
      changes,
    }
  }

  pub fn snapshot(&self) -> BTreeMap<String, String> {
    self
      .values
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn notify(&self, change: StorageChange) {
    debug!("storage key '{}' changed", change.key);
    // No subscribers is fine.
    let _ = self.changes.send(change);
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Option<String> {
    self
      .values
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(key)
      .cloned()
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let old_value = self
      .values
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key.to_string(), value.to_string());

    if old_value.as_deref() != Some(value) {
      self.notify(StorageChange {
        key: key.to_string(),
        old_value,
        new_value: Some(value.to_string()),
      });
    }
    Ok(())
  }

  fn remove(&self, keys: &[&str]) -> Result<()> {
    let removed: Vec<(String, String)> = {
      let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
      keys
        .iter()
        .filter_map(|key| values.remove(*key).map(|old| (key.to_string(), old)))
        .collect()
    };

    for (key, old) in removed {
      self.notify(StorageChange {
        key,
        old_value: Some(old),
        new_value: None,
      });
    }
    Ok(())
  }

  fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
    self.changes.subscribe()
  }
}

/// YAML-file backed store, written through on every change.
pub struct FileStore {
  path: PathBuf,
  cache: MemoryStore,
}

impl FileStore {
  pub fn open(path: &Path) -> Result<Self> {
    let values = if path.exists() {
      let contents = fs::read_to_string(path)?;
      // serde fails if file is empty
      if contents.trim().is_empty() {
        BTreeMap::new()
      } else {
        serde_yaml::from_str(&contents)
          .map_err(|e| anyhow!("Failed to parse storage file {}: {}", path.display(), e))?
      }
    } else {
      BTreeMap::new()
    };
    info!("opened storage at {} ({} keys)", path.display(), values.len());

    Ok(Self {
      path: path.to_path_buf(),
      cache: MemoryStore::with_values(values),
    })
  }

  fn persist(&self) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      if !parent.exists() {
        fs::create_dir_all(parent)?;
      }
    }
    let contents = serde_yaml::to_string(&self.cache.snapshot())?;
    fs::write(&self.path, contents)
      .map_err(|e| anyhow!("Failed to write storage file {}: {}", self.path.display(), e))
  }
}

impl KeyValueStore for FileStore {
  fn get(&self, key: &str) -> Option<String> {
    self.cache.get(key)
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    self.cache.set(key, value)?;
    self.persist()
  }

  fn remove(&self, keys: &[&str]) -> Result<()> {
    self.cache.remove(keys)?;
    self.persist()
  }

  fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
    self.cache.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_memory_store_notifies_real_changes_only() {
    let store = MemoryStore::new();
    let mut changes = store.subscribe();

    store.set(keys::ACCESS_TOKEN, "a").unwrap();
    store.set(keys::ACCESS_TOKEN, "a").unwrap();
    store.remove(&[keys::ACCESS_TOKEN, keys::REFRESH_TOKEN]).unwrap();

    let added = changes.try_recv().unwrap();
    assert!(added.was_added());
    assert_eq!(added.new_value.as_deref(), Some("a"));

    let removed = changes.try_recv().unwrap();
    assert!(removed.was_removed());
    assert_eq!(removed.key, keys::ACCESS_TOKEN);

    assert!(changes.try_recv().is_err());
    assert_eq!(store.get(keys::ACCESS_TOKEN), None);
  }

  #[test]
  fn test_file_store_round_trip() {
    let dir = std::env::temp_dir().join(format!("ytm_album_art_store_{}", std::process::id()));
    let path = dir.join("storage.yml");
    let _ = fs::remove_file(&path);

    {
      let store = FileStore::open(&path).unwrap();
      store.set(keys::CLIENT_ID, "client").unwrap();
      store.set(keys::ACCESS_TOKEN, "token").unwrap();
      store.remove(&[keys::ACCESS_TOKEN]).unwrap();
    }

    let reopened = FileStore::open(&path).unwrap();
    assert_eq!(reopened.get(keys::CLIENT_ID).as_deref(), Some("client"));
    assert_eq!(reopened.get(keys::ACCESS_TOKEN), None);

    let _ = fs::remove_dir_all(&dir);
  }
}
