use std::{
    fs,
    io::{ErrorKind, Write},
    sync::{Arc, Mutex},
};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use sensornode_common::NodeConfig;

use crate::platform::DataDir;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another update holds the store lock; the caller retries, nothing is
    /// partially applied.
    #[error("configuration store is busy")]
    Busy,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid configuration payload: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Durable configuration with a primary/backup pair.
///
/// Writes are atomic: the current primary is copied aside first, the new
/// document lands in a temp file and is fsynced, then a rename makes it the
/// primary. A crash at any point leaves either the old document or the new
/// one, never a torn file.
#[derive(Clone)]
pub struct ConfigStore {
    dir: Arc<DataDir>,
    lock: Arc<Mutex<()>>,
}

impl ConfigStore {
    pub fn new(dir: DataDir) -> Self {
        Self {
            dir: Arc::new(dir),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Primary first, then backup, then compiled defaults. A document that
    /// fails to parse is treated the same as a missing one.
    pub fn load(&self) -> NodeConfig {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match read_config(&self.dir.config()) {
            Ok(Some(config)) => return config,
            Ok(None) => {}
            Err(err) => warn!("primary config unreadable: {err}"),
        }

        match read_config(&self.dir.config_backup()) {
            Ok(Some(config)) => {
                warn!("primary config missing or corrupt, recovered from backup");
                return config;
            }
            Ok(None) => {}
            Err(err) => warn!("backup config unreadable: {err}"),
        }

        info!("no stored configuration, using defaults");
        let mut config = NodeConfig::default();
        config.sanitize();
        config
    }

    pub fn save(&self, config: &NodeConfig) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.write_locked(config)
    }

    /// Apply a partial document on top of the stored configuration and
    /// persist the result. Rejected outright if another update is running.
    pub fn update(&self, patch: &Value) -> Result<NodeConfig, StoreError> {
        let _guard = self.lock.try_lock().map_err(|_| StoreError::Busy)?;

        let current = match read_config(&self.dir.config()) {
            Ok(Some(config)) => config,
            _ => match read_config(&self.dir.config_backup()) {
                Ok(Some(config)) => config,
                _ => NodeConfig::default(),
            },
        };

        let merged = current.merged_with(patch)?;
        self.write_locked(&merged)?;
        Ok(merged)
    }

    /// Remove both copies; the next load starts from defaults.
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        remove_if_present(&self.dir.config())?;
        remove_if_present(&self.dir.config_backup())?;
        remove_if_present(&self.dir.config_temp())?;
        Ok(())
    }

    fn write_locked(&self, config: &NodeConfig) -> Result<(), StoreError> {
        fs::create_dir_all(self.dir.root())?;

        let primary = self.dir.config();
        if primary.exists() {
            fs::copy(&primary, self.dir.config_backup())?;
        }

        let temp = self.dir.config_temp();
        let payload = serde_json::to_vec_pretty(config)?;
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &primary)?;
        Ok(())
    }
}

fn read_config(path: &std::path::Path) -> Result<Option<NodeConfig>, StoreError> {
    match fs::read(path) {
        Ok(raw) => {
            let mut config: NodeConfig = serde_json::from_slice(&raw)?;
            config.sanitize();
            Ok(Some(config))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn remove_if_present(path: &std::path::Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, ConfigStore) {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::new(DataDir::at(tmp.path()));
        (tmp, store)
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let (_tmp, store) = store();
        let config = store.load();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.led.count, 12);
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_tmp, store) = store();
        let mut config = NodeConfig::default();
        config.device.location = "attic".to_string();
        store.save(&config).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.device.location, "attic");
    }

    #[test]
    fn update_merges_only_named_leaves() {
        let (_tmp, store) = store();
        store.save(&NodeConfig::default()).unwrap();

        let updated = store
            .update(&json!({"mqtt": {"broker": "10.0.0.7"}}))
            .unwrap();
        assert_eq!(updated.mqtt.broker, "10.0.0.7");
        assert_eq!(updated.mqtt.port, 1883);

        let reloaded = store.load();
        assert_eq!(reloaded.mqtt.broker, "10.0.0.7");
    }

    #[test]
    fn corrupt_primary_recovers_from_backup() {
        let (tmp, store) = store();
        let mut config = NodeConfig::default();
        config.device.location = "garage".to_string();
        store.save(&config).unwrap();
        // A second save creates the backup copy of the good document.
        store.save(&config).unwrap();

        fs::write(tmp.path().join("config.json"), b"{not json").unwrap();

        let loaded = store.load();
        assert_eq!(loaded.device.location, "garage");
    }

    #[test]
    fn corrupt_primary_and_backup_fall_back_to_defaults() {
        let (tmp, store) = store();
        fs::write(tmp.path().join("config.json"), b"garbage").unwrap();
        fs::write(tmp.path().join("config.json.bak"), b"garbage").unwrap();

        let loaded = store.load();
        assert_eq!(loaded.device.location, "living_room");
    }

    #[test]
    fn save_interrupted_before_rename_keeps_the_old_configuration() {
        let (tmp, store) = store();
        let mut config = NodeConfig::default();
        config.device.location = "attic".to_string();
        store.save(&config).unwrap();

        // A save that died after writing the temp file: the new document
        // never reached the rename, so it must stay invisible.
        let mut next = NodeConfig::default();
        next.device.location = "cellar".to_string();
        fs::write(
            tmp.path().join("config.json.tmp"),
            serde_json::to_vec(&next).unwrap(),
        )
        .unwrap();

        assert_eq!(store.load().device.location, "attic");
    }

    #[test]
    fn rename_is_the_commit_point_for_a_save() {
        let (tmp, store) = store();
        let mut config = NodeConfig::default();
        config.device.location = "attic".to_string();
        store.save(&config).unwrap();

        let mut next = NodeConfig::default();
        next.device.location = "cellar".to_string();
        fs::write(
            tmp.path().join("config.json.tmp"),
            serde_json::to_vec(&next).unwrap(),
        )
        .unwrap();
        fs::rename(
            tmp.path().join("config.json.tmp"),
            tmp.path().join("config.json"),
        )
        .unwrap();

        assert_eq!(store.load().device.location, "cellar");
    }

    #[test]
    fn concurrent_update_is_rejected_as_busy() {
        let (_tmp, store) = store();
        let _held = store.lock.lock().unwrap();

        let second = store.clone();
        let err = second.update(&json!({"led": {"brightness": 1}})).unwrap_err();
        assert!(matches!(err, StoreError::Busy));
    }

    #[test]
    fn clear_removes_both_copies() {
        let (tmp, store) = store();
        store.save(&NodeConfig::default()).unwrap();
        store.save(&NodeConfig::default()).unwrap();
        assert!(tmp.path().join("config.json").exists());

        store.clear().unwrap();
        assert!(!tmp.path().join("config.json").exists());
        assert!(!tmp.path().join("config.json.bak").exists());

        let loaded = store.load();
        assert_eq!(loaded.device.name, "sensornode");
    }
}
