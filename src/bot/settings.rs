//! Durable state snapshot, written atomically to a JSON file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bot::reminders::Reminder;

/// Version of the data format. A file with any other version is ignored.
pub const DATA_VERSION: &str = "1.0";

/// Snapshots older than this are ignored on load.
pub const MAX_AGE_SECS: i64 = 60 * 60 * 24 * 7;

/// Everything that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub timestamp: i64,
    pub version: String,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    #[serde(default)]
    pub reminder_counter: u64,
}

impl Settings {
    pub fn new(timestamp: i64, reminders: Vec<Reminder>, reminder_counter: u64) -> Self {
        Self {
            timestamp,
            version: DATA_VERSION.to_string(),
            reminders,
            reminder_counter,
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to serialize state: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to write '{}': {}", .path.display(), .source)]
    Write { path: PathBuf, source: std::io::Error },
    #[error("failed to rename '{}' into place: {}", .path.display(), .source)]
    Rename { path: PathBuf, source: std::io::Error },
    #[error("failed to read '{}': {}", .path.display(), .source)]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse '{}': {}", .path.display(), .source)]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Reads and writes the snapshot file. Single writer: one process per path.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write to a temp file then rename over the canonical path, so the
    /// canonical file is always either the old or the new snapshot.
    pub fn save(&self, settings: &Settings) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(settings).map_err(PersistError::Serialize)?;

        let temp = self.temp_path();
        std::fs::write(&temp, json)
            .map_err(|e| PersistError::Write { path: temp.clone(), source: e })?;

        if let Err(e) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(PersistError::Rename { path: self.path.clone(), source: e });
        }

        debug!("💾 Saved {} reminder(s) to {:?}", settings.reminders.len(), self.path);
        Ok(())
    }

    /// Load the snapshot. A missing, stale or foreign-version file is `Ok(None)`.
    pub fn load(&self, now: i64) -> Result<Option<Settings>, PersistError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No state file at {:?}, starting fresh", self.path);
                return Ok(None);
            }
            Err(e) => return Err(PersistError::Read { path: self.path.clone(), source: e }),
        };

        let settings: Settings = serde_json::from_str(&json)
            .map_err(|e| PersistError::Parse { path: self.path.clone(), source: e })?;

        if settings.version != DATA_VERSION {
            warn!(
                "Data version mismatch ({} != {}), starting fresh",
                settings.version, DATA_VERSION
            );
            return Ok(None);
        }

        if now - settings.timestamp > MAX_AGE_SECS {
            warn!("Data is too old, starting fresh");
            return Ok(None);
        }

        info!(
            "Loaded state from {:?} ({} reminder(s), saved at {})",
            self.path,
            settings.reminders.len(),
            settings.timestamp
        );
        Ok(Some(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    fn reminder(id: u64) -> Reminder {
        Reminder {
            id,
            channel_id: "c1".into(),
            user_id: "u1".into(),
            message: "stretch".into(),
            time: NOW + 300,
        }
    }

    fn store(dir: &TempDir) -> SettingsStore {
        SettingsStore::new(dir.path().join("chad_memory.json"))
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let settings = Settings::new(NOW, vec![reminder(1), reminder(2)], 2);

        store.save(&settings).unwrap();
        let loaded = store.load(NOW + 10).unwrap().expect("snapshot");
        assert_eq!(loaded, settings);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load(NOW).unwrap().is_none());
    }

    #[test]
    fn test_version_mismatch_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut settings = Settings::new(NOW, vec![reminder(1)], 1);
        settings.version = "0.9".into();
        store.save(&settings).unwrap();

        assert!(store.load(NOW).unwrap().is_none());
    }

    #[test]
    fn test_stale_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&Settings::new(NOW, vec![reminder(1)], 1)).unwrap();

        assert!(store.load(NOW + MAX_AGE_SECS).unwrap().is_some());
        assert!(store.load(NOW + MAX_AGE_SECS + 1).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(NOW), Err(PersistError::Parse { .. })));
    }

    #[test]
    fn test_wire_format() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&Settings::new(NOW, vec![reminder(4)], 4)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], "1.0");
        assert_eq!(raw["timestamp"], NOW);
        assert_eq!(raw["reminder_counter"], 4);
        assert_eq!(raw["reminders"][0]["channel_id"], "c1");
        assert_eq!(raw["reminders"][0]["time"], NOW + 300);
    }

    #[test]
    fn test_failed_write_keeps_old_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&Settings::new(NOW, vec![reminder(1)], 1)).unwrap();

        // A directory squatting on the temp path makes the write fail
        std::fs::create_dir(store.temp_path()).unwrap();
        assert!(store.save(&Settings::new(NOW, vec![], 5)).is_err());

        let loaded = store.load(NOW).unwrap().unwrap();
        assert_eq!(loaded.reminder_counter, 1);
    }
}
