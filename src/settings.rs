//! Generic settings persistence coordination.
//!
//! Provides a reusable API for persisting grid settings (configuration,
//! expansion snapshots, anything serializable) to a key/value store.
//! Values are stored as JSON strings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Key/value string store settings are written to.
pub trait Storage {
    fn get_string(&self, key: &str) -> Option<String>;

    fn set_string(&mut self, key: &str, value: String);

    /// Persists pending writes.
    fn flush(&mut self) -> Result<()>;
}

/// Storage backed by a single JSON object on disk.
///
/// The file is read once when opened and rewritten on every flush.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    values: BTreeMap<String, String>,
    dirty: bool,
}

impl JsonFileStorage {
    /// Opens (or prepares to create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Malformed settings file: {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        log::debug!("settings store {} opened with {} keys", path.display(), values.len());
        Ok(Self { path, values, dirty: false })
    }

    /// Opens the per-user store at `<config_dir>/rtreegrid/settings.json`.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::config_dir().context("No configuration directory for this platform")?;
        Self::open(dir.join("rtreegrid").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for JsonFileStorage {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
        self.dirty = true;
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, text)
            .with_context(|| format!("Failed to write settings file: {}", self.path.display()))?;
        self.dirty = false;
        Ok(())
    }
}

/// Coordinates generic settings persistence.
///
/// Provides type-safe loading and saving of any serializable setting.
pub struct SettingsCoordinator;

impl SettingsCoordinator {
    /// Loads a setting with a default fallback.
    ///
    /// # Arguments
    /// * `storage` - The storage to read from, if any
    /// * `key` - The storage key for this setting
    ///
    /// # Returns
    /// The deserialized value if found and valid, otherwise `T::default()`
    pub fn load_setting<T>(storage: Option<&dyn Storage>, key: &str) -> T
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        Self::try_load_setting(storage, key).unwrap_or_default()
    }

    /// Loads a setting with a custom default.
    pub fn load_setting_or<T>(storage: Option<&dyn Storage>, key: &str, default: T) -> T
    where
        T: for<'de> Deserialize<'de>,
    {
        Self::try_load_setting(storage, key).unwrap_or(default)
    }

    /// Attempts to load a setting.
    ///
    /// # Returns
    /// `Some(value)` if found and valid, `None` otherwise
    pub fn try_load_setting<T>(storage: Option<&dyn Storage>, key: &str) -> Option<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let json_str = storage?.get_string(key)?;
        match serde_json::from_str(&json_str) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("ignoring unreadable setting '{key}': {err}");
                None
            }
        }
    }

    /// Saves a setting and flushes the storage.
    ///
    /// # Arguments
    /// * `storage` - The storage to write to
    /// * `key` - The storage key for this setting
    /// * `value` - The value to serialize and save
    pub fn save_setting<T>(storage: &mut dyn Storage, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let json_str = serde_json::to_string(value)
            .with_context(|| format!("Failed to serialize setting '{key}'"))?;
        storage.set_string(key, json_str);
        storage.flush()
    }
}
