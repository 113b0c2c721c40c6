/*!
 # Application settings store

 A flat JSON map of named settings with typed defaults. A persisted value
 whose JSON type does not match its default is ignored and the default (or
 previously accepted value) is retained, so a corrupt entry can never
 poison the store.
*/

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::Result;

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "settings.json";
/// Profile collection file name
pub const PROFILES_FILE: &str = "led_profiles.json";
/// Legacy single-schedule file name, kept as migration input
pub const LEGACY_SCHEDULE_FILE: &str = "led_schedule.json";
/// Custom color store file name
pub const CUSTOM_COLORS_FILE: &str = "custom_colors.json";

/// Per-user configuration directory for all stores
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lamp-scheduler")
}

/// Setting keys with their typed defaults
fn default_settings() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("brightness_level".into(), Value::from(80));
    map.insert("last_device_name".into(), Value::from(""));
    map.insert("last_device_address".into(), Value::from(""));
    map.insert("auto_connect_on_startup".into(), Value::from(true));
    map.insert("start_with_system".into(), Value::from(false));
    map
}

fn same_type(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Null, Value::Null)
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
    )
}

/// The settings store. Every accepted mutation rewrites the whole file.
pub struct SettingsStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl SettingsStore {
    /// Loads settings from `dir`, falling back to defaults per key.
    ///
    /// Unknown keys in the file are dropped; known keys of the wrong type
    /// keep their default.
    pub fn load(dir: &Path) -> SettingsStore {
        let path = dir.join(SETTINGS_FILE);
        let mut values = default_settings();

        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(stored) => {
                    for (key, default) in values.clone() {
                        if let Some(value) = stored.get(&key) {
                            if same_type(value, &default) {
                                values.insert(key, value.clone());
                            } else {
                                warn!("Ignoring setting '{}' with wrong type", key);
                            }
                        }
                    }
                }
                Err(e) => warn!("Settings file {} is corrupt: {}", path.display(), e),
            },
            Err(_) => debug!("No settings file at {}, using defaults", path.display()),
        }

        SettingsStore { path, values }
    }

    /// Returns the value for `key`, or `Value::Null` for unknown keys
    pub fn get(&self, key: &str) -> Value {
        self.values.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Sets `key` to `value` and persists on success.
    ///
    /// Returns false (retaining the old value, writing nothing) when the
    /// key is unknown or the value's type does not match the default.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        let defaults = default_settings();
        let Some(default) = defaults.get(key) else {
            warn!("Ignoring unknown setting '{}'", key);
            return false;
        };
        if !same_type(&value, default) {
            warn!("Ignoring setting '{}' with wrong type", key);
            return false;
        }
        self.values.insert(key.to_string(), value);
        if let Err(e) = self.save() {
            warn!("Failed to persist settings: {}", e);
        }
        true
    }

    /// Remembered device, if any
    pub fn last_device(&self) -> Option<(String, String)> {
        let name = self.get_str("last_device_name")?;
        let address = self.get_str("last_device_address")?;
        if name.is_empty() || address.is_empty() {
            return None;
        }
        Some((name, address))
    }

    /// Persists the selected device as the remembered one
    pub fn set_last_device(&mut self, name: &str, address: &str) {
        self.set("last_device_name", Value::from(name));
        self.set("last_device_address", Value::from(address));
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.values)?)?;
        Ok(())
    }
}
