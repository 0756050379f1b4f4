//! JSON-backed key/value settings store with grouped reads and change
//! notifications.
//!
//! Keys are `/`-separated paths (`behavior/close_to_tray`,
//! `scripts/hotkeys/<identifier>`). Reads of missing keys return typed
//! defaults; writes are flushed to disk before subscribers are notified, and
//! a failed flush is logged and retried once without surfacing to the caller.
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, mpsc},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    constants::{
        DEFAULT_AUTO_RESTART, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_DELAY_SECONDS,
        DEFAULT_SCRIPT_TIMEOUT_SECONDS, KEY_ARGS_PREFIX, KEY_CUSTOM_NAME_PREFIX,
        KEY_DISABLED_SCRIPTS, KEY_EXTERNAL_PREFIX, KEY_HOTKEY_PREFIX,
        KEY_PRESET_PREFIX, KEY_SCHEDULE_PREFIX, KEY_SCRIPT_TIMEOUT,
        KEY_SERVICE_PREFIX,
    },
    error::SettingsError,
};

/// Per-service supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Whether the script runs with the Service strategy.
    #[serde(default)]
    pub enabled: bool,
    /// Whether crashes trigger automatic restarts.
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,
    /// Bound on automatic restarts per service lifetime.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Delay before an automatic restart attempt.
    #[serde(default = "default_restart_delay")]
    pub restart_delay_seconds: u64,
}

fn default_auto_restart() -> bool {
    DEFAULT_AUTO_RESTART
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_restart_delay() -> u64 {
    DEFAULT_RESTART_DELAY_SECONDS
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_restart: DEFAULT_AUTO_RESTART,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_delay_seconds: DEFAULT_RESTART_DELAY_SECONDS,
        }
    }
}

/// Per-script schedule settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Whether the schedule should be active.
    #[serde(default)]
    pub enabled: bool,
    /// Schedule kind: `"interval"` or `"cron"`.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Interval between executions, for interval schedules.
    #[serde(default)]
    pub interval_seconds: u64,
    /// CRON expression, for CRON schedules.
    #[serde(default)]
    pub cron_expression: String,
    /// Epoch seconds of the last completed run.
    #[serde(default)]
    pub last_run: Option<f64>,
    /// Epoch seconds of the next planned run.
    #[serde(default)]
    pub next_run: Option<f64>,
}

struct Inner {
    path: PathBuf,
    values: BTreeMap<String, Value>,
    subscribers: Vec<mpsc::Sender<String>>,
}

/// Thread-safe settings store shared across the runtime.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Mutex<Inner>>,
}

impl SettingsStore {
    /// Opens (or creates) the settings file at `path`.
    pub fn open(path: &Path) -> Result<Self, SettingsError> {
        let values = if path.exists() {
            let raw = fs::read_to_string(path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                path: path.to_path_buf(),
                values,
                subscribers: Vec::new(),
            })),
        })
    }

    /// Subscribes to change notifications. Each write delivers the changed
    /// key after the new value has been flushed to disk.
    pub fn subscribe(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        self.inner.lock().unwrap().subscribers.push(tx);
        rx
    }

    /// Returns the raw value stored at `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().values.get(key).cloned()
    }

    /// Returns the boolean at `key`, or `default` when missing or mistyped.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => b,
            _ => default,
        }
    }

    /// Returns the unsigned integer at `key`, or `default`.
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
            _ => default,
        }
    }

    /// Returns the float at `key`, if present.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// Returns the string at `key`, if present and non-empty.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Stores `value` at `key`, flushes to disk, and notifies subscribers.
    pub fn set(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.values.insert(key.to_string(), value);
        Self::flush(&inner);
        Self::notify(&mut inner, key);
    }

    /// Removes `key`, flushes, and notifies subscribers. Removing a missing
    /// key is a no-op.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.values.remove(key).is_none() {
            return;
        }
        Self::flush(&inner);
        Self::notify(&mut inner, key);
    }

    /// Returns every entry under `prefix/`, with the prefix stripped.
    pub fn group(&self, prefix: &str) -> BTreeMap<String, Value> {
        let needle = format!("{prefix}/");
        let inner = self.inner.lock().unwrap();
        inner
            .values
            .range(needle.clone()..)
            .take_while(|(k, _)| k.starts_with(&needle))
            .map(|(k, v)| (k[needle.len()..].to_string(), v.clone()))
            .collect()
    }

    fn flush(inner: &Inner) {
        if let Err(first) = Self::write_to_disk(inner) {
            warn!(
                "Failed to persist settings to {:?}: {first}; retrying once",
                inner.path
            );
            if let Err(second) = Self::write_to_disk(inner) {
                warn!("Settings retry also failed: {second}");
            }
        }
    }

    fn write_to_disk(inner: &Inner) -> Result<(), std::io::Error> {
        if let Some(parent) = inner.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data =
            serde_json::to_string_pretty(&inner.values).map_err(std::io::Error::other)?;
        fs::write(&inner.path, data)
    }

    fn notify(inner: &mut Inner, key: &str) {
        inner
            .subscribers
            .retain(|tx| tx.send(key.to_string()).is_ok());
    }

    // ------------------------------------------------------------------
    // Typed accessors for well-known groups
    // ------------------------------------------------------------------

    /// Per-installation execution timeout.
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64(KEY_SCRIPT_TIMEOUT, DEFAULT_SCRIPT_TIMEOUT_SECONDS))
    }

    /// Whether per-script result notifications are enabled.
    pub fn show_script_notifications(&self) -> bool {
        self.get_bool("behavior/show_script_notifications", true)
    }

    /// Whether the single-instance lock is enforced.
    pub fn single_instance(&self) -> bool {
        self.get_bool("behavior/single_instance", true)
    }

    /// Configured external scripts as display-name to absolute-path pairs.
    pub fn external_scripts(&self) -> BTreeMap<String, String> {
        self.group(KEY_EXTERNAL_PREFIX)
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::String(path) => Some((name, path)),
                _ => None,
            })
            .collect()
    }

    /// Registers an external script path under its display name.
    pub fn set_external_script(&self, name: &str, path: &str) {
        self.set(
            &format!("{KEY_EXTERNAL_PREFIX}/{name}"),
            Value::String(path.to_string()),
        );
    }

    /// Removes an external script registration.
    pub fn remove_external_script(&self, name: &str) {
        self.remove(&format!("{KEY_EXTERNAL_PREFIX}/{name}"));
    }

    /// The set of disabled scripts, keyed by original display name.
    pub fn disabled_scripts(&self) -> BTreeSet<String> {
        match self.get(KEY_DISABLED_SCRIPTS) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Replaces the disabled-script set.
    pub fn set_disabled_scripts(&self, names: &BTreeSet<String>) {
        let list: Vec<Value> =
            names.iter().map(|n| Value::String(n.clone())).collect();
        self.set(KEY_DISABLED_SCRIPTS, Value::Array(list));
    }

    /// User-chosen display name override for `original`, if set.
    pub fn custom_name(&self, original: &str) -> Option<String> {
        self.get_string(&format!("{KEY_CUSTOM_NAME_PREFIX}/{original}"))
    }

    /// Display name to present for `original`: the custom override when one
    /// exists, otherwise `original` itself.
    pub fn effective_name(&self, original: &str) -> String {
        self.custom_name(original)
            .unwrap_or_else(|| original.to_string())
    }

    /// Persisted hotkey bindings, identifier to chord.
    pub fn hotkeys(&self) -> BTreeMap<String, String> {
        self.group(KEY_HOTKEY_PREFIX)
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::String(chord) => Some((name, chord)),
                _ => None,
            })
            .collect()
    }

    /// Persists a hotkey binding.
    pub fn set_hotkey(&self, identifier: &str, chord: &str) {
        self.set(
            &format!("{KEY_HOTKEY_PREFIX}/{identifier}"),
            Value::String(chord.to_string()),
        );
    }

    /// Removes a persisted hotkey binding.
    pub fn remove_hotkey(&self, identifier: &str) {
        self.remove(&format!("{KEY_HOTKEY_PREFIX}/{identifier}"));
    }

    /// Supervision settings for `identifier`, falling back to defaults.
    pub fn service_settings(&self, identifier: &str) -> ServiceSettings {
        self.get(&format!("{KEY_SERVICE_PREFIX}/{identifier}"))
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Persists supervision settings for `identifier`.
    pub fn set_service_settings(&self, identifier: &str, settings: &ServiceSettings) {
        match serde_json::to_value(settings) {
            Ok(value) => self.set(&format!("{KEY_SERVICE_PREFIX}/{identifier}"), value),
            Err(err) => warn!("Failed to encode service settings: {err}"),
        }
    }

    /// Whether `identifier` is configured to run as a service.
    pub fn is_script_service(&self, identifier: &str) -> bool {
        self.service_settings(identifier).enabled
    }

    /// Identifiers of every script with service mode enabled.
    pub fn service_script_names(&self) -> BTreeSet<String> {
        self.group(KEY_SERVICE_PREFIX)
            .into_iter()
            .filter(|(_, value)| {
                serde_json::from_value::<ServiceSettings>(value.clone())
                    .map(|s| s.enabled)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Schedule settings for `identifier`, if configured.
    pub fn schedule_settings(&self, identifier: &str) -> Option<ScheduleSettings> {
        self.get(&format!("{KEY_SCHEDULE_PREFIX}/{identifier}"))
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Persists the full schedule settings for `identifier`.
    pub fn set_schedule_settings(&self, identifier: &str, settings: &ScheduleSettings) {
        match serde_json::to_value(settings) {
            Ok(value) => self.set(&format!("{KEY_SCHEDULE_PREFIX}/{identifier}"), value),
            Err(err) => warn!("Failed to encode schedule settings: {err}"),
        }
    }

    /// Every identifier with schedule settings present.
    pub fn scheduled_script_names(&self) -> BTreeSet<String> {
        self.group(KEY_SCHEDULE_PREFIX)
            .into_keys()
            .collect()
    }

    /// Updates the persisted `last_run` timestamp for a schedule.
    pub fn set_schedule_last_run(&self, identifier: &str, timestamp: f64) {
        let mut settings = self.schedule_settings(identifier).unwrap_or_default();
        settings.last_run = Some(timestamp);
        self.set_schedule_settings(identifier, &settings);
    }

    /// Updates the persisted `next_run` timestamp for a schedule.
    pub fn set_schedule_next_run(&self, identifier: &str, timestamp: f64) {
        let mut settings = self.schedule_settings(identifier).unwrap_or_default();
        settings.next_run = Some(timestamp);
        self.set_schedule_settings(identifier, &settings);
    }

    /// Saved default arguments for `identifier`.
    pub fn script_arguments(&self, identifier: &str) -> BTreeMap<String, String> {
        self.argument_map(&format!("{KEY_ARGS_PREFIX}/{identifier}"))
    }

    /// Persists default arguments for `identifier`.
    pub fn set_script_arguments(
        &self,
        identifier: &str,
        arguments: &BTreeMap<String, String>,
    ) {
        let object: serde_json::Map<String, Value> = arguments
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.set(&format!("{KEY_ARGS_PREFIX}/{identifier}"), Value::Object(object));
    }

    /// A named argument preset for `identifier`, if present.
    pub fn preset(&self, identifier: &str, preset: &str) -> Option<BTreeMap<String, String>> {
        let key = format!("{KEY_PRESET_PREFIX}/{identifier}/{preset}");
        self.get(&key)?;
        Some(self.argument_map(&key))
    }

    /// Stores a named argument preset for `identifier`.
    pub fn set_preset(
        &self,
        identifier: &str,
        preset: &str,
        arguments: &BTreeMap<String, String>,
    ) {
        let object: serde_json::Map<String, Value> = arguments
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.set(
            &format!("{KEY_PRESET_PREFIX}/{identifier}/{preset}"),
            Value::Object(object),
        );
    }

    fn argument_map(&self, key: &str) -> BTreeMap<String, String> {
        match self.get(key) {
            Some(Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, text)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("SettingsStore")
            .field("path", &inner.path)
            .field("entries", &inner.values.len())
            .finish()
    }
}
