//! Persisted device settings and the schema the configuration form is built from.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

#[cfg(target_os = "espidf")]
mod nvs;
#[cfg(target_os = "espidf")]
pub use nvs::NvsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Password,
    Number,
}

impl FieldKind {
    pub fn input_type(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Password => "password",
            FieldKind::Number => "number",
        }
    }
}

#[derive(Debug)]
pub struct Field {
    /// NVS key, at most 15 characters.
    pub key: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub max_len: usize,
}

pub const FIELDS: &[Field] = &[
    Field {
        key: "ssid",
        label: "WiFi network",
        kind: FieldKind::Text,
        max_len: 32,
    },
    Field {
        key: "pass",
        label: "WiFi password",
        kind: FieldKind::Password,
        max_len: 64,
    },
    Field {
        key: "hostname",
        label: "Hostname",
        kind: FieldKind::Text,
        max_len: 32,
    },
    Field {
        key: "mqtt_broker",
        label: "MQTT broker",
        kind: FieldKind::Text,
        max_len: 64,
    },
    Field {
        key: "mqtt_port",
        label: "MQTT port",
        kind: FieldKind::Number,
        max_len: 5,
    },
    Field {
        key: "led_count",
        label: "Number of LEDs",
        kind: FieldKind::Number,
        max_len: 5,
    },
    Field {
        key: "brightness",
        label: "Brightness (0-255)",
        kind: FieldKind::Number,
        max_len: 3,
    },
];

/// Longest value, in bytes, a store has to read back.
pub const MAX_STORED_LEN: usize = 127;

/// Keys that must be present before the device can leave the portal for normal operation.
pub const REQUIRED_KEYS: &[&str] = &["ssid", "pass"];

pub fn field(key: &str) -> Option<&'static Field> {
    FIELDS.iter().find(|f| f.key == key)
}

/// A submitted value longer than its field allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TooLong {
    pub key: &'static str,
    pub max_len: usize,
}

impl std::fmt::Display for TooLong {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "value for {} is longer than {} bytes", self.key, self.max_len)
    }
}

impl std::error::Error for TooLong {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<&'static str, String>,
}

impl Settings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Keys outside the schema are dropped.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        match field(key) {
            Some(f) => {
                self.values.insert(f.key, value.into());
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        REQUIRED_KEYS
            .iter()
            .all(|k| self.get(k).is_some_and(|v| !v.is_empty()))
    }

    /// Picks the schema fields out of a submitted JSON object.
    ///
    /// Strings are taken verbatim, numbers and booleans in their JSON text form.
    /// Anything else is skipped. A value over its field's `max_len` bytes
    /// rejects the whole submission.
    pub fn from_submission(fields: &Map<String, Value>) -> Result<Self, TooLong> {
        let mut settings = Settings::default();
        for (key, value) in fields {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    log::warn!("Ignoring non-scalar value for {}", key);
                    continue;
                }
            };
            match field(key) {
                Some(f) if text.len() > f.max_len => {
                    return Err(TooLong {
                        key: f.key,
                        max_len: f.max_len,
                    })
                }
                Some(f) => {
                    settings.set(f.key, text);
                }
                None => log::debug!("Ignoring unknown config key {}", key),
            }
        }
        Ok(settings)
    }
}

/// Non-volatile key/value persistence for [`Settings`].
pub trait SettingsStore {
    fn load_all(&self) -> anyhow::Result<Settings>;

    /// Writes every key present in `settings`, leaving the others untouched.
    fn save(&mut self, settings: &Settings) -> anyhow::Result<()>;
}

/// Volatile store, used before NVS is available and in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    pub settings: Settings,
    pub saves: usize,
}

impl SettingsStore for MemoryStore {
    fn load_all(&self) -> anyhow::Result<Settings> {
        Ok(self.settings.clone())
    }

    fn save(&mut self, settings: &Settings) -> anyhow::Result<()> {
        for (k, v) in settings.iter() {
            self.settings.set(k, v);
        }
        self.saves += 1;
        Ok(())
    }
}
