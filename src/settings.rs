//! Process-wide host options touched during a batch.
//!
//! Options like `CLIP_stop_at_last_layers` are shared by every job the host
//! runs, so a batch never writes them directly: it builds a
//! [`SettingsPatch`], applies it, and keeps the [`SettingsSnapshot`] needed
//! to put the old values back afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::field::Field;
use crate::resolver::ResolvedValue;

/// How the web UI spells a disabled hypernetwork in its options.
pub const DISABLED_OPTION: &str = "None";

/// Mutable host state the randomizer is allowed to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostState {
    pub options: BTreeMap<String, Value>,
    /// Progress bar total; `-1` until the host sizes it.
    pub job_count: i64,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            options: BTreeMap::new(),
            job_count: -1,
        }
    }
}

/// New option values drawn for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsPatch {
    entries: BTreeMap<Field, Value>,
}

/// Values the options held before a patch was applied. `None` marks an
/// option that did not exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsSnapshot {
    previous: BTreeMap<String, Option<Value>>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, field: Field) -> Option<&Value> {
        self.entries.get(&field)
    }

    /// Numeric text drawn for a numeric option is stored as a number.
    pub fn insert(&mut self, field: Field, value: &ResolvedValue) {
        let value = match value {
            ResolvedValue::Text(text) if field != Field::SdHypernetwork => numeric_text(text)
                .unwrap_or_else(|| option_value(value)),
            other => option_value(other),
        };
        self.entries.insert(field, value);
    }

    /// Payload for the `override_settings` member of a txt2img request.
    pub fn to_override_settings(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(field, value)| (field.name().to_string(), value.clone()))
            .collect();
        Value::Object(map)
    }
}

impl SettingsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

impl HostState {
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    /// Writes every patched option and returns what was there before.
    pub fn apply(&mut self, patch: &SettingsPatch) -> SettingsSnapshot {
        let mut snapshot = SettingsSnapshot::default();
        for (field, value) in &patch.entries {
            let name = field.name().to_string();
            let previous = self.options.insert(name.clone(), value.clone());
            snapshot.previous.entry(name).or_insert(previous);
        }
        snapshot
    }

    pub fn restore(&mut self, snapshot: &SettingsSnapshot) {
        for (name, previous) in &snapshot.previous {
            match previous {
                Some(value) => {
                    self.options.insert(name.clone(), value.clone());
                }
                None => {
                    self.options.remove(name);
                }
            }
        }
        log::debug!("Restored {} host options", snapshot.previous.len());
    }
}

fn numeric_text(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(json!(v));
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| json!(v))
}

fn option_value(value: &ResolvedValue) -> Value {
    match value {
        ResolvedValue::Int(v) => json!(v),
        ResolvedValue::Float(v) => json!(v),
        ResolvedValue::Text(v) => json!(v),
        ResolvedValue::Styles(v) => json!(v),
        ResolvedValue::Disabled => json!(DISABLED_OPTION),
    }
}
