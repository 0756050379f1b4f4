//! Persisted hotkey bindings with conflict rules.
//!
//! The registry keeps a forward (name to chord) and reverse (chord to name)
//! index under one mutex so the pair can never diverge. Every mutation is
//! persisted to the settings store before the matching event is published.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};

use crate::{
    error::HotkeyError,
    events::{Event, EventBus},
    hotkey::keys,
    settings::SettingsStore,
};

struct Indexes {
    forward: BTreeMap<String, String>,
    reverse: BTreeMap<String, String>,
}

/// Name-to-chord registry backing the persisted hotkey settings group.
#[derive(Clone)]
pub struct HotkeyRegistry {
    indexes: Arc<Mutex<Indexes>>,
    settings: SettingsStore,
    events: EventBus,
}

impl HotkeyRegistry {
    /// Creates a registry seeded from the persisted bindings.
    pub fn load(settings: SettingsStore, events: EventBus) -> Self {
        let mut forward = BTreeMap::new();
        let mut reverse = BTreeMap::new();

        for (name, chord) in settings.hotkeys() {
            let normalized = keys::normalize_chord(&chord);
            if let Some(existing) = reverse.get(&normalized) {
                warn!(
                    "Dropping persisted hotkey {normalized} for '{name}': already bound to '{existing}'"
                );
                continue;
            }
            reverse.insert(normalized.clone(), name.clone());
            forward.insert(name, normalized);
        }

        debug!("Hotkey registry loaded with {} bindings", forward.len());
        Self {
            indexes: Arc::new(Mutex::new(Indexes { forward, reverse })),
            settings,
            events,
        }
    }

    /// Binds `chord` to `name`. Rejects empty inputs, reserved combinations,
    /// and chords owned by another target; rebinding the same pair is a
    /// no-op.
    pub fn add(&self, name: &str, chord: &str) -> Result<(), HotkeyError> {
        if name.trim().is_empty() {
            return Err(HotkeyError::EmptyName);
        }
        if chord.trim().is_empty() {
            return Err(HotkeyError::EmptyChord);
        }

        let normalized = keys::normalize_chord(chord);
        keys::parse_chord(&normalized)?;
        if keys::is_reserved(&normalized) {
            return Err(HotkeyError::Reserved(normalized));
        }

        let (replaced, previous) = {
            let mut indexes = self.indexes.lock().unwrap();

            if let Some(existing) = indexes.reverse.get(&normalized) {
                if existing == name {
                    return Ok(());
                }
                return Err(HotkeyError::Conflict {
                    chord: normalized,
                    existing: existing.clone(),
                });
            }

            let previous = indexes.forward.insert(name.to_string(), normalized.clone());
            if let Some(ref old_chord) = previous {
                indexes.reverse.remove(old_chord);
            }
            indexes.reverse.insert(normalized.clone(), name.to_string());
            (previous.is_some(), previous)
        };

        self.settings.set_hotkey(name, &normalized);
        if replaced {
            info!(
                "Updated hotkey for '{name}': {:?} -> {normalized}",
                previous.as_deref().unwrap_or_default()
            );
            self.events.publish(Event::HotkeyUpdated {
                name: name.to_string(),
                chord: normalized,
            });
        } else {
            info!("Registered hotkey {normalized} for '{name}'");
            self.events.publish(Event::HotkeyAdded {
                name: name.to_string(),
                chord: normalized,
            });
        }
        Ok(())
    }

    /// Removes the binding for `name`. Removing an unbound name is a no-op.
    pub fn remove(&self, name: &str) {
        let removed = {
            let mut indexes = self.indexes.lock().unwrap();
            match indexes.forward.remove(name) {
                Some(chord) => {
                    indexes.reverse.remove(&chord);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.settings.remove_hotkey(name);
            info!("Unregistered hotkey for '{name}'");
            self.events.publish(Event::HotkeyRemoved(name.to_string()));
        }
    }

    /// The chord bound to `name`, if any.
    pub fn chord_for(&self, name: &str) -> Option<String> {
        self.indexes.lock().unwrap().forward.get(name).cloned()
    }

    /// The target bound to `chord`, if any.
    pub fn name_for(&self, chord: &str) -> Option<String> {
        let normalized = keys::normalize_chord(chord);
        self.indexes.lock().unwrap().reverse.get(&normalized).cloned()
    }

    /// Every binding, name to chord.
    pub fn all(&self) -> BTreeMap<String, String> {
        self.indexes.lock().unwrap().forward.clone()
    }

    /// Whether `chord` can be bound, optionally ignoring the binding of one
    /// target (the script currently being edited in the settings dialog).
    pub fn is_available(&self, chord: &str, exclude: Option<&str>) -> bool {
        let normalized = keys::normalize_chord(chord);
        if keys::is_reserved(&normalized) {
            return false;
        }
        match self.name_for(&normalized) {
            Some(owner) => exclude == Some(owner.as_str()),
            None => true,
        }
    }

    /// Validates a chord for the settings dialog without mutating anything.
    pub fn validate_chord(&self, chord: &str) -> Result<(), HotkeyError> {
        if chord.trim().is_empty() {
            return Err(HotkeyError::EmptyChord);
        }
        let normalized = keys::normalize_chord(chord);
        keys::parse_chord(&normalized)?;
        if keys::is_reserved(&normalized) {
            return Err(HotkeyError::Reserved(normalized));
        }
        if let Some(existing) = self.name_for(&normalized) {
            return Err(HotkeyError::Conflict {
                chord: normalized,
                existing,
            });
        }
        Ok(())
    }

    /// Checks that the forward and reverse indexes are mutual inverses.
    pub fn indexes_consistent(&self) -> bool {
        let indexes = self.indexes.lock().unwrap();
        indexes.forward.len() == indexes.reverse.len()
            && indexes
                .forward
                .iter()
                .all(|(name, chord)| indexes.reverse.get(chord) == Some(name))
    }
}
