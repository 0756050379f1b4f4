//! Backend adapter between the registry and the OS hotkey primitive.
//!
//! The OS side is abstracted as [`NativeHotkeyApi`]: register a
//! `(modifiers, key)` pair under a numeric id, unregister by id, and deliver
//! trigger messages by id. The adapter owns id allocation, liveness
//! validation via a sentinel probe, and orphan cleanup after an abnormal
//! shutdown.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use tracing::{debug, error, info, warn};

use crate::{
    error::HotkeyError,
    events::{Event, EventBus},
    hotkey::keys,
};

/// Sentinel id used for throwaway liveness probes; far above any live
/// binding id.
const VALIDATION_PROBE_ID: u32 = 99_999;

/// Id range swept for orphan registrations left by a prior abnormal
/// shutdown.
const ORPHAN_SWEEP_RANGE: std::ops::Range<u32> = 1..100;

/// Failure modes of the native registration primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeHotkeyError {
    /// The chord is held by another application
    /// (`ERROR_HOTKEY_ALREADY_REGISTERED` on Windows).
    AlreadyRegistered,
    /// The id has no live registration.
    NotRegistered,
    /// Any other OS-level failure.
    Os(String),
}

impl std::fmt::Display for NativeHotkeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRegistered => {
                write!(f, "hotkey is already registered by another application")
            }
            Self::NotRegistered => write!(f, "hotkey id is not registered"),
            Self::Os(detail) => write!(f, "{detail}"),
        }
    }
}

/// The OS primitive: register a chord under an id against a hidden native
/// window and receive trigger messages for it on the main event loop.
pub trait NativeHotkeyApi: Send {
    /// Registers `(modifiers, key)` under `id`.
    fn register(
        &mut self,
        id: u32,
        modifiers: u32,
        key: u16,
    ) -> Result<(), NativeHotkeyError>;

    /// Unregisters the registration held under `id`.
    fn unregister(&mut self, id: u32) -> Result<(), NativeHotkeyError>;
}

/// Liveness report for one binding.
#[derive(Debug, Clone)]
pub struct BindingStatus {
    /// The bound chord.
    pub chord: String,
    /// Whether the registration is still effective.
    pub registered: bool,
    /// Diagnostic when it is not.
    pub error: Option<String>,
}

/// Adapter that drives a [`NativeHotkeyApi`] from registry bindings.
pub struct HotkeyAdapter<B: NativeHotkeyApi> {
    api: Arc<Mutex<B>>,
    bindings: Arc<Mutex<HashMap<u32, (String, String)>>>,
    next_id: Arc<Mutex<u32>>,
    events: EventBus,
}

impl<B: NativeHotkeyApi> HotkeyAdapter<B> {
    /// Wraps a native API.
    pub fn new(api: B, events: EventBus) -> Self {
        Self {
            api: Arc::new(Mutex::new(api)),
            bindings: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            events,
        }
    }

    /// Registers a chord for `name` with the OS. Emits
    /// `registration_failed` and returns the error when the OS refuses.
    pub fn register(&self, name: &str, chord: &str) -> Result<(), HotkeyError> {
        let normalized = keys::normalize_chord(chord);
        let (modifiers, key) = match keys::parse_chord(&normalized) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.emit_failure(name, &normalized, &err.to_string());
                return Err(err);
            }
        };

        let id = {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let outcome = self.api.lock().unwrap().register(id, modifiers, key);
        match outcome {
            Ok(()) => {
                self.bindings
                    .lock()
                    .unwrap()
                    .insert(id, (name.to_string(), normalized.clone()));
                info!("Registered hotkey {normalized} for '{name}' (id: {id})");
                Ok(())
            }
            Err(NativeHotkeyError::AlreadyRegistered) => {
                let err = HotkeyError::ClaimedElsewhere(normalized.clone());
                self.emit_failure(name, &normalized, &err.to_string());
                Err(err)
            }
            Err(native) => {
                let err = HotkeyError::Backend {
                    chord: normalized.clone(),
                    reason: native.to_string(),
                };
                self.emit_failure(name, &normalized, &native.to_string());
                Err(err)
            }
        }
    }

    /// Unregisters the chord bound to `name`. Returns `false` when no such
    /// registration exists.
    pub fn unregister(&self, name: &str) -> bool {
        let found = {
            let bindings = self.bindings.lock().unwrap();
            bindings
                .iter()
                .find(|(_, (bound_name, _))| bound_name == name)
                .map(|(id, _)| *id)
        };

        let Some(id) = found else {
            warn!("No hotkey registered for '{name}'");
            return false;
        };

        if let Err(err) = self.api.lock().unwrap().unregister(id) {
            error!("Error unregistering hotkey for '{name}': {err}");
            return false;
        }
        self.bindings.lock().unwrap().remove(&id);
        info!("Unregistered hotkey for '{name}'");
        true
    }

    /// Unregisters every live binding, then sweeps a bounded id range to
    /// remove orphan registrations left by a prior abnormal shutdown.
    pub fn unregister_all(&self) {
        let ids: Vec<u32> = {
            let bindings = self.bindings.lock().unwrap();
            bindings.keys().copied().collect()
        };

        let mut api = self.api.lock().unwrap();
        for id in ids {
            if let Err(err) = api.unregister(id) {
                error!("Error unregistering hotkey {id}: {err}");
            }
        }
        self.bindings.lock().unwrap().clear();

        let mut orphans = 0;
        for id in ORPHAN_SWEEP_RANGE {
            if api.unregister(id).is_ok() {
                orphans += 1;
                debug!("Cleaned up orphaned hotkey id: {id}");
            }
        }
        if orphans > 0 {
            info!("Cleaned up {orphans} orphaned hotkey registrations");
        }
        info!("All hotkeys unregistered");
    }

    /// Probes every live binding with a throwaway registration under a
    /// sentinel id: success means the real registration still stands;
    /// an already-registered refusal means another application now owns
    /// the chord. The probe is unregistered immediately on success.
    pub fn validate_all(&self) -> BTreeMap<String, BindingStatus> {
        let bindings: Vec<(String, String)> = {
            let bindings = self.bindings.lock().unwrap();
            bindings.values().cloned().collect()
        };

        let mut statuses = BTreeMap::new();
        for (name, chord) in bindings {
            let status = match keys::parse_chord(&chord) {
                Err(err) => BindingStatus {
                    chord: chord.clone(),
                    registered: false,
                    error: Some(err.to_string()),
                },
                Ok((modifiers, key)) => {
                    let mut api = self.api.lock().unwrap();
                    match api.register(VALIDATION_PROBE_ID, modifiers, key) {
                        Ok(()) => {
                            let _ = api.unregister(VALIDATION_PROBE_ID);
                            BindingStatus {
                                chord: chord.clone(),
                                registered: true,
                                error: None,
                            }
                        }
                        Err(NativeHotkeyError::AlreadyRegistered) => BindingStatus {
                            chord: chord.clone(),
                            registered: false,
                            error: Some(
                                "Hotkey is registered by another application".to_string(),
                            ),
                        },
                        Err(other) => BindingStatus {
                            chord: chord.clone(),
                            registered: false,
                            error: Some(format!("Validation failed: {other}")),
                        },
                    }
                }
            };
            statuses.insert(name, status);
        }
        statuses
    }

    /// Dispatches an OS trigger message for `id` into the event bus.
    pub fn dispatch(&self, id: u32) {
        let binding = {
            let bindings = self.bindings.lock().unwrap();
            bindings.get(&id).cloned()
        };

        match binding {
            Some((name, chord)) => {
                info!("Hotkey {chord} triggered for '{name}'");
                self.events.publish(Event::HotkeyTriggered { name, chord });
            }
            None => warn!("Unknown hotkey id triggered: {id}"),
        }
    }

    /// Dispatches a trigger for a chord, resolving it to its binding id.
    /// Used by surfaces that synthesize presses (the launcher popup, tests).
    pub fn dispatch_chord(&self, chord: &str) {
        let normalized = keys::normalize_chord(chord);
        let id = {
            let bindings = self.bindings.lock().unwrap();
            bindings
                .iter()
                .find(|(_, (_, bound))| *bound == normalized)
                .map(|(id, _)| *id)
        };
        match id {
            Some(id) => self.dispatch(id),
            None => warn!("No binding for chord {normalized}"),
        }
    }

    /// Live bindings, name to chord.
    pub fn registered(&self) -> BTreeMap<String, String> {
        let bindings = self.bindings.lock().unwrap();
        bindings
            .values()
            .map(|(name, chord)| (name.clone(), chord.clone()))
            .collect()
    }

    fn emit_failure(&self, name: &str, chord: &str, reason: &str) {
        error!("Failed to register hotkey {chord} for '{name}': {reason}");
        self.events.publish(Event::HotkeyRegistrationFailed {
            name: name.to_string(),
            chord: chord.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Null backend for platforms without a native registration primitive; it
/// accepts every registration and never fires.
#[derive(Debug, Default)]
pub struct NullHotkeyApi {
    registered: HashMap<u32, (u32, u16)>,
}

impl NativeHotkeyApi for NullHotkeyApi {
    fn register(
        &mut self,
        id: u32,
        modifiers: u32,
        key: u16,
    ) -> Result<(), NativeHotkeyError> {
        self.registered.insert(id, (modifiers, key));
        Ok(())
    }

    fn unregister(&mut self, id: u32) -> Result<(), NativeHotkeyError> {
        match self.registered.remove(&id) {
            Some(_) => Ok(()),
            None => Err(NativeHotkeyError::NotRegistered),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeHotkeyApi;
    use super::*;

    fn adapter() -> (HotkeyAdapter<FakeHotkeyApi>, std::sync::mpsc::Receiver<Event>) {
        let events = EventBus::new();
        let rx = events.subscribe();
        (HotkeyAdapter::new(FakeHotkeyApi::default(), events), rx)
    }

    #[test]
    fn register_and_dispatch_round_trip() {
        let (adapter, rx) = adapter();
        adapter.register("toggle.py", "Ctrl+Alt+H").unwrap();

        let id = *adapter.bindings.lock().unwrap().keys().next().unwrap();
        adapter.dispatch(id);

        let triggered = std::iter::from_fn(|| rx.try_recv().ok()).any(|e| {
            matches!(e, Event::HotkeyTriggered { ref name, ref chord }
                if name == "toggle.py" && chord == "Ctrl+Alt+H")
        });
        assert!(triggered);

        assert!(adapter.unregister("toggle.py"));
        adapter.dispatch(id);
        let again = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| matches!(e, Event::HotkeyTriggered { .. }));
        assert!(!again);
    }

    #[test]
    fn foreign_claim_is_distinguished_from_other_failures() {
        let (adapter, rx) = adapter();
        {
            let mut api = adapter.api.lock().unwrap();
            let (mods, key) = keys::parse_chord("Ctrl+Alt+T").unwrap();
            api.foreign_claims.insert((mods, key));
        }

        let err = adapter.register("toggle.py", "Ctrl+Alt+T").unwrap_err();
        assert!(matches!(err, HotkeyError::ClaimedElsewhere(_)));

        let failure = std::iter::from_fn(|| rx.try_recv().ok()).find_map(|e| match e {
            Event::HotkeyRegistrationFailed { name, chord, reason } => {
                Some((name, chord, reason))
            }
            _ => None,
        });
        let (name, chord, reason) = failure.expect("registration_failed event");
        assert_eq!(name, "toggle.py");
        assert_eq!(chord, "Ctrl+Alt+T");
        assert!(reason.contains("another application"));
    }

    #[test]
    fn validate_all_reports_dead_bindings() {
        let (adapter, _rx) = adapter();
        adapter.register("alive.py", "Ctrl+Alt+A").unwrap();
        adapter.register("dead.py", "Ctrl+Alt+D").unwrap();

        // Another app takes over the second chord after our registration is
        // dropped behind our back.
        {
            let mut api = adapter.api.lock().unwrap();
            let (mods, key) = keys::parse_chord("Ctrl+Alt+D").unwrap();
            let stale: Vec<u32> = api
                .registered
                .iter()
                .filter(|&(_, &pair)| pair == (mods, key))
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                api.registered.remove(&id);
            }
            api.foreign_claims.insert((mods, key));
        }

        let statuses = adapter.validate_all();
        assert!(statuses["alive.py"].registered);
        assert!(!statuses["dead.py"].registered);
        assert!(
            statuses["dead.py"]
                .error
                .as_deref()
                .unwrap()
                .contains("another application")
        );

        // The probe id never lingers.
        assert!(
            !adapter
                .api
                .lock()
                .unwrap()
                .registered
                .contains_key(&VALIDATION_PROBE_ID)
        );
    }

    #[test]
    fn unregister_all_sweeps_orphans() {
        let (adapter, _rx) = adapter();
        adapter.register("a.py", "Ctrl+Alt+1").unwrap();
        {
            let mut api = adapter.api.lock().unwrap();
            api.preexisting_ids.insert(7);
            api.preexisting_ids.insert(42);
        }

        adapter.unregister_all();

        let api = adapter.api.lock().unwrap();
        assert!(api.registered.is_empty());
        assert!(api.preexisting_ids.is_empty());
        assert!(adapter.registered().is_empty());
    }

    #[test]
    fn duplicate_registration_through_the_null_api_succeeds() {
        let events = EventBus::new();
        let adapter = HotkeyAdapter::new(NullHotkeyApi::default(), events);
        adapter.register("a.py", "Ctrl+Alt+1").unwrap();
        adapter.register("b.py", "Ctrl+Alt+1").unwrap();
        assert_eq!(adapter.registered().len(), 2);
    }
}
