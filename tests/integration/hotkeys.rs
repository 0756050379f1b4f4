//! Hotkey registry and backend adapter behavior through the public API.
mod common;

use bindkit::{
    error::HotkeyError,
    events::{Event, EventBus},
    hotkey::{
        backend::{HotkeyAdapter, NullHotkeyApi},
        keys,
        registry::HotkeyRegistry,
    },
};
use common::settings;
use tempfile::tempdir;

#[test]
fn conflict_is_reported_with_the_existing_owner() {
    let temp = tempdir().unwrap();
    let registry = HotkeyRegistry::load(settings(temp.path()), EventBus::new());

    registry.add("script_a", "Ctrl+Alt+T").unwrap();
    match registry.add("script_b", "Ctrl+Alt+T") {
        Err(HotkeyError::Conflict { existing, .. }) => assert_eq!(existing, "script_a"),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(registry.name_for("Ctrl+Alt+T").as_deref(), Some("script_a"));
}

#[test]
fn reserved_combinations_are_refused() {
    let temp = tempdir().unwrap();
    let registry = HotkeyRegistry::load(settings(temp.path()), EventBus::new());

    for chord in ["Alt+F4", "Ctrl+C", "Win+L", "Ctrl+Alt+Delete"] {
        assert!(
            matches!(registry.add("x", chord), Err(HotkeyError::Reserved(_))),
            "{chord} must be reserved"
        );
    }
}

#[test]
fn registry_persists_and_indexes_stay_inverse() {
    let temp = tempdir().unwrap();
    let store = settings(temp.path());

    {
        let registry = HotkeyRegistry::load(store.clone(), EventBus::new());
        registry.add("a", "ctrl+alt+1").unwrap();
        registry.add("b", "CTRL + ALT + 2").unwrap();
        registry.remove("a");
        registry.add("c", "Ctrl+Alt+1").unwrap();
        assert!(registry.indexes_consistent());
    }

    let reloaded = HotkeyRegistry::load(store, EventBus::new());
    assert!(reloaded.indexes_consistent());
    assert_eq!(reloaded.chord_for("b").as_deref(), Some("Ctrl+Alt+2"));
    assert_eq!(reloaded.chord_for("c").as_deref(), Some("Ctrl+Alt+1"));
    assert!(reloaded.chord_for("a").is_none());
}

#[test]
fn chord_normalization_is_canonical() {
    assert_eq!(keys::normalize_chord(" alt + ctrl + h "), "Ctrl+Alt+H");
    assert_eq!(keys::normalize_chord("SUPER+space"), "Win+Space");
    assert_eq!(keys::normalize_chord("shift+ctrl+pageup"), "Ctrl+Shift+Pageup");
}

#[test]
fn pressing_a_registered_chord_dispatches_once() {
    let events = EventBus::new();
    let rx = events.subscribe();
    let adapter = HotkeyAdapter::new(NullHotkeyApi::default(), events);

    adapter.register("toggle.py", "Ctrl+Alt+H").unwrap();
    adapter.dispatch_chord("ctrl+alt+h");

    let mut triggers = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, Event::HotkeyTriggered { ref name, .. } if name == "toggle.py")
        {
            triggers += 1;
        }
    }
    assert_eq!(triggers, 1);

    // After removal the press goes nowhere.
    assert!(adapter.unregister("toggle.py"));
    adapter.dispatch_chord("Ctrl+Alt+H");
    let mut late_triggers = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, Event::HotkeyTriggered { .. }) {
            late_triggers += 1;
        }
    }
    assert_eq!(late_triggers, 0);
}

#[test]
fn validate_all_reports_liveness_per_binding() {
    let events = EventBus::new();
    let adapter = HotkeyAdapter::new(NullHotkeyApi::default(), events);

    adapter.register("a.py", "Ctrl+Alt+1").unwrap();
    adapter.register("b.py", "Ctrl+Alt+2").unwrap();

    let statuses = adapter.validate_all();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.values().all(|status| status.registered));

    adapter.unregister_all();
    assert!(adapter.validate_all().is_empty());
    assert!(adapter.registered().is_empty());
}

#[test]
fn invalid_chords_emit_registration_failures() {
    let events = EventBus::new();
    let rx = events.subscribe();
    let adapter = HotkeyAdapter::new(NullHotkeyApi::default(), events);

    assert!(adapter.register("x.py", "Ctrl+NOPE+Q").is_err());

    let failure = std::iter::from_fn(|| rx.try_recv().ok())
        .any(|event| matches!(event, Event::HotkeyRegistrationFailed { .. }));
    assert!(failure);
}
