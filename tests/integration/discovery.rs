//! Discovery behavior across the local scripts directory and external
//! registrations.
mod common;

use std::collections::BTreeMap;

use bindkit::{
    analyzer::{ExecutionStrategy, ScriptKind},
    collection::ScriptCollection,
    events::EventBus,
    loader::ScriptLoader,
};
use common::{settings, write_script};
use tempfile::tempdir;

#[test]
fn two_discover_calls_return_identical_order() {
    let temp = tempdir().unwrap();
    write_script(temp.path(), "gamma.py", "print('g')\n");
    write_script(temp.path(), "beta.sh", "echo b\n");
    write_script(temp.path(), "Alpha.py", "print('a')\n");
    write_script(temp.path(), "delta.bat", "@echo off\necho d\n");

    let settings = settings(temp.path());
    let mut loader = ScriptLoader::new(temp.path().join("scripts"), settings);

    let first: Vec<String> = loader
        .discover()
        .iter()
        .map(|info| info.identifier.clone())
        .collect();
    for _ in 0..3 {
        let again: Vec<String> = loader
            .discover()
            .iter()
            .map(|info| info.identifier.clone())
            .collect();
        assert_eq!(first, again);
    }
    assert_eq!(first, vec!["alpha.py", "beta.sh", "delta.bat", "gamma.py"]);
}

#[test]
fn kinds_route_to_their_strategies() {
    let temp = tempdir().unwrap();
    write_script(temp.path(), "job.ps1", "param([string]$Name)\nWrite-Output $Name\n");
    write_script(temp.path(), "job.bat", "@echo off\necho %1\n");
    write_script(temp.path(), "job.sh", "echo $1\n");
    write_script(
        temp.path(),
        "job.py",
        "if __name__ == \"__main__\":\n    print('py')\n",
    );

    let settings = settings(temp.path());
    let mut loader = ScriptLoader::new(temp.path().join("scripts"), settings);
    loader.discover();

    let cases = [
        ("job.ps1", ScriptKind::PowerShell, ExecutionStrategy::PowerShell),
        ("job.bat", ScriptKind::Batch, ExecutionStrategy::Batch),
        ("job.sh", ScriptKind::Shell, ExecutionStrategy::Shell),
        ("job.py", ScriptKind::Python, ExecutionStrategy::Subprocess),
    ];
    for (identifier, kind, strategy) in cases {
        let info = loader.get(identifier).expect(identifier);
        assert_eq!(info.kind, kind);
        assert_eq!(info.strategy, strategy);
    }
}

#[test]
fn failed_and_skipped_scripts_never_enter_the_catalog() {
    let temp = tempdir().unwrap();
    write_script(temp.path(), "__helper.py", "print('hidden')\n");
    write_script(temp.path(), "broken.py", "");
    write_script(temp.path(), "notes.xyz", "whatever");
    write_script(temp.path(), "fine.py", "print('ok')\n");

    let settings = settings(temp.path());
    let mut loader = ScriptLoader::new(temp.path().join("scripts"), settings);
    let scripts = loader.discover();

    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].identifier, "fine.py");

    let failed = loader.failed_scripts();
    assert!(failed.contains_key("broken.py"));
    assert!(!failed.contains_key("__helper.py"));
}

#[test]
fn collection_filters_disabled_and_dead_external_entries() {
    let temp = tempdir().unwrap();
    write_script(temp.path(), "keep.py", "print('k')\n");
    write_script(temp.path(), "drop.py", "print('d')\n");

    let external = temp.path().join("external.py");
    std::fs::write(&external, "print('e')\n").unwrap();

    let settings = settings(temp.path());
    let loader = ScriptLoader::new(temp.path().join("scripts"), settings.clone());
    let collection = ScriptCollection::new(loader, settings, EventBus::new());
    collection.discover();
    assert!(collection.add_external("Extra", &external));
    assert_eq!(collection.available_scripts().len(), 3);

    collection.disable("Drop");
    std::fs::remove_file(&external).unwrap();

    let available: Vec<String> = collection
        .available_scripts()
        .iter()
        .map(|info| info.identifier.clone())
        .collect();
    assert_eq!(available, vec!["keep.py"]);
}

#[test]
fn custom_names_override_display_names() {
    let temp = tempdir().unwrap();
    write_script(temp.path(), "sync_files.py", "print('s')\n");

    let settings = settings(temp.path());
    settings.set(
        "scripts/custom_names/Sync Files",
        serde_json::Value::String("Mirror".to_string()),
    );

    let loader = ScriptLoader::new(temp.path().join("scripts"), settings.clone());
    let collection = ScriptCollection::new(loader, settings, EventBus::new());
    collection.discover();

    let info = collection.get("sync_files.py").unwrap();
    assert_eq!(info.display_name, "Sync Files");
    assert_eq!(collection.display_name(&info), "Mirror");
}

#[test]
fn saved_arguments_round_trip_with_presets() {
    let temp = tempdir().unwrap();
    write_script(temp.path(), "deploy.py", "print('d')\n");

    let settings = settings(temp.path());
    let loader = ScriptLoader::new(temp.path().join("scripts"), settings.clone());
    let collection = ScriptCollection::new(loader, settings.clone(), EventBus::new());
    collection.discover();

    let mut args = BTreeMap::new();
    args.insert("target".to_string(), "prod".to_string());
    settings.set_preset("deploy.py", "production", &args);

    assert_eq!(
        collection.preset_arguments("deploy.py", "production").unwrap(),
        args
    );
    assert!(collection.preset_arguments("deploy.py", "staging").is_none());
}
