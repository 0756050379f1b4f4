//! Shared fixtures for the integration suite.
#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use bindkit::settings::SettingsStore;

/// Path of the python3 interpreter, when one is on PATH. Tests that spawn
/// real scripts return early without it.
pub fn python3() -> Option<PathBuf> {
    which::which("python3").ok()
}

/// Opens a settings store scoped to the test directory.
pub fn settings(dir: &Path) -> SettingsStore {
    SettingsStore::open(&dir.join("settings.json")).expect("open settings store")
}

/// Writes a script fixture under `<dir>/scripts/` and returns its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let scripts = dir.join("scripts");
    fs::create_dir_all(&scripts).expect("create scripts dir");
    let path = scripts.join(name);
    fs::write(&path, body).expect("write script fixture");
    path
}

/// Polls `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}
