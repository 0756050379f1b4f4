//! Helpers for resolving per-user runtime paths.
use std::{
    env,
    path::PathBuf,
    sync::{OnceLock, RwLock},
};

#[cfg(test)]
use std::path::Path;

use crate::constants::SERVICE_LOG_DIR_NAME;

#[derive(Debug, Clone)]
struct RuntimeContext {
    state_dir: PathBuf,
    log_dir: PathBuf,
    config_dir: PathBuf,
}

static CONTEXT: OnceLock<RwLock<RuntimeContext>> = OnceLock::new();

fn context_lock() -> &'static RwLock<RuntimeContext> {
    CONTEXT.get_or_init(|| RwLock::new(RuntimeContext::from_env()))
}

impl RuntimeContext {
    fn from_env() -> Self {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::from_user_home(home)
    }

    fn from_user_home(home: PathBuf) -> Self {
        let state_dir = home.join(".local/share/bindkit");
        let log_dir = state_dir.join("logs");
        let config_dir = home.join(".config/bindkit");

        Self {
            state_dir,
            log_dir,
            config_dir,
        }
    }
}

/// Re-resolves the runtime directories from the current environment.
/// Subsequent calls overwrite the active configuration.
pub fn init() {
    let mut guard = context_lock().write().expect("runtime context poisoned");
    *guard = RuntimeContext::from_env();
}

#[cfg(test)]
pub fn init_with_test_home(home: &Path) {
    let mut guard = context_lock().write().expect("runtime context poisoned");
    *guard = RuntimeContext::from_user_home(home.to_path_buf());
}

/// Returns the root directory for runtime state (settings, lock files).
pub fn state_dir() -> PathBuf {
    context_lock()
        .read()
        .expect("runtime context poisoned")
        .state_dir
        .clone()
}

/// Returns the directory where log files reside.
pub fn log_dir() -> PathBuf {
    context_lock()
        .read()
        .expect("runtime context poisoned")
        .log_dir
        .clone()
}

/// Returns the directory where per-service log files reside.
pub fn service_log_dir() -> PathBuf {
    log_dir().join(SERVICE_LOG_DIR_NAME)
}

/// Returns the per-user configuration directory.
pub fn config_dir() -> PathBuf {
    context_lock()
        .read()
        .expect("runtime context poisoned")
        .config_dir
        .clone()
}

/// Returns the path of the persisted settings file.
pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::env_lock;
    use tempfile::tempdir;

    #[test]
    fn paths_are_home_scoped() {
        let _guard = env_lock();
        let temp = tempdir().expect("tempdir");
        let home = temp.path();

        init_with_test_home(home);

        let expected_state = home.join(".local/share/bindkit");
        assert_eq!(state_dir(), expected_state);
        assert_eq!(log_dir(), expected_state.join("logs"));
        assert_eq!(service_log_dir(), expected_state.join("logs/services"));
        assert_eq!(config_dir(), home.join(".config/bindkit"));
        assert_eq!(settings_path(), home.join(".config/bindkit/settings.json"));
    }
}
