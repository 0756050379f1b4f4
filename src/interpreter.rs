//! Interpreter discovery and caching.
//!
//! Resolution order follows user configuration first, then PATH lookup, with
//! results memoized per kind behind a mutex so repeated executions do not
//! re-probe the filesystem. A `wsl:<distro>` pseudo-path marks shell
//! execution that must be routed through WSL.
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};

use crate::settings::SettingsStore;

/// Interpreter families the executor can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpreterKind {
    /// Python interpreter for scripts and in-process shims.
    Python,
    /// PowerShell Core or Windows PowerShell.
    PowerShell,
    /// Native bash or WSL.
    Bash,
    /// cmd.exe for batch scripts.
    Cmd,
}

/// Memoized path resolver for external interpreters.
#[derive(Clone)]
pub struct InterpreterResolver {
    settings: SettingsStore,
    cache: Arc<Mutex<HashMap<InterpreterKind, Option<String>>>>,
}

impl InterpreterResolver {
    /// Creates a resolver backed by the given settings store.
    pub fn new(settings: SettingsStore) -> Self {
        Self {
            settings,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves an interpreter path, consulting the cache first.
    pub fn resolve(&self, kind: InterpreterKind) -> Option<String> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(cached) = cache.get(&kind) {
            return cached.clone();
        }

        let resolved = match kind {
            InterpreterKind::Python => self.detect_python(),
            InterpreterKind::PowerShell => self.detect_powershell(),
            InterpreterKind::Bash => self.detect_bash(),
            InterpreterKind::Cmd => self.detect_cmd(),
        };
        cache.insert(kind, resolved.clone());
        resolved
    }

    /// Drops every memoized path, forcing fresh detection. Called when the
    /// interpreter settings group changes.
    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
        debug!("Interpreter cache cleared");
    }

    fn detect_python(&self) -> Option<String> {
        if let Some(custom) = self.settings.get_string("interpreters/python_path")
            && Path::new(&custom).exists()
        {
            return Some(custom);
        }

        for candidate in ["python3", "python"] {
            if let Ok(path) = which::which(candidate) {
                info!("Detected Python at: {}", path.display());
                return Some(path.to_string_lossy().into_owned());
            }
        }
        warn!("Python interpreter not found");
        None
    }

    fn detect_powershell(&self) -> Option<String> {
        if let Some(custom) = self.settings.get_string("interpreters/powershell_path")
            && Path::new(&custom).exists()
        {
            return Some(custom);
        }

        if let Ok(path) = which::which("pwsh") {
            info!("Detected PowerShell Core at: {}", path.display());
            return Some(path.to_string_lossy().into_owned());
        }
        if let Ok(path) = which::which("powershell") {
            info!("Detected Windows PowerShell at: {}", path.display());
            return Some(path.to_string_lossy().into_owned());
        }
        warn!("PowerShell not found");
        None
    }

    fn detect_bash(&self) -> Option<String> {
        if let Some(custom) = self.settings.get_string("interpreters/bash_path")
            && Path::new(&custom).exists()
        {
            return Some(custom);
        }

        if self.settings.get_bool("interpreters/use_wsl", true)
            && which::which("wsl").is_ok()
        {
            let distro = self
                .settings
                .get_string("interpreters/wsl_distro")
                .unwrap_or_else(|| "Ubuntu".to_string());
            info!("Using WSL with distro: {distro}");
            return Some(format!("wsl:{distro}"));
        }

        if let Ok(path) = which::which("bash") {
            info!("Detected bash at: {}", path.display());
            return Some(path.to_string_lossy().into_owned());
        }
        warn!("Bash not found");
        None
    }

    fn detect_cmd(&self) -> Option<String> {
        if let Ok(path) = which::which("cmd") {
            return Some(path.to_string_lossy().into_owned());
        }

        let system_root =
            std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
        let fallback = format!(r"{system_root}\System32\cmd.exe");
        if Path::new(&fallback).exists() {
            return Some(fallback);
        }
        warn!("cmd.exe not found");
        None
    }
}

/// Translates a Windows path into its WSL `/mnt/<drive>/...` form. Paths
/// without a drive prefix only have their separators normalized.
pub fn to_wsl_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    let bytes = text.as_bytes();
    if bytes.len() > 2 && bytes[1] == b':' {
        let drive = (bytes[0] as char).to_ascii_lowercase();
        let rest = text[3..].replace('\\', "/");
        format!("/mnt/{drive}/{rest}")
    } else {
        text.replace('\\', "/")
    }
}
