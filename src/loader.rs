//! Script discovery across the local scripts directory and configured
//! external paths.
//!
//! The two halves run as parallel workers, each sharding per-file analysis
//! across a small thread pool; results are re-sorted by lowercased display
//! name so two discover passes over the same directory always produce the
//! same order, whatever the worker completion order was.
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use tracing::{debug, info, warn};

use crate::{
    analyzer::{ScriptAnalyzer, ScriptInfo},
    constants::{DISCOVERY_WORKERS, SCRIPT_EXTENSIONS, SCRIPT_SKIP_PREFIX},
    settings::SettingsStore,
};

/// Discovers scripts and owns the published catalog.
pub struct ScriptLoader {
    scripts_directory: PathBuf,
    settings: SettingsStore,
    loaded: BTreeMap<String, Arc<ScriptInfo>>,
    legacy_aliases: BTreeMap<String, Vec<String>>,
    failed: BTreeMap<String, String>,
}

impl ScriptLoader {
    /// Creates a loader rooted at `scripts_directory`.
    pub fn new(scripts_directory: PathBuf, settings: SettingsStore) -> Self {
        info!(
            "Script loader initialized with directory: {}",
            scripts_directory.display()
        );
        Self {
            scripts_directory,
            settings,
            loaded: BTreeMap::new(),
            legacy_aliases: BTreeMap::new(),
            failed: BTreeMap::new(),
        }
    }

    /// Discovers every script, replacing the current catalog. Local and
    /// external discovery run as two parallel workers.
    pub fn discover(&mut self) -> Vec<Arc<ScriptInfo>> {
        info!("Discovering scripts in: {}", self.scripts_directory.display());
        self.loaded.clear();
        self.legacy_aliases.clear();
        self.failed.clear();

        let analyzer =
            ScriptAnalyzer::with_service_overrides(self.settings.service_script_names());
        let externals = self.settings.external_scripts();
        let scripts_directory = self.scripts_directory.clone();

        let (local, external) = thread::scope(|scope| {
            let local_worker =
                scope.spawn(|| discover_local(&scripts_directory, &analyzer));
            let external_worker = scope.spawn(|| discover_external(&externals, &analyzer));
            (
                local_worker.join().expect("local discovery worker panicked"),
                external_worker
                    .join()
                    .expect("external discovery worker panicked"),
            )
        });

        self.failed.extend(local.failed);
        self.failed.extend(external.failed);
        for info in local.scripts.into_iter().chain(external.scripts) {
            self.register(info);
        }

        info!(
            "Script discovery complete: {} loaded, {} failed",
            self.loaded.len(),
            self.failed.len()
        );
        self.all()
    }

    /// Rebuilds only the external half of the catalog, leaving local
    /// entries untouched.
    pub fn refresh_external(&mut self) -> Vec<Arc<ScriptInfo>> {
        info!("Refreshing external scripts");

        let removed: Vec<String> = self
            .loaded
            .iter()
            .filter(|(_, info)| info.is_external)
            .map(|(identifier, _)| identifier.clone())
            .collect();
        for identifier in &removed {
            debug!("Removing external script from catalog: {identifier}");
            self.loaded.remove(identifier);
        }
        self.legacy_aliases.retain(|_, identifiers| {
            identifiers.retain(|i| !removed.contains(i));
            !identifiers.is_empty()
        });
        self.failed.retain(|key, _| !key.ends_with("(external)"));

        let analyzer =
            ScriptAnalyzer::with_service_overrides(self.settings.service_script_names());
        let externals = self.settings.external_scripts();
        let outcome = discover_external(&externals, &analyzer);

        self.failed.extend(outcome.failed);
        for info in outcome.scripts {
            self.register(info);
        }
        self.all()
    }

    fn register(&mut self, info: ScriptInfo) {
        let identifier = info.identifier.clone();
        for legacy in &info.legacy_keys {
            let aliases = self.legacy_aliases.entry(legacy.clone()).or_default();
            if !aliases.contains(&identifier) {
                aliases.push(identifier.clone());
            }
        }
        let own = self.legacy_aliases.entry(identifier.clone()).or_default();
        if !own.contains(&identifier) {
            own.push(identifier.clone());
        }

        debug!("Registered script identifier: {identifier}");
        self.loaded.insert(identifier, Arc::new(info));
    }

    /// Resolves a provided name (canonical identifier or legacy stem) to the
    /// canonical identifier. Ambiguous legacy references warn and pick the
    /// first match.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        if self.loaded.contains_key(name) {
            return Some(name.to_string());
        }
        let normalized = name.to_lowercase();
        if self.loaded.contains_key(&normalized) {
            return Some(normalized);
        }

        let aliases = self.legacy_aliases.get(&normalized)?;
        if aliases.len() > 1 {
            warn!(
                "Ambiguous script reference '{name}' matches multiple scripts: {aliases:?}. Using the first match."
            );
        }
        aliases.first().cloned()
    }

    /// Looks up a script by identifier or legacy alias.
    pub fn get(&self, name: &str) -> Option<Arc<ScriptInfo>> {
        let identifier = self.resolve(name)?;
        self.loaded.get(&identifier).cloned()
    }

    /// The catalog ordered by lowercased display name.
    pub fn all(&self) -> Vec<Arc<ScriptInfo>> {
        let mut scripts: Vec<Arc<ScriptInfo>> = self.loaded.values().cloned().collect();
        scripts.sort_by_key(|info| info.display_name.to_lowercase());
        scripts
    }

    /// Scripts that failed analysis, keyed by file name (external entries
    /// suffixed with " (external)").
    pub fn failed_scripts(&self) -> BTreeMap<String, String> {
        self.failed.clone()
    }

    /// The effective display name: the user's custom name when one is set.
    pub fn effective_display_name(&self, info: &ScriptInfo) -> String {
        self.settings.effective_name(&info.display_name)
    }

    /// Saved default arguments for a script, falling back through its
    /// legacy keys so configurations written before canonical identifiers
    /// still resolve.
    pub fn script_arguments(&self, name: &str) -> BTreeMap<String, String> {
        let identifier = self
            .resolve(name)
            .unwrap_or_else(|| name.to_lowercase());
        let arguments = self.settings.script_arguments(&identifier);
        if !arguments.is_empty() {
            return arguments;
        }

        if let Some(info) = self.loaded.get(&identifier) {
            for legacy in &info.legacy_keys {
                let legacy_args = self.settings.script_arguments(legacy);
                if !legacy_args.is_empty() {
                    debug!(
                        "Loading arguments for {identifier} from legacy key '{legacy}'"
                    );
                    return legacy_args;
                }
            }
        }
        arguments
    }

    /// Persists default arguments for a script.
    pub fn set_script_arguments(&self, name: &str, arguments: &BTreeMap<String, String>) {
        let identifier = self
            .resolve(name)
            .unwrap_or_else(|| name.to_lowercase());
        self.settings.set_script_arguments(&identifier, arguments);
    }

    /// The settings store this loader reads configuration from.
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }
}

struct DiscoveryOutcome {
    scripts: Vec<ScriptInfo>,
    failed: BTreeMap<String, String>,
}

fn discover_local(scripts_directory: &Path, analyzer: &ScriptAnalyzer) -> DiscoveryOutcome {
    let mut outcome = DiscoveryOutcome {
        scripts: Vec::new(),
        failed: BTreeMap::new(),
    };

    if !scripts_directory.exists() {
        warn!(
            "Scripts directory does not exist, creating: {}",
            scripts_directory.display()
        );
        if let Err(err) = fs::create_dir_all(scripts_directory) {
            warn!("Failed to create scripts directory: {err}");
        }
        return outcome;
    }

    let mut files: Vec<PathBuf> = match fs::read_dir(scripts_directory) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| SCRIPT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !n.starts_with(SCRIPT_SKIP_PREFIX))
                    .unwrap_or(false)
            })
            .collect(),
        Err(err) => {
            warn!("Failed to read scripts directory: {err}");
            return outcome;
        }
    };
    files.sort_by_key(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase()
    });
    info!("Found {} script files in scripts directory", files.len());

    for info in analyze_sharded(&files, analyzer) {
        let file_name = info
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if info.is_executable {
            outcome.scripts.push(info);
        } else {
            let error = info.analyzer_error.as_deref().unwrap_or("unknown");
            outcome
                .failed
                .insert(file_name.clone(), format!("Script not executable: {error}"));
            warn!("Script {file_name} is not executable: {error}");
        }
    }

    info!("Local script discovery: {} loaded", outcome.scripts.len());
    outcome
}

fn discover_external(
    externals: &BTreeMap<String, String>,
    analyzer: &ScriptAnalyzer,
) -> DiscoveryOutcome {
    let mut outcome = DiscoveryOutcome {
        scripts: Vec::new(),
        failed: BTreeMap::new(),
    };
    info!("Found {} configured external scripts", externals.len());

    let mut candidates: Vec<(String, PathBuf)> = Vec::new();
    for (name, path) in externals {
        let path = PathBuf::from(path);
        if !path.is_file() {
            let message = format!(
                "External script path is invalid or missing: {}",
                path.display()
            );
            warn!("{message}");
            outcome.failed.insert(format!("{name} (external)"), message);
            continue;
        }
        candidates.push((name.clone(), path));
    }

    let paths: Vec<PathBuf> = candidates.iter().map(|(_, path)| path.clone()).collect();
    let analyzed = analyze_sharded(&paths, analyzer);

    for ((name, path), mut info) in candidates.into_iter().zip(analyzed) {
        if !info.is_executable {
            let error = info.analyzer_error.as_deref().unwrap_or("unknown");
            outcome.failed.insert(
                format!("{name} (external)"),
                format!("External script not executable: {error}"),
            );
            warn!("External script {name} is not executable: {error}");
            continue;
        }

        info.display_name = name.clone();
        info.identifier = name.to_lowercase();
        info.is_external = true;
        info.origin_path = path;
        info!("Analyzed external script: {name}");
        outcome.scripts.push(info);
    }

    info!("External script discovery: {} loaded", outcome.scripts.len());
    outcome
}

/// Analyzes files across a small worker pool, preserving input order.
fn analyze_sharded(files: &[PathBuf], analyzer: &ScriptAnalyzer) -> Vec<ScriptInfo> {
    if files.is_empty() {
        return Vec::new();
    }

    let chunk_size = files.len().div_ceil(DISCOVERY_WORKERS);
    thread::scope(|scope| {
        let workers: Vec<_> = files
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|path| analyzer.analyze(path))
                        .collect::<Vec<ScriptInfo>>()
                })
            })
            .collect();

        workers
            .into_iter()
            .flat_map(|worker| worker.join().expect("analysis worker panicked"))
            .collect()
    })
}
