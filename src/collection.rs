//! Filtered script catalog: the full discovery result minus the user's
//! disabled set and external entries whose files have gone away.
use std::{
    collections::BTreeSet,
    path::Path,
    sync::{Arc, Mutex},
};

use tracing::{info, warn};

use crate::{
    analyzer::{ScriptInfo, ScriptKind},
    events::{Event, EventBus},
    loader::ScriptLoader,
    settings::SettingsStore,
};

/// Catalog of discovered scripts with availability filtering.
#[derive(Clone)]
pub struct ScriptCollection {
    loader: Arc<Mutex<ScriptLoader>>,
    settings: SettingsStore,
    events: EventBus,
}

impl ScriptCollection {
    /// Wraps a loader; call [`ScriptCollection::discover`] to populate it.
    pub fn new(loader: ScriptLoader, settings: SettingsStore, events: EventBus) -> Self {
        Self {
            loader: Arc::new(Mutex::new(loader)),
            settings,
            events,
        }
    }

    /// Runs a full discovery pass and announces the new catalog.
    pub fn discover(&self) -> Vec<Arc<ScriptInfo>> {
        let scripts = self.loader.lock().unwrap().discover();
        self.events.publish(Event::ScriptsDiscovered {
            count: scripts.len(),
        });
        self.events.publish(Event::MenuRefreshRequested);
        scripts
    }

    /// Rebuilds only the external entries and announces the change.
    pub fn refresh_external(&self) -> Vec<Arc<ScriptInfo>> {
        let scripts = self.loader.lock().unwrap().refresh_external();
        self.events.publish(Event::ScriptsDiscovered {
            count: scripts.len(),
        });
        self.events.publish(Event::MenuRefreshRequested);
        scripts
    }

    /// Every discovered script, deterministic order.
    pub fn all_scripts(&self) -> Vec<Arc<ScriptInfo>> {
        self.loader.lock().unwrap().all()
    }

    /// Scripts the user can launch: not disabled, and for external entries
    /// the origin path still exists.
    pub fn available_scripts(&self) -> Vec<Arc<ScriptInfo>> {
        let disabled = self.settings.disabled_scripts();
        self.all_scripts()
            .into_iter()
            .filter(|info| !disabled.contains(&info.display_name))
            .filter(|info| !info.is_external || info.origin_path.exists())
            .collect()
    }

    /// Looks up one script by identifier or legacy alias.
    pub fn get(&self, name: &str) -> Option<Arc<ScriptInfo>> {
        self.loader.lock().unwrap().get(name)
    }

    /// Resolves a name to its canonical identifier.
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.loader.lock().unwrap().resolve(name)
    }

    /// Scripts that failed analysis, for the UI's failure list.
    pub fn failed_scripts(&self) -> std::collections::BTreeMap<String, String> {
        self.loader.lock().unwrap().failed_scripts()
    }

    /// Whether the script is disabled, keyed by original display name.
    pub fn is_disabled(&self, display_name: &str) -> bool {
        self.settings.disabled_scripts().contains(display_name)
    }

    /// Adds a script to the disabled set.
    pub fn disable(&self, display_name: &str) {
        let mut disabled = self.settings.disabled_scripts();
        if disabled.insert(display_name.to_string()) {
            self.settings.set_disabled_scripts(&disabled);
            info!("Disabled script: {display_name}");
            self.events.publish(Event::MenuRefreshRequested);
        }
    }

    /// Removes a script from the disabled set.
    pub fn enable(&self, display_name: &str) {
        let mut disabled = self.settings.disabled_scripts();
        if disabled.remove(display_name) {
            self.settings.set_disabled_scripts(&disabled);
            info!("Enabled script: {display_name}");
            self.events.publish(Event::MenuRefreshRequested);
        }
    }

    /// Registers an external script and refreshes the external catalog.
    /// Rejects unsupported extensions and missing files.
    pub fn add_external(&self, display_name: &str, path: &Path) -> bool {
        if display_name.trim().is_empty() {
            warn!("External script name cannot be empty");
            return false;
        }
        if !path.is_file() {
            warn!("External script path does not exist: {}", path.display());
            return false;
        }
        if ScriptKind::from_path(path) == ScriptKind::Unknown {
            warn!(
                "External script has an unsupported extension: {}",
                path.display()
            );
            return false;
        }

        self.settings
            .set_external_script(display_name, &path.to_string_lossy());
        self.refresh_external();
        true
    }

    /// Removes an external script registration and refreshes.
    pub fn remove_external(&self, display_name: &str) {
        self.settings.remove_external_script(display_name);
        self.refresh_external();
    }

    /// Display name to present for a script, honoring custom names.
    pub fn display_name(&self, info: &ScriptInfo) -> String {
        self.loader.lock().unwrap().effective_display_name(info)
    }

    /// Saved default arguments for a script.
    pub fn script_arguments(
        &self,
        name: &str,
    ) -> std::collections::BTreeMap<String, String> {
        self.loader.lock().unwrap().script_arguments(name)
    }

    /// Names of currently disabled scripts.
    pub fn disabled(&self) -> BTreeSet<String> {
        self.settings.disabled_scripts()
    }

    /// Whether script result notifications are enabled.
    pub fn show_notifications(&self) -> bool {
        self.settings.show_script_notifications()
    }

    /// A named argument preset for a script, if it exists.
    pub fn preset_arguments(
        &self,
        identifier: &str,
        preset: &str,
    ) -> Option<std::collections::BTreeMap<String, String>> {
        self.settings.preset(identifier, preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn collection(root: &Path) -> ScriptCollection {
        let settings = SettingsStore::open(&root.join("settings.json")).unwrap();
        let loader = ScriptLoader::new(root.join("scripts"), settings.clone());
        ScriptCollection::new(loader, settings, EventBus::new())
    }

    fn write_script(root: &Path, name: &str, body: &str) {
        let dir = root.join("scripts");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn disabled_scripts_are_filtered_from_available() {
        let temp = tempdir().unwrap();
        write_script(temp.path(), "one.py", "print(1)\n");
        write_script(temp.path(), "two.py", "print(2)\n");

        let collection = collection(temp.path());
        collection.discover();
        assert_eq!(collection.available_scripts().len(), 2);

        collection.disable("One");
        let available = collection.available_scripts();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].display_name, "Two");
        assert!(collection.is_disabled("One"));

        collection.enable("One");
        assert_eq!(collection.available_scripts().len(), 2);
    }

    #[test]
    fn external_entries_with_missing_files_are_unavailable() {
        let temp = tempdir().unwrap();
        let external = temp.path().join("gone.py");
        fs::write(&external, "print('x')\n").unwrap();

        let collection = collection(temp.path());
        assert!(collection.add_external("Gone", &external));
        assert_eq!(collection.available_scripts().len(), 1);

        fs::remove_file(&external).unwrap();
        assert!(collection.available_scripts().is_empty());
        // Still in the catalog until the next external refresh.
        assert_eq!(collection.all_scripts().len(), 1);
    }

    #[test]
    fn add_external_validates_inputs() {
        let temp = tempdir().unwrap();
        let collection = collection(temp.path());

        assert!(!collection.add_external("X", Path::new("/missing/file.py")));

        let unsupported = temp.path().join("notes.txt");
        fs::write(&unsupported, "hello").unwrap();
        assert!(!collection.add_external("Notes", &unsupported));

        let script = temp.path().join("ok.py");
        fs::write(&script, "print('ok')\n").unwrap();
        assert!(!collection.add_external("  ", &script));
        assert!(collection.add_external("Ok", &script));
    }
}
