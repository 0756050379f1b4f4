//! On-demand execution model: routes dispatch requests, enforces the
//! one-run-per-script rule, and reports outcomes on the event bus.
//!
//! Subprocess-backed strategies run on the bounded worker pool with
//! cancellation support; the in-process strategies execute on the calling
//! (main-loop) thread.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};

use crate::{
    analyzer::ExecutionStrategy,
    collection::ScriptCollection,
    constants::EXECUTION_POOL_SIZE,
    error::DispatchError,
    events::{Event, EventBus},
    executor::{CancelToken, ExecutionResult, ScriptExecutor},
    pool::WorkerPool,
};

/// Dispatches executions and tracks in-flight runs.
pub struct ExecutionModel {
    executor: ScriptExecutor,
    collection: ScriptCollection,
    events: EventBus,
    pool: Mutex<WorkerPool>,
    running: Arc<Mutex<HashMap<String, CancelToken>>>,
    last_results: Arc<Mutex<HashMap<String, ExecutionResult>>>,
}

impl ExecutionModel {
    /// Creates the model with a worker pool of the default size.
    pub fn new(
        executor: ScriptExecutor,
        collection: ScriptCollection,
        events: EventBus,
    ) -> Self {
        Self {
            executor,
            collection,
            events,
            pool: Mutex::new(WorkerPool::new(EXECUTION_POOL_SIZE)),
            running: Arc::new(Mutex::new(HashMap::new())),
            last_results: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dispatches a script by name or alias. Saved arguments are used when
    /// `arguments` is `None`. Rejects a second dispatch of a script that is
    /// still running.
    pub fn dispatch(
        &self,
        name: &str,
        arguments: Option<BTreeMap<String, String>>,
    ) -> Result<(), DispatchError> {
        let script = self
            .collection
            .get(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))?;
        let identifier = script.identifier.clone();

        let arguments =
            arguments.unwrap_or_else(|| self.collection.script_arguments(&identifier));

        let token = CancelToken::new();
        {
            let mut running = self.running.lock().unwrap();
            if running.contains_key(&identifier) {
                return Err(DispatchError::AlreadyRunning(identifier));
            }
            running.insert(identifier.clone(), token.clone());
        }

        self.events.publish(Event::ExecutionStarted {
            script: identifier.clone(),
        });

        if runs_in_process(script.strategy) {
            // In-process strategies execute on the caller's (main loop)
            // thread.
            let result = self.executor.execute_with_cancel(&script, &arguments, &token);
            self.finish(&identifier, result);
            return Ok(());
        }

        let executor = self.executor.clone();
        let events = self.events.clone();
        let running = Arc::clone(&self.running);
        let last_results = Arc::clone(&self.last_results);
        let show_notifications = self.collection.show_notifications();
        let script = Arc::clone(&script);

        self.pool.lock().unwrap().execute(move || {
            debug!("Worker executing '{}'", script.identifier);
            let result = executor.execute_with_cancel(&script, &arguments, &token);
            finish_inner(
                &script.identifier,
                result,
                &events,
                &running,
                &last_results,
                show_notifications,
            );
        });
        Ok(())
    }

    /// Dispatches using a named argument preset.
    pub fn dispatch_with_preset(
        &self,
        name: &str,
        preset: &str,
    ) -> Result<(), DispatchError> {
        let script = self
            .collection
            .get(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))?;

        let arguments = self
            .collection
            .preset_arguments(&script.identifier, preset)
            .ok_or_else(|| DispatchError::PresetNotFound {
                script: script.identifier.clone(),
                preset: preset.to_string(),
            })?;
        self.dispatch(name, Some(arguments))
    }

    /// Requests cancellation of an in-flight run. Returns `false` when the
    /// script is not running.
    pub fn cancel(&self, name: &str) -> bool {
        let identifier = match self.collection.resolve(name) {
            Some(identifier) => identifier,
            None => name.to_lowercase(),
        };

        let token = {
            let running = self.running.lock().unwrap();
            running.get(&identifier).cloned()
        };
        match token {
            Some(token) => {
                info!("Cancelling execution of '{identifier}'");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a run is currently in flight for the script.
    pub fn is_running(&self, name: &str) -> bool {
        let identifier = match self.collection.resolve(name) {
            Some(identifier) => identifier,
            None => name.to_lowercase(),
        };
        self.running.lock().unwrap().contains_key(&identifier)
    }

    /// The most recent result for the script, if it has run.
    pub fn last_result(&self, name: &str) -> Option<ExecutionResult> {
        let identifier = self.collection.resolve(name)?;
        self.last_results.lock().unwrap().get(&identifier).cloned()
    }

    /// Drains the worker pool; used on shutdown.
    pub fn shutdown(&self) {
        self.pool.lock().unwrap().shutdown();
    }

    fn finish(&self, identifier: &str, result: ExecutionResult) {
        let show_notifications = self.collection.show_notifications();
        finish_inner(
            identifier,
            result,
            &self.events,
            &self.running,
            &self.last_results,
            show_notifications,
        );
    }
}

fn finish_inner(
    identifier: &str,
    result: ExecutionResult,
    events: &EventBus,
    running: &Arc<Mutex<HashMap<String, CancelToken>>>,
    last_results: &Arc<Mutex<HashMap<String, ExecutionResult>>>,
    show_notifications: bool,
) {
    running.lock().unwrap().remove(identifier);
    last_results
        .lock()
        .unwrap()
        .insert(identifier.to_string(), result.clone());

    if result.success {
        info!("Execution of '{identifier}' completed");
    } else {
        warn!(
            "Execution of '{identifier}' failed: {}",
            if result.error.is_empty() {
                &result.message
            } else {
                &result.error
            }
        );
    }

    if show_notifications {
        events.publish(Event::Notification {
            title: identifier.to_string(),
            body: if result.success {
                result.message.clone()
            } else {
                result.error.clone()
            },
        });
    }
    events.publish(Event::ExecutionCompleted {
        script: identifier.to_string(),
        result,
    });
}

/// Whether the strategy executes user code inside the host runtime.
fn runs_in_process(strategy: ExecutionStrategy) -> bool {
    matches!(
        strategy,
        ExecutionStrategy::InProcessFunction | ExecutionStrategy::InProcessModule
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{loader::ScriptLoader, settings::SettingsStore};
    use std::{fs, path::Path, time::Duration};

    fn model(root: &Path) -> (ExecutionModel, std::sync::mpsc::Receiver<Event>) {
        let settings = SettingsStore::open(&root.join("settings.json")).unwrap();
        let events = EventBus::new();
        let rx = events.subscribe();
        let loader = ScriptLoader::new(root.join("scripts"), settings.clone());
        let collection =
            ScriptCollection::new(loader, settings.clone(), events.clone());
        let executor = crate::executor::ScriptExecutor::with_log_dir(
            settings,
            events.clone(),
            root.join("logs/services"),
        );
        collection.discover();
        (ExecutionModel::new(executor, collection, events), rx)
    }

    fn write_script(root: &Path, name: &str, body: &str) {
        let dir = root.join("scripts");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    fn python_available() -> bool {
        which::which("python3").is_ok()
    }

    fn wait_for_completion(
        rx: &std::sync::mpsc::Receiver<Event>,
    ) -> Option<ExecutionResult> {
        let deadline = std::time::Instant::now() + Duration::from_secs(15);
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(Event::ExecutionCompleted { result, .. }) => return Some(result),
                Ok(_) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(_) => break,
            }
        }
        None
    }

    #[test]
    fn unknown_script_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        write_script(temp.path(), "real.py", "print('x')\n");
        let (model, _rx) = model(temp.path());

        assert!(matches!(
            model.dispatch("ghost", None),
            Err(DispatchError::NotFound(_))
        ));
    }

    #[test]
    fn missing_preset_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        write_script(temp.path(), "real.py", "print('x')\n");
        let (model, _rx) = model(temp.path());

        assert!(matches!(
            model.dispatch_with_preset("real.py", "nope"),
            Err(DispatchError::PresetNotFound { .. })
        ));
    }

    #[test]
    fn subprocess_dispatch_runs_on_the_pool_and_reports() {
        if !python_available() {
            return;
        }
        let temp = tempfile::tempdir().unwrap();
        write_script(
            temp.path(),
            "hello.py",
            "if __name__ == \"__main__\":\n    print('hello')\n",
        );
        let (model, rx) = model(temp.path());

        model.dispatch("hello.py", None).unwrap();
        let result = wait_for_completion(&rx).expect("completion event");
        assert!(result.success);
        assert_eq!(result.output, "hello");
        assert!(!model.is_running("hello.py"));
        assert!(model.last_result("hello.py").unwrap().success);
    }

    #[test]
    fn second_dispatch_while_running_is_rejected() {
        if !python_available() {
            return;
        }
        let temp = tempfile::tempdir().unwrap();
        write_script(
            temp.path(),
            "slow.py",
            "import time\nif __name__ == \"__main__\":\n    time.sleep(3)\n",
        );
        let (model, rx) = model(temp.path());

        model.dispatch("slow.py", None).unwrap();
        // Give the worker a moment to pick it up, then collide.
        std::thread::sleep(Duration::from_millis(200));
        assert!(matches!(
            model.dispatch("slow.py", None),
            Err(DispatchError::AlreadyRunning(_))
        ));

        model.cancel("slow.py");
        let result = wait_for_completion(&rx).expect("completion event");
        assert!(!result.success);
    }
}
