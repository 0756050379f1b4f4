//! Execution dispatch: one entry point that runs a script with its selected
//! strategy and captures the outcome.
//!
//! Every subprocess-backed strategy shares the same child handling: no
//! console, own process group, merged capture of both output streams, and a
//! terminate-then-kill ladder on timeout or cancel with pipes drained on
//! every path. The in-process strategies execute through short Python shims
//! fed from the module cache.
use std::{
    collections::BTreeMap,
    fs, io,
    path::Path,
    process::{Command, Stdio},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use nix::{
    errno::Errno,
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    analyzer::{ArgumentSpec, ExecutionStrategy, ScriptInfo, ValueKind, python, text},
    cache::{LoadedModule, ModuleCache},
    constants::{CHILD_POLL_INTERVAL, TERMINATE_GRACE},
    events::EventBus,
    interpreter::{InterpreterKind, InterpreterResolver, to_wsl_path},
    runtime,
    schedule::{ScheduleRuntime, ScheduleSnapshot},
    service::{ServiceHandle, ServiceRuntime, ServiceState},
    settings::SettingsStore,
};

/// Shim that imports a script and calls its entry function with the keyword
/// arguments that match the real signature, printing a JSON envelope with
/// the converted return value.
const FUNCTION_SHIM: &str = r#"
import importlib.util, inspect, json, sys
path, fn_name, kwargs_json = sys.argv[1], sys.argv[2], sys.argv[3]
spec = importlib.util.spec_from_file_location("bindkit_module", path)
module = importlib.util.module_from_spec(spec)
sys.modules["bindkit_module"] = module
spec.loader.exec_module(module)
if not hasattr(module, fn_name):
    print(json.dumps({"__missing__": fn_name}))
    sys.exit(3)
fn = getattr(module, fn_name)
kwargs = json.loads(kwargs_json)
sig = inspect.signature(fn)
accepted = {k: v for k, v in kwargs.items() if k in sig.parameters}
result = fn(**accepted)
print(json.dumps({"__result__": result}, default=str))
"#;

/// Shim that executes a whole script under a simulated argv without firing
/// its `__main__` guard.
const MODULE_SHIM: &str = r#"
import runpy, sys
path = sys.argv[1]
sys.argv = [path] + sys.argv[2:]
runpy.run_path(path, run_name="bindkit_module")
"#;

/// Outcome of one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Whether the run is considered successful.
    pub success: bool,
    /// Human-facing summary, possibly overlaid from the script's JSON
    /// output.
    pub message: String,
    /// Captured stdout, trimmed.
    pub output: String,
    /// Captured stderr, trimmed.
    pub error: String,
    /// Child exit code, when a process ran and exited normally.
    pub return_code: Option<i32>,
    /// Structured data when the script printed a JSON object.
    pub data: Option<Value>,
}

impl ExecutionResult {
    /// A successful result with the given message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A failed result with the given error text.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Self::default()
        }
    }
}

/// Cooperative cancellation for one execution. The flag is honored between
/// steps; when the worker is blocked on a child process, cancel terminates
/// the child's process group so the wait returns promptly.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    pid: Mutex<Option<u32>>,
}

impl CancelToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation, signalling any attached child group.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(pid) = *self.inner.pid.lock().unwrap() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn attach(&self, pid: u32) {
        *self.inner.pid.lock().unwrap() = Some(pid);
    }

    fn detach(&self) {
        *self.inner.pid.lock().unwrap() = None;
    }
}

struct Captured {
    stdout: String,
    stderr: String,
    code: Option<i32>,
    timed_out: bool,
    cancelled: bool,
}

/// Runs scripts with the strategy their analysis selected.
#[derive(Clone)]
pub struct ScriptExecutor {
    settings: SettingsStore,
    resolver: InterpreterResolver,
    cache: Arc<Mutex<ModuleCache>>,
    services: ServiceRuntime,
    schedules: ScheduleRuntime,
}

impl ScriptExecutor {
    /// Creates an executor with service logs under the default runtime
    /// directory.
    pub fn new(settings: SettingsStore, events: EventBus) -> Self {
        Self::with_log_dir(settings, events, runtime::service_log_dir())
    }

    /// Creates an executor writing service logs under `service_log_dir`.
    pub fn with_log_dir(
        settings: SettingsStore,
        events: EventBus,
        service_log_dir: std::path::PathBuf,
    ) -> Self {
        let resolver = InterpreterResolver::new(settings.clone());
        let services = ServiceRuntime::new(service_log_dir, resolver.clone());
        let schedules = ScheduleRuntime::new(settings.clone(), events);
        Self {
            settings,
            resolver,
            cache: Arc::new(Mutex::new(ModuleCache::default())),
            services,
            schedules,
        }
    }

    /// The service runtime backing the Service strategy.
    pub fn services(&self) -> &ServiceRuntime {
        &self.services
    }

    /// The schedule runtime backing periodic execution.
    pub fn schedules(&self) -> &ScheduleRuntime {
        &self.schedules
    }

    /// The interpreter resolver, exposed so settings changes can clear it.
    pub fn resolver(&self) -> &InterpreterResolver {
        &self.resolver
    }

    /// Executes a script with the appropriate strategy.
    pub fn execute(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        self.execute_with_cancel(script, arguments, &CancelToken::new())
    }

    /// Executes a script, honoring `token` between steps and while waiting
    /// on child processes.
    pub fn execute_with_cancel(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
        token: &CancelToken,
    ) -> ExecutionResult {
        // Opportunistic sweep; rate-limited internally.
        self.cache.lock().unwrap().sweep();

        if !script.is_executable {
            return ExecutionResult::fail(format!(
                "Script is not executable: {}",
                script.analyzer_error.as_deref().unwrap_or("unknown reason")
            ));
        }

        let validation_errors = self.validate_arguments(script, arguments);
        if !validation_errors.is_empty() {
            return ExecutionResult::fail(format!(
                "Argument validation failed: {}",
                validation_errors.join("; ")
            ));
        }

        if token.is_cancelled() {
            return ExecutionResult::fail("Execution cancelled");
        }

        debug!(
            "Executing script {} with strategy {}",
            script.display_name, script.strategy
        );

        match script.strategy {
            ExecutionStrategy::Subprocess => self.execute_subprocess(script, arguments, token),
            ExecutionStrategy::InProcessFunction => {
                self.execute_function(script, arguments, token)
            }
            ExecutionStrategy::InProcessModule => self.execute_module(script, arguments, token),
            ExecutionStrategy::Service => self.execute_service(script, arguments),
            ExecutionStrategy::PowerShell => self.execute_powershell(script, arguments, token),
            ExecutionStrategy::Batch => self.execute_batch(script, arguments, token),
            ExecutionStrategy::Shell => self.execute_shell(script, arguments, token),
        }
    }

    /// Validates provided arguments against the script's declarations:
    /// required presence, choice membership, and numeric parseability.
    pub fn validate_arguments(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        for spec in &script.arguments {
            if spec.required && !arguments.contains_key(&spec.name) {
                errors.push(format!("Required argument '{}' is missing", spec.name));
            }

            let Some(value) = arguments.get(&spec.name) else {
                continue;
            };

            if let Some(choices) = &spec.choices
                && !choices.contains(value)
            {
                errors.push(format!(
                    "Argument '{}' must be one of: {}",
                    spec.name,
                    choices.join(", ")
                ));
            }

            match spec.value_kind {
                ValueKind::Int => {
                    if value.parse::<i64>().is_err() {
                        errors.push(format!("Argument '{}' must be an integer", spec.name));
                    }
                }
                ValueKind::Float => {
                    if value.parse::<f64>().is_err() {
                        errors.push(format!("Argument '{}' must be a number", spec.name));
                    }
                }
                ValueKind::Str | ValueKind::Bool => {}
            }
        }

        errors
    }

    fn execute_subprocess(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
        token: &CancelToken,
    ) -> ExecutionResult {
        let Some(python) = self.resolver.resolve(InterpreterKind::Python) else {
            return ExecutionResult::fail("Python interpreter not found");
        };

        let named = match build_named_args(&script.arguments, arguments) {
            Ok(named) => named,
            Err(error) => return ExecutionResult::fail(error),
        };

        let mut cmd = Command::new(python);
        cmd.arg(&script.file_path).args(&named);
        self.finish_python_result(cmd, script, token, true)
    }

    fn execute_function(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
        token: &CancelToken,
    ) -> ExecutionResult {
        let Some(python) = self.resolver.resolve(InterpreterKind::Python) else {
            return ExecutionResult::fail("Python interpreter not found");
        };

        let module = match self.load_module(script) {
            Ok(module) => module,
            Err(error) => return ExecutionResult::fail(error),
        };

        // Pass only the keys that match the entry function's parameters.
        let kwargs: serde_json::Map<String, Value> = arguments
            .iter()
            .filter(|(name, _)| module.entry_params.contains(name))
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();

        let mut cmd = Command::new(python);
        cmd.arg("-c")
            .arg(FUNCTION_SHIM)
            .arg(&script.file_path)
            .arg("main")
            .arg(Value::Object(kwargs).to_string());
        cmd.env("PYTHONIOENCODING", "utf-8").env("PYTHONUTF8", "1");

        let captured = match self.run(cmd, token) {
            Ok(captured) => captured,
            Err(err) => {
                return ExecutionResult::fail(format!("Function execution failed: {err}"));
            }
        };

        if captured.timed_out {
            return timeout_result(&captured, self.settings.script_timeout());
        }
        if captured.cancelled {
            return cancelled_result(&captured);
        }

        convert_function_envelope(&captured)
    }

    fn execute_module(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
        token: &CancelToken,
    ) -> ExecutionResult {
        let Some(python) = self.resolver.resolve(InterpreterKind::Python) else {
            return ExecutionResult::fail("Python interpreter not found");
        };

        // Keep the module warm in the cache alongside the function strategy.
        if let Err(error) = self.load_module(script) {
            return ExecutionResult::fail(error);
        }

        let mut simulated_argv = Vec::new();
        for spec in &script.arguments {
            if let Some(value) = arguments.get(&spec.name)
                && !value.is_empty()
            {
                simulated_argv.push(format!("--{}", spec.name));
                simulated_argv.push(value.clone());
            }
        }

        let mut cmd = Command::new(python);
        cmd.arg("-c")
            .arg(MODULE_SHIM)
            .arg(&script.file_path)
            .args(&simulated_argv);
        cmd.env("PYTHONIOENCODING", "utf-8").env("PYTHONUTF8", "1");

        let captured = match self.run(cmd, token) {
            Ok(captured) => captured,
            Err(err) => {
                return ExecutionResult::fail(format!("Module execution failed: {err}"));
            }
        };

        if captured.timed_out {
            return timeout_result(&captured, self.settings.script_timeout());
        }
        if captured.cancelled {
            return cancelled_result(&captured);
        }

        if captured.code == Some(0) {
            ExecutionResult {
                success: true,
                message: "Script executed successfully".to_string(),
                output: captured.stdout.trim().to_string(),
                error: captured.stderr.trim().to_string(),
                return_code: captured.code,
                data: None,
            }
        } else {
            ExecutionResult {
                success: false,
                message: String::new(),
                output: captured.stdout.trim().to_string(),
                error: format!("Module execution failed: {}", captured.stderr.trim()),
                return_code: captured.code,
                data: None,
            }
        }
    }

    fn execute_service(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        let name = &script.identifier;
        if self.services.is_running(name) {
            return ExecutionResult::fail(format!("Service '{name}' is already running"));
        }

        match self
            .services
            .start_service(name, &script.file_path, arguments)
        {
            Ok(handle) => ExecutionResult {
                success: true,
                message: format!("Service started with PID {}", handle.pid),
                data: Some(json!({
                    "pid": handle.pid,
                    "log_path": handle.log_file_path,
                })),
                ..ExecutionResult::default()
            },
            Err(err) => ExecutionResult::fail(format!("Service execution failed: {err}")),
        }
    }

    fn execute_powershell(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
        token: &CancelToken,
    ) -> ExecutionResult {
        let Some(interpreter) = self.resolver.resolve(InterpreterKind::PowerShell) else {
            return ExecutionResult::fail(
                "PowerShell not found. Install PowerShell Core or configure a path in settings.",
            );
        };

        let mut cmd = Command::new(interpreter);
        cmd.arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-File")
            .arg(&script.file_path);
        for spec in &script.arguments {
            if let Some(value) = arguments.get(&spec.name)
                && !value.is_empty()
            {
                cmd.arg(format!("-{}", spec.name)).arg(value);
            }
        }

        self.finish_external_result(cmd, token, "PowerShell")
    }

    fn execute_batch(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
        token: &CancelToken,
    ) -> ExecutionResult {
        let Some(interpreter) = self.resolver.resolve(InterpreterKind::Cmd) else {
            return ExecutionResult::fail("cmd.exe not found");
        };

        let mut cmd = Command::new(interpreter);
        cmd.arg("/c").arg(&script.file_path);
        for spec in &script.arguments {
            if let Some(value) = arguments.get(&spec.name)
                && !value.is_empty()
            {
                cmd.arg(value);
            }
        }

        self.finish_external_result(cmd, token, "Batch")
    }

    fn execute_shell(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
        token: &CancelToken,
    ) -> ExecutionResult {
        let Some(interpreter) = self.resolver.resolve(InterpreterKind::Bash) else {
            return ExecutionResult::fail(
                "Bash not found. Install WSL or configure a bash path in settings.",
            );
        };

        let mut cmd = if let Some(distro) = interpreter.strip_prefix("wsl:") {
            let mut cmd = Command::new("wsl");
            cmd.arg("-d")
                .arg(distro)
                .arg("--exec")
                .arg("bash")
                .arg(to_wsl_path(&script.file_path));
            cmd
        } else {
            let mut cmd = Command::new(interpreter);
            cmd.arg(&script.file_path);
            cmd
        };

        for spec in &script.arguments {
            if let Some(value) = arguments.get(&spec.name)
                && !value.is_empty()
            {
                if spec.name.chars().count() == 1 {
                    cmd.arg(format!("-{}", spec.name)).arg(value);
                } else {
                    cmd.arg(value);
                }
            }
        }

        self.finish_external_result(cmd, token, "Shell")
    }

    /// Runs a Python child and applies the JSON stdout overlay.
    fn finish_python_result(
        &self,
        mut cmd: Command,
        script: &ScriptInfo,
        token: &CancelToken,
        overlay: bool,
    ) -> ExecutionResult {
        cmd.env("PYTHONIOENCODING", "utf-8").env("PYTHONUTF8", "1");

        let captured = match self.run(cmd, token) {
            Ok(captured) => captured,
            Err(err) => {
                return ExecutionResult::fail(format!("Subprocess execution failed: {err}"));
            }
        };

        if captured.timed_out {
            warn!(
                "Script execution timed out, process terminated: {}",
                script.display_name
            );
            return timeout_result(&captured, self.settings.script_timeout());
        }
        if captured.cancelled {
            return cancelled_result(&captured);
        }

        let output = captured.stdout.trim().to_string();
        let mut result = ExecutionResult {
            success: captured.code == Some(0),
            message: output.clone(),
            output,
            error: captured.stderr.trim().to_string(),
            return_code: captured.code,
            data: None,
        };
        if overlay {
            apply_json_overlay(&mut result);
        }
        result
    }

    /// Runs a non-Python child with the shared capture semantics.
    fn finish_external_result(
        &self,
        cmd: Command,
        token: &CancelToken,
        family: &str,
    ) -> ExecutionResult {
        let captured = match self.run(cmd, token) {
            Ok(captured) => captured,
            Err(err) => {
                return ExecutionResult::fail(format!("{family} execution failed: {err}"));
            }
        };

        if captured.timed_out {
            return timeout_result(&captured, self.settings.script_timeout());
        }
        if captured.cancelled {
            return cancelled_result(&captured);
        }

        let success = captured.code == Some(0);
        let output = captured.stdout.trim().to_string();
        ExecutionResult {
            success,
            message: if success {
                output.clone()
            } else {
                format!(
                    "Script exited with code {}",
                    captured.code.map_or_else(|| "none".to_string(), |c| c.to_string())
                )
            },
            output,
            error: captured.stderr.trim().to_string(),
            return_code: captured.code,
            data: None,
        }
    }

    fn run(&self, cmd: Command, token: &CancelToken) -> io::Result<Captured> {
        run_with_timeout(cmd, self.settings.script_timeout(), token)
    }

    /// Loads a script into the module cache, reusing the cached copy while
    /// the file is unchanged on disk and falling back to a fresh load on any
    /// staleness or read problem.
    fn load_module(&self, script: &ScriptInfo) -> Result<LoadedModule, String> {
        let modified = fs::metadata(&script.file_path)
            .and_then(|m| m.modified())
            .ok();

        let mut cache = self.cache.lock().unwrap();
        if let Some(cached) = cache.get(&script.identifier)
            && cached.modified == modified
        {
            return Ok(cached.clone());
        }

        let file_name = script
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let source = text::read_source(&script.file_path)?;
        let source = text::sanitize(&source, file_name);
        let entry_params = python::main_params(&source).unwrap_or_default();

        let module = LoadedModule {
            name: script.identifier.clone(),
            source,
            entry_params,
            modified,
        };
        cache.put(module.clone());
        Ok(module)
    }

    /// Clears the module cache, returning how many entries were dropped.
    pub fn clear_module_cache(&self) -> usize {
        self.cache.lock().unwrap().clear()
    }

    /// Module cache statistics for diagnostics.
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.lock().unwrap().stats()
    }

    // ------------------------------------------------------------------
    // Service bridge
    // ------------------------------------------------------------------

    /// Stops a running service, reporting the outcome as a result.
    pub fn stop_service(&self, script_name: &str, timeout: Duration) -> ExecutionResult {
        if !self.services.is_running(script_name) {
            return ExecutionResult::fail(format!(
                "Service '{script_name}' is not running"
            ));
        }
        match self.services.stop_service(script_name, timeout) {
            Ok(()) => ExecutionResult::ok(format!("Service '{script_name}' stopped")),
            Err(err) => {
                ExecutionResult::fail(format!("Failed to stop service '{script_name}': {err}"))
            }
        }
    }

    /// Restarts a service, stopping it first when it is running.
    pub fn restart_service(
        &self,
        script: &ScriptInfo,
        arguments: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        let name = &script.identifier;
        if self.services.is_running(name) {
            let stopped = self.stop_service(name, crate::constants::SERVICE_STOP_TIMEOUT);
            if !stopped.success {
                return stopped;
            }
        }
        self.execute_service(script, arguments)
    }

    /// Observed state of a service.
    pub fn service_status(&self, script_name: &str) -> ServiceState {
        self.services.status(script_name)
    }

    /// Whether a service process is alive.
    pub fn is_service_running(&self, script_name: &str) -> bool {
        self.services.is_running(script_name)
    }

    /// Snapshots of every active service.
    pub fn all_services(&self) -> Vec<ServiceHandle> {
        self.services.all_services()
    }

    // ------------------------------------------------------------------
    // Schedule bridge
    // ------------------------------------------------------------------

    /// Starts interval-based periodic execution of `script`.
    pub fn start_interval_schedule(
        &self,
        script: &ScriptInfo,
        interval_seconds: u64,
        arguments: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        let name = script.identifier.clone();
        if self.schedules.is_scheduled(&name) {
            return ExecutionResult::fail(format!(
                "Schedule for '{name}' is already active"
            ));
        }

        let callback = self.execution_callback(script.clone(), arguments.clone());
        match self
            .schedules
            .start_interval(&name, &script.file_path, interval_seconds, callback)
        {
            Ok(snapshot) => ExecutionResult {
                success: true,
                message: format!(
                    "Schedule started for '{name}' (interval: {interval_seconds}s)"
                ),
                data: Some(json!({
                    "script_name": name,
                    "interval_seconds": interval_seconds,
                    "next_run": snapshot.next_run.map(epoch_seconds),
                })),
                ..ExecutionResult::default()
            },
            Err(err) => ExecutionResult::fail(format!("Failed to start schedule: {err}")),
        }
    }

    /// Starts CRON-based scheduled execution of `script`.
    pub fn start_cron_schedule(
        &self,
        script: &ScriptInfo,
        cron_expression: &str,
        arguments: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        let name = script.identifier.clone();
        if let Err(err) = ScheduleRuntime::validate_cron_expression(cron_expression) {
            return ExecutionResult::fail(err.to_string());
        }
        if self.schedules.is_scheduled(&name) {
            return ExecutionResult::fail(format!(
                "Schedule for '{name}' is already active"
            ));
        }

        let callback = self.execution_callback(script.clone(), arguments.clone());
        match self
            .schedules
            .start_cron(&name, &script.file_path, cron_expression, callback)
        {
            Ok(snapshot) => ExecutionResult {
                success: true,
                message: format!(
                    "CRON schedule started for '{name}' (expression: {cron_expression})"
                ),
                data: Some(json!({
                    "script_name": name,
                    "cron_expression": cron_expression,
                    "next_run": snapshot.next_run.map(epoch_seconds),
                })),
                ..ExecutionResult::default()
            },
            Err(err) => {
                ExecutionResult::fail(format!("Failed to start CRON schedule: {err}"))
            }
        }
    }

    /// Stops scheduled execution; stopping an inactive schedule succeeds.
    pub fn stop_schedule(&self, script_name: &str) -> ExecutionResult {
        if !self.schedules.is_scheduled(script_name) {
            info!("Schedule for '{script_name}' already stopped");
            return ExecutionResult {
                success: true,
                message: format!("Schedule for '{script_name}' already stopped"),
                data: Some(json!({ "already_stopped": true })),
                ..ExecutionResult::default()
            };
        }

        if self.schedules.stop_schedule(script_name) {
            ExecutionResult::ok(format!("Schedule for '{script_name}' stopped"))
        } else {
            ExecutionResult::fail(format!(
                "Failed to stop schedule for '{script_name}'"
            ))
        }
    }

    /// Whether a schedule is active for the script.
    pub fn is_schedule_running(&self, script_name: &str) -> bool {
        self.schedules.is_scheduled(script_name)
    }

    /// Snapshots of every active schedule.
    pub fn all_schedules(&self) -> Vec<ScheduleSnapshot> {
        self.schedules.all_schedules()
    }

    /// Human-readable status for one script row.
    pub fn script_status(&self, script: &ScriptInfo) -> String {
        if !script.is_executable {
            return "Error".to_string();
        }
        if script.strategy == ExecutionStrategy::Service {
            let state = self.service_status(&script.identifier);
            let text = state.as_ref();
            let mut chars = text.chars();
            return match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            };
        }
        "Ready".to_string()
    }

    fn execution_callback(
        &self,
        script: ScriptInfo,
        arguments: BTreeMap<String, String>,
    ) -> crate::schedule::ScheduleCallback {
        let executor = self.clone();
        Arc::new(move |name: &str| {
            let result = executor.execute(&script, &arguments);
            if result.success {
                info!("Scheduled execution of '{name}' completed successfully");
            } else {
                warn!(
                    "Scheduled execution of '{name}' failed: {}",
                    if result.error.is_empty() {
                        &result.message
                    } else {
                        &result.error
                    }
                );
            }
            Ok(())
        })
    }
}

/// Assembles `--name value` pairs in declaration order, skipping empties and
/// failing fast on missing required arguments before any process is spawned.
fn build_named_args(
    specs: &[ArgumentSpec],
    arguments: &BTreeMap<String, String>,
) -> Result<Vec<String>, String> {
    let mut named = Vec::new();
    for spec in specs {
        match arguments.get(&spec.name) {
            Some(value) if !value.is_empty() => {
                named.push(format!("--{}", spec.name));
                named.push(value.clone());
            }
            Some(_) => {}
            None if spec.required => {
                return Err(format!("Required argument '{}' not provided", spec.name));
            }
            None => {}
        }
    }
    Ok(named)
}

/// Spawns `cmd` detached in its own process group with both streams piped,
/// waits with the timeout ladder, and always drains and closes the pipes.
fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    token: &CancelToken,
) -> io::Result<Captured> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child.id();
    token.attach(pid);

    let stdout_reader = child.stdout.take().map(spawn_stream_reader);
    let stderr_reader = child.stderr.take().map(spawn_stream_reader);

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if token.is_cancelled() {
            cancelled = true;
            break terminate_ladder(&mut child, pid)?;
        }
        if Instant::now() >= deadline {
            timed_out = true;
            break terminate_ladder(&mut child, pid)?;
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    };

    token.detach();

    let stdout = stdout_reader
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default();
    let stderr = stderr_reader
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default();

    Ok(Captured {
        stdout,
        stderr,
        code: status.and_then(|s| s.code()),
        timed_out,
        cancelled,
    })
}

/// Graceful group terminate, bounded wait, then a group kill. Returns the
/// final exit status when one could be collected.
fn terminate_ladder(
    child: &mut std::process::Child,
    pid: u32,
) -> io::Result<Option<std::process::ExitStatus>> {
    let group = Pid::from_raw(pid as i32);
    match killpg(group, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!("Failed to terminate process group {pid}: {err}"),
    }

    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    }

    warn!("Force killing unresponsive process group {pid}");
    let _ = killpg(group, Signal::SIGKILL);
    child.wait().map(Some)
}

fn spawn_stream_reader(
    mut stream: impl io::Read + Send + 'static,
) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = stream.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

/// When the entire stdout is one JSON object, overlays `success` and
/// `message` from its keys and exposes the object as structured data. Any
/// other output shape leaves the result untouched.
fn apply_json_overlay(result: &mut ExecutionResult) {
    if result.output.is_empty() {
        return;
    }
    let Ok(value) = serde_json::from_str::<Value>(&result.output) else {
        return;
    };
    let Value::Object(map) = &value else {
        return;
    };

    if let Some(Value::String(message)) = map.get("message") {
        result.message = message.clone();
    }
    if let Some(Value::Bool(success)) = map.get("success") {
        result.success = *success;
    }
    result.data = Some(value);
}

/// Converts the function shim's JSON envelope into an execution result,
/// mirroring the return-value contract: `None` is a generic success, a dict
/// overlays `success`/`message` and becomes structured data, a string is the
/// message, a bool is the success flag.
fn convert_function_envelope(captured: &Captured) -> ExecutionResult {
    let stdout = captured.stdout.trim();
    let envelope = stdout
        .lines()
        .next_back()
        .and_then(|line| serde_json::from_str::<Value>(line).ok());

    let Some(Value::Object(map)) = envelope else {
        if captured.code == Some(0) {
            return ExecutionResult {
                success: true,
                message: "Script executed successfully".to_string(),
                output: stdout.to_string(),
                error: captured.stderr.trim().to_string(),
                return_code: captured.code,
                data: None,
            };
        }
        return ExecutionResult {
            success: false,
            message: String::new(),
            output: stdout.to_string(),
            error: format!("Function execution failed: {}", captured.stderr.trim()),
            return_code: captured.code,
            data: None,
        };
    };

    if let Some(Value::String(missing)) = map.get("__missing__") {
        return ExecutionResult::fail(format!(
            "Function '{missing}' not found in script"
        ));
    }

    let mut result = ExecutionResult {
        success: true,
        message: "Script executed successfully".to_string(),
        output: stdout.to_string(),
        error: captured.stderr.trim().to_string(),
        return_code: captured.code,
        data: None,
    };

    match map.get("__result__") {
        Some(Value::Null) | None => {}
        Some(Value::Object(inner)) => {
            if let Some(Value::Bool(success)) = inner.get("success") {
                result.success = *success;
            }
            if let Some(Value::String(message)) = inner.get("message") {
                result.message = message.clone();
            }
            result.data = Some(Value::Object(inner.clone()));
        }
        Some(Value::String(message)) => result.message = message.clone(),
        Some(Value::Bool(success)) => {
            result.success = *success;
            result.message = if *success {
                "Script executed successfully".to_string()
            } else {
                "Script execution failed".to_string()
            };
        }
        Some(other) => result.message = other.to_string(),
    }

    result
}

fn timeout_result(captured: &Captured, timeout: Duration) -> ExecutionResult {
    ExecutionResult {
        success: false,
        message: format!(
            "Script execution timed out ({} seconds)",
            timeout.as_secs()
        ),
        output: captured.stdout.trim().to_string(),
        error: captured.stderr.trim().to_string(),
        return_code: captured.code,
        data: None,
    }
}

fn cancelled_result(captured: &Captured) -> ExecutionResult {
    ExecutionResult {
        success: false,
        message: "Execution cancelled".to_string(),
        output: captured.stdout.trim().to_string(),
        error: captured.stderr.trim().to_string(),
        return_code: captured.code,
        data: None,
    }
}

fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
