//! Long-running service processes: detached spawn, merged log capture, and
//! process-group teardown.
//!
//! Each service child is placed in its own process group at spawn; the group
//! id is the single token that terminates the entire process tree, covering
//! grandchildren the script spawned itself. Stdout and stderr are merged
//! into one append-mode log file under `logs/services/<name>.log`.
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant, SystemTime},
};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use nix::{
    errno::Errno,
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::{
    constants::CHILD_POLL_INTERVAL,
    error::ServiceError,
    interpreter::{InterpreterKind, InterpreterResolver},
    settings::ServiceSettings,
};

/// Lifecycle states of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    Error,
}

/// Immutable snapshot of one active service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    /// Canonical script identifier the service runs.
    pub script_name: String,
    /// Path of the service script.
    pub script_path: PathBuf,
    /// Process id, equal to the process-group id.
    pub pid: u32,
    /// Spawn time.
    pub start_time: SystemTime,
    /// Automatic restarts consumed this lifetime.
    pub restart_count: u32,
    /// Merged stdout+stderr log file.
    pub log_file_path: PathBuf,
    /// Arguments the service was started with, reused on restart.
    pub arguments: BTreeMap<String, String>,
    /// Last state written by the runtime or monitor.
    pub state: ServiceState,
}

/// Detailed service information for the UI.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Snapshot of the handle.
    pub handle: ServiceHandle,
    /// Observed state at collection time.
    pub state: ServiceState,
    /// Uptime while running, zero otherwise.
    pub uptime: Duration,
    /// Supervision settings in effect.
    pub settings: ServiceSettings,
}

struct ActiveService {
    script_name: String,
    script_path: PathBuf,
    pid: u32,
    start_time: SystemTime,
    restart_count: u32,
    log_file_path: PathBuf,
    arguments: BTreeMap<String, String>,
    state: ServiceState,
    child: Child,
    log_file: Option<File>,
}

impl ActiveService {
    fn snapshot(&self) -> ServiceHandle {
        ServiceHandle {
            script_name: self.script_name.clone(),
            script_path: self.script_path.clone(),
            pid: self.pid,
            start_time: self.start_time,
            restart_count: self.restart_count,
            log_file_path: self.log_file_path.clone(),
            arguments: self.arguments.clone(),
            state: self.state,
        }
    }
}

/// Spawns and tracks detached service processes.
#[derive(Clone)]
pub struct ServiceRuntime {
    services: Arc<Mutex<HashMap<String, ActiveService>>>,
    logs_directory: PathBuf,
    resolver: InterpreterResolver,
}

impl ServiceRuntime {
    /// Creates a runtime that writes service logs under `logs_directory`.
    pub fn new(logs_directory: PathBuf, resolver: InterpreterResolver) -> Self {
        Self {
            services: Arc::new(Mutex::new(HashMap::new())),
            logs_directory,
            resolver,
        }
    }

    /// Starts a service process. Fails when a service with the same name is
    /// already active. On spawn failure the log file is closed and no entry
    /// is left behind.
    pub fn start_service(
        &self,
        script_name: &str,
        script_path: &Path,
        arguments: &BTreeMap<String, String>,
    ) -> Result<ServiceHandle, ServiceError> {
        {
            let services = self.services.lock().unwrap();
            if services.contains_key(script_name) {
                return Err(ServiceError::AlreadyRunning(script_name.to_string()));
            }
        }

        info!("Starting service: {script_name}");

        let interpreter = self
            .resolver
            .resolve(InterpreterKind::Python)
            .ok_or_else(|| ServiceError::NoInterpreter(script_name.to_string()))?;

        let log_file_path = self.logs_directory.join(format!("{script_name}.log"));
        let log_file = open_log_file(&log_file_path).map_err(|source| {
            ServiceError::LogFile {
                service: script_name.to_string(),
                source,
            }
        })?;

        let stdout = log_file.try_clone().map_err(|source| ServiceError::LogFile {
            service: script_name.to_string(),
            source,
        })?;
        let stderr = log_file.try_clone().map_err(|source| ServiceError::LogFile {
            service: script_name.to_string(),
            source,
        })?;

        let mut cmd = Command::new(&interpreter);
        cmd.arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUNBUFFERED", "1");

        for (name, value) in arguments {
            if !value.is_empty() {
                cmd.arg(format!("--{name}")).arg(value);
            }
        }

        // A fresh process group is the kill token for the whole tree.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                drop(log_file);
                warn!("Failed to start service '{script_name}': {source}");
                return Err(ServiceError::SpawnFailed {
                    service: script_name.to_string(),
                    source,
                });
            }
        };

        let pid = child.id();
        info!("Service '{script_name}' started with PID {pid}");

        let entry = ActiveService {
            script_name: script_name.to_string(),
            script_path: script_path.to_path_buf(),
            pid,
            start_time: SystemTime::now(),
            restart_count: 0,
            log_file_path,
            arguments: arguments.clone(),
            state: ServiceState::Running,
            child,
            log_file: Some(log_file),
        };
        let handle = entry.snapshot();

        let mut services = self.services.lock().unwrap();
        services.insert(script_name.to_string(), entry);
        Ok(handle)
    }

    /// Stops a running service: graceful group terminate, bounded wait, then
    /// a forced group kill. The log file and entry are always released.
    pub fn stop_service(
        &self,
        script_name: &str,
        timeout: Duration,
    ) -> Result<(), ServiceError> {
        let pid = {
            let mut services = self.services.lock().unwrap();
            let Some(entry) = services.get_mut(script_name) else {
                return Err(ServiceError::NotRunning(script_name.to_string()));
            };
            entry.state = ServiceState::Stopping;

            if let Ok(Some(_)) = entry.child.try_wait() {
                info!("Service '{script_name}' already terminated");
                Self::cleanup_locked(&mut services, script_name);
                return Ok(());
            }
            entry.pid
        };

        info!("Stopping service '{script_name}' (PID {pid})");
        let group = Pid::from_raw(pid as i32);
        match killpg(group, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                warn!("Failed to signal service group {pid}: {err}");
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut services = self.services.lock().unwrap();
                let Some(entry) = services.get_mut(script_name) else {
                    return Ok(());
                };
                match entry.child.try_wait() {
                    Ok(Some(_)) => {
                        info!("Service '{script_name}' stopped gracefully");
                        Self::cleanup_locked(&mut services, script_name);
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(source) => {
                        Self::cleanup_locked(&mut services, script_name);
                        return Err(ServiceError::StopFailed {
                            service: script_name.to_string(),
                            source,
                        });
                    }
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        }

        warn!("Service '{script_name}' did not stop gracefully, forcing termination");
        let _ = killpg(group, Signal::SIGKILL);

        let mut services = self.services.lock().unwrap();
        if let Some(entry) = services.get_mut(script_name) {
            let _ = entry.child.wait();
            info!("Service '{script_name}' terminated forcefully");
            Self::cleanup_locked(&mut services, script_name);
        }
        Ok(())
    }

    /// Stops every active service with the same timeout each.
    pub fn stop_all(&self, timeout: Duration) -> usize {
        let names: Vec<String> = self.service_names();
        info!("Stopping all services ({} active)", names.len());

        let mut stopped = 0;
        for name in names {
            match self.stop_service(&name, timeout) {
                Ok(()) => stopped += 1,
                Err(err) => warn!("Error stopping service '{name}': {err}"),
            }
        }
        stopped
    }

    /// Whether the named service is active and its process alive.
    pub fn is_running(&self, script_name: &str) -> bool {
        let mut services = self.services.lock().unwrap();
        match services.get_mut(script_name) {
            Some(entry) => matches!(entry.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Observed state of a service. A process that exited outside a stop
    /// request reports `Crashed`.
    pub fn status(&self, script_name: &str) -> ServiceState {
        let mut services = self.services.lock().unwrap();
        let Some(entry) = services.get_mut(script_name) else {
            return ServiceState::Stopped;
        };

        match entry.child.try_wait() {
            Ok(Some(_)) | Err(_) => {
                if entry.state == ServiceState::Stopping {
                    ServiceState::Stopped
                } else {
                    ServiceState::Crashed
                }
            }
            Ok(None) => entry.state,
        }
    }

    /// Snapshot of one active service.
    pub fn handle(&self, script_name: &str) -> Option<ServiceHandle> {
        let services = self.services.lock().unwrap();
        services.get(script_name).map(ActiveService::snapshot)
    }

    /// Names of every active service.
    pub fn service_names(&self) -> Vec<String> {
        let services = self.services.lock().unwrap();
        services.keys().cloned().collect()
    }

    /// Snapshots of every active service.
    pub fn all_services(&self) -> Vec<ServiceHandle> {
        let services = self.services.lock().unwrap();
        services.values().map(ActiveService::snapshot).collect()
    }

    /// Consumes a crashed entry: reaps the child, releases the log file, and
    /// returns the snapshot so the monitor can decide on a restart. Returns
    /// `None` when the service is absent or still running.
    pub fn take_crashed(&self, script_name: &str) -> Option<ServiceHandle> {
        let mut services = self.services.lock().unwrap();
        let exited = {
            let entry = services.get_mut(script_name)?;
            matches!(entry.child.try_wait(), Ok(Some(_)) | Err(_))
                && entry.state != ServiceState::Stopping
        };
        if !exited {
            return None;
        }

        let mut entry = services.remove(script_name)?;
        let _ = entry.child.wait();
        entry.state = ServiceState::Crashed;
        let snapshot = entry.snapshot();
        drop(entry.log_file.take());
        debug!("Consumed crashed service '{script_name}'");
        Some(snapshot)
    }

    /// Overrides the restart counter on an active handle; the monitor uses
    /// this to carry the count across a respawn.
    pub fn set_restart_count(&self, script_name: &str, count: u32) {
        let mut services = self.services.lock().unwrap();
        if let Some(entry) = services.get_mut(script_name) {
            entry.restart_count = count;
        }
    }

    /// Detailed information for the UI, if the service is active.
    pub fn info(&self, script_name: &str, settings: ServiceSettings) -> Option<ServiceInfo> {
        let state = self.status(script_name);
        let handle = self.handle(script_name)?;
        let uptime = if state == ServiceState::Running {
            handle.start_time.elapsed().unwrap_or_default()
        } else {
            Duration::ZERO
        };
        Some(ServiceInfo {
            handle,
            state,
            uptime,
            settings,
        })
    }

    fn cleanup_locked(services: &mut HashMap<String, ActiveService>, script_name: &str) {
        if let Some(mut entry) = services.remove(script_name) {
            drop(entry.log_file.take());
            debug!("Cleaned up service '{script_name}'");
        }
    }
}

/// Opens a service log in append mode, creating parent directories.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
