//! Service health monitoring and crash-restart policy.
//!
//! A background ticker probes every active service on a fixed cadence,
//! reports state transitions to the event bus, and schedules bounded
//! restarts for crashes. Restart delays are tracked as due-times checked on
//! the next tick rather than blocking sleeps.
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use crate::{
    events::{Event, EventBus},
    service::{ServiceRuntime, ServiceState},
    settings::SettingsStore,
};

struct PendingRestart {
    due: Instant,
    script_path: PathBuf,
    arguments: std::collections::BTreeMap<String, String>,
    restart_count: u32,
}

struct MonitorShared {
    stop: AtomicBool,
    pending: Mutex<HashMap<String, PendingRestart>>,
    last_states: Mutex<HashMap<String, ServiceState>>,
}

/// Periodic health monitor with auto-restart.
pub struct ServiceMonitor {
    runtime: ServiceRuntime,
    settings: SettingsStore,
    events: EventBus,
    interval: Duration,
    shared: Arc<MonitorShared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServiceMonitor {
    /// Creates a monitor over `runtime` probing at `interval`.
    pub fn new(
        runtime: ServiceRuntime,
        settings: SettingsStore,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            runtime,
            settings,
            events,
            interval,
            shared: Arc::new(MonitorShared {
                stop: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
                last_states: Mutex::new(HashMap::new()),
            }),
            handle: None,
        }
    }

    /// Starts the probe thread. Idempotent.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.shared.stop.store(false, Ordering::SeqCst);

        let runtime = self.runtime.clone();
        let settings = self.settings.clone();
        let events = self.events.clone();
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;

        self.handle = Some(thread::spawn(move || {
            let mut system = System::new();
            while !shared.stop.load(Ordering::SeqCst) {
                tick(&runtime, &settings, &events, &shared, &mut system);

                let mut slept = Duration::ZERO;
                while slept < interval {
                    if shared.stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let remaining = interval.saturating_sub(slept);
                    let step = remaining.min(Duration::from_millis(100));
                    thread::sleep(step);
                    slept += step;
                }
            }
        }));
        info!("Service monitor started (interval: {:?})", self.interval);
    }

    /// Stops the probe thread and joins it.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("Service monitor stopped");
        }
    }

    /// Whether the probe thread is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shared.stop.load(Ordering::SeqCst)
    }

    /// Clears the restart counter after manual intervention.
    pub fn reset_restart_count(&self, script_name: &str) {
        self.runtime.set_restart_count(script_name, 0);
        info!("Reset restart count for service '{script_name}'");
    }

    /// Runs one probe pass immediately; used by tests to avoid waiting out
    /// the poll interval.
    #[doc(hidden)]
    pub fn tick_for_test(&self) {
        let mut system = System::new();
        tick(
            &self.runtime,
            &self.settings,
            &self.events,
            &self.shared,
            &mut system,
        );
    }
}

impl Drop for ServiceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick(
    runtime: &ServiceRuntime,
    settings: &SettingsStore,
    events: &EventBus,
    shared: &MonitorShared,
    system: &mut System,
) {
    fire_due_restarts(runtime, events, shared);

    // Keep the process table warm; status probes rely on try_wait for
    // direct children, but the table backs uptime and liveness queries.
    system.refresh_processes(ProcessesToUpdate::All, true);

    for handle in runtime.all_services() {
        let name = handle.script_name.clone();
        let current = runtime.status(&name);

        {
            let mut last_states = shared.last_states.lock().unwrap();
            let previous = last_states.get(&name).copied();
            if previous != Some(current) {
                debug!("Service '{name}' state changed: {previous:?} -> {current}");
                events.publish(Event::ServiceStateChanged {
                    name: name.clone(),
                    state: current,
                });
                last_states.insert(name.clone(), current);
            }
        }

        if current == ServiceState::Crashed {
            handle_crash(runtime, settings, events, shared, &name);
        }
    }
}

fn fire_due_restarts(runtime: &ServiceRuntime, events: &EventBus, shared: &MonitorShared) {
    let due: Vec<(String, PendingRestart)> = {
        let mut pending = shared.pending.lock().unwrap();
        let now = Instant::now();
        let names: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(name, _)| name.clone())
            .collect();
        names
            .into_iter()
            .filter_map(|name| pending.remove(&name).map(|p| (name, p)))
            .collect()
    };

    for (name, restart) in due {
        info!(
            "Attempting to restart service '{name}' (restart #{})",
            restart.restart_count
        );
        match runtime.start_service(&name, &restart.script_path, &restart.arguments) {
            Ok(_) => {
                runtime.set_restart_count(&name, restart.restart_count);
                info!("Service '{name}' restarted successfully");
                events.publish(Event::ServiceRestarted(name));
            }
            Err(err) => {
                error!("Failed to restart service '{name}': {err}");
                events.publish(Event::ServiceRestartFailed {
                    name,
                    error: err.to_string(),
                });
            }
        }
    }
}

fn handle_crash(
    runtime: &ServiceRuntime,
    settings: &SettingsStore,
    events: &EventBus,
    shared: &MonitorShared,
    name: &str,
) {
    events.publish(Event::ServiceCrashed(name.to_string()));
    warn!("Service '{name}' crashed");

    {
        let pending = shared.pending.lock().unwrap();
        if pending.contains_key(name) {
            debug!("Service '{name}' already pending restart, skipping");
            return;
        }
    }

    let Some(snapshot) = runtime.take_crashed(name) else {
        return;
    };

    let config = settings.service_settings(name);
    if !config.auto_restart {
        info!("Auto-restart disabled for service '{name}'");
        return;
    }

    if snapshot.restart_count >= config.max_restarts {
        error!(
            "Service '{name}' reached max restart limit ({})",
            snapshot.restart_count
        );
        events.publish(Event::ServiceRestartLimitReached(name.to_string()));
        return;
    }

    let delay = Duration::from_secs(config.restart_delay_seconds);
    info!("Scheduling restart for service '{name}' in {delay:?}");
    let mut pending = shared.pending.lock().unwrap();
    pending.insert(
        name.to_string(),
        PendingRestart {
            due: Instant::now() + delay,
            script_path: snapshot.script_path,
            arguments: snapshot.arguments,
            restart_count: snapshot.restart_count + 1,
        },
    );
}
