//! bindkit host binary: wires the execution core together, restores
//! persisted hotkeys, schedules, and services, and runs until interrupted.
use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bindkit::{
    cli::Cli,
    collection::ScriptCollection,
    constants::{INSTANCE_LOCK_FILE, MONITOR_POLL_INTERVAL, SERVICE_STOP_TIMEOUT},
    events::{Event, EventBus},
    execmodel::ExecutionModel,
    executor::ScriptExecutor,
    hotkey::{
        backend::{HotkeyAdapter, NullHotkeyApi},
        registry::HotkeyRegistry,
    },
    loader::ScriptLoader,
    lock::{InstanceLock, LockOutcome},
    monitor::ServiceMonitor,
    runtime,
    settings::SettingsStore,
};

fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    runtime::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Fatal startup failure: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings_path = cli.config.clone().unwrap_or_else(runtime::settings_path);
    let settings = SettingsStore::open(&settings_path)?;

    let _instance_lock = if settings.single_instance() {
        let lock_path = runtime::config_dir().join(INSTANCE_LOCK_FILE);
        match InstanceLock::acquire(&lock_path)? {
            LockOutcome::Acquired(lock) => Some(lock),
            LockOutcome::HeldByOther { pid } => {
                info!("Another instance is already running (pid {pid:?}); exiting");
                return Ok(());
            }
        }
    } else {
        None
    };

    let events = EventBus::new();
    spawn_event_logger(&events);

    let scripts_dir = cli
        .scripts_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("scripts"));
    let loader = ScriptLoader::new(scripts_dir, settings.clone());
    let collection = ScriptCollection::new(loader, settings.clone(), events.clone());
    let scripts = collection.discover();
    info!(
        "Discovered {} scripts ({} failed)",
        scripts.len(),
        collection.failed_scripts().len()
    );

    let executor = ScriptExecutor::new(settings.clone(), events.clone());
    executor.schedules().start_ticker();

    let model = Arc::new(ExecutionModel::new(
        executor.clone(),
        collection.clone(),
        events.clone(),
    ));

    let registry = HotkeyRegistry::load(settings.clone(), events.clone());
    let adapter = HotkeyAdapter::new(NullHotkeyApi::default(), events.clone());
    let mut dead_chords = 0usize;
    for (name, chord) in registry.all() {
        if adapter.register(&name, &chord).is_err() {
            dead_chords += 1;
        }
    }
    if dead_chords > 0 {
        events.publish(Event::Notification {
            title: "Hotkeys unavailable".to_string(),
            body: format!("{dead_chords} hotkey binding(s) could not be registered"),
        });
    }

    restore_schedules(&settings, &collection, &executor);
    restore_services(&settings, &collection, &executor);

    let mut monitor = ServiceMonitor::new(
        executor.services().clone(),
        settings.clone(),
        events.clone(),
        MONITOR_POLL_INTERVAL,
    );
    monitor.start();

    // Hotkey presses dispatch into the execution model.
    let trigger_rx = events.subscribe();
    let trigger_model = Arc::clone(&model);
    thread::spawn(move || {
        for event in trigger_rx {
            if let Event::HotkeyTriggered { name, chord } = event {
                debug!("Dispatching '{name}' for chord {chord}");
                if let Err(err) = trigger_model.dispatch(&name, None) {
                    warn!("Hotkey dispatch failed: {err}");
                }
            }
        }
    });

    if cli.minimized {
        info!("Started minimized; tray icon only");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || shutdown_flag.store(true, Ordering::SeqCst))?;

    info!("bindkit running");
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    // Ordered shutdown: schedules, services, hotkeys, module cache.
    info!("Shutting down");
    let stopped = executor.schedules().stop_all();
    executor.schedules().shutdown();
    info!("Stopped {stopped} schedule(s)");

    monitor.stop();
    let stopped = executor.services().stop_all(SERVICE_STOP_TIMEOUT);
    info!("Stopped {stopped} service(s)");

    adapter.unregister_all();

    let cleared = executor.clear_module_cache();
    info!("Cleared {cleared} cached module(s)");

    model.shutdown();
    Ok(())
}

/// Stand-in for the UI event sink: logs every event, surfacing
/// notifications prominently.
fn spawn_event_logger(events: &EventBus) {
    let rx = events.subscribe();
    thread::spawn(move || {
        for event in rx {
            match event {
                Event::Notification { title, body } => info!("[notify] {title}: {body}"),
                other => debug!("event: {other:?}"),
            }
        }
    });
}

/// Re-arms persisted schedules. Runtime state wins over the persisted
/// timestamps; the stored `next_run` only informs the first fire.
fn restore_schedules(
    settings: &SettingsStore,
    collection: &ScriptCollection,
    executor: &ScriptExecutor,
) {
    for identifier in settings.scheduled_script_names() {
        let Some(config) = settings.schedule_settings(&identifier) else {
            continue;
        };
        if !config.enabled {
            continue;
        }
        let Some(script) = collection.get(&identifier) else {
            warn!("Persisted schedule references unknown script '{identifier}'");
            continue;
        };

        let arguments = collection.script_arguments(&identifier);
        let result = match config.kind.as_str() {
            "cron" => {
                executor.start_cron_schedule(&script, &config.cron_expression, &arguments)
            }
            _ => executor.start_interval_schedule(
                &script,
                config.interval_seconds,
                &arguments,
            ),
        };
        if result.success {
            info!("Restored schedule for '{identifier}'");
        } else {
            warn!("Failed to restore schedule for '{identifier}': {}", result.error);
        }
    }
}

/// Starts services the user has enabled.
fn restore_services(
    settings: &SettingsStore,
    collection: &ScriptCollection,
    executor: &ScriptExecutor,
) {
    for identifier in settings.service_script_names() {
        let Some(script) = collection.get(&identifier) else {
            warn!("Service configuration references unknown script '{identifier}'");
            continue;
        };

        let arguments = collection.script_arguments(&identifier);
        match executor
            .services()
            .start_service(&script.identifier, &script.file_path, &arguments)
        {
            Ok(handle) => info!(
                "Started service '{}' (pid {})",
                script.identifier, handle.pid
            ),
            Err(err) => warn!("Failed to start service '{}': {err}", script.identifier),
        }
    }
}
