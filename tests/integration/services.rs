//! Service supervision end-to-end: spawn, log capture, crash-restart
//! policy, and process-group teardown.
mod common;

use std::{collections::BTreeMap, fs, time::Duration};

use bindkit::{
    events::{Event, EventBus},
    executor::ScriptExecutor,
    monitor::ServiceMonitor,
    service::ServiceState,
    settings::ServiceSettings,
};
use common::{python3, settings, wait_until, write_script};
use nix::{sys::signal::kill, unistd::Pid};
use tempfile::tempdir;

fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[test]
fn crash_restart_policy_stops_at_the_limit() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(temp.path(), "flaky.py", "import sys\nsys.exit(1)\n");

    let store = settings(temp.path());
    store.set_service_settings(
        "flaky",
        &ServiceSettings {
            enabled: true,
            auto_restart: true,
            max_restarts: 3,
            restart_delay_seconds: 0,
        },
    );

    let events = EventBus::new();
    let rx = events.subscribe();
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        events.clone(),
        temp.path().join("logs/services"),
    );
    let services = executor.services().clone();
    let monitor = ServiceMonitor::new(
        services.clone(),
        store,
        events,
        Duration::from_secs(5),
    );

    let script = temp.path().join("scripts/flaky.py");
    services
        .start_service("flaky", &script, &BTreeMap::new())
        .unwrap();

    // Drive the monitor manually: each pass observes one crash, then the
    // next fires the pending restart.
    let mut limit_reached = false;
    for _ in 0..40 {
        monitor.tick_for_test();
        std::thread::sleep(Duration::from_millis(100));
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::ServiceRestartLimitReached(ref n) if n == "flaky") {
                limit_reached = true;
            }
        }
        if limit_reached {
            break;
        }
    }
    assert!(limit_reached, "restart limit was never reached");

    // After the limit the entry is consumed; nothing restarts it again.
    monitor.tick_for_test();
    assert_eq!(services.status("flaky"), ServiceState::Stopped);
    assert!(services.handle("flaky").is_none());
}

#[test]
fn restart_counter_is_preserved_across_respawns() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    // Crashes quickly, but slowly enough for the monitor to see it running.
    write_script(
        temp.path(),
        "wobbly.py",
        "import sys, time\ntime.sleep(0.2)\nsys.exit(1)\n",
    );

    let store = settings(temp.path());
    store.set_service_settings(
        "wobbly",
        &ServiceSettings {
            enabled: true,
            auto_restart: true,
            max_restarts: 5,
            restart_delay_seconds: 0,
        },
    );

    let events = EventBus::new();
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        events.clone(),
        temp.path().join("logs/services"),
    );
    let services = executor.services().clone();
    let monitor =
        ServiceMonitor::new(services.clone(), store, events, Duration::from_secs(5));

    let script = temp.path().join("scripts/wobbly.py");
    services
        .start_service("wobbly", &script, &BTreeMap::new())
        .unwrap();

    // Let it crash, consume the crash, and fire the first restart.
    assert!(wait_until(Duration::from_secs(5), || {
        !services.is_running("wobbly")
    }));
    monitor.tick_for_test();
    monitor.tick_for_test();

    assert!(wait_until(Duration::from_secs(5), || {
        services
            .handle("wobbly")
            .map(|h| h.restart_count == 1)
            .unwrap_or(false)
    }));

    services
        .stop_service("wobbly", Duration::from_secs(5))
        .ok();
}

#[test]
fn manual_restart_resets_the_counter() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(temp.path(), "steady.py", "import time\ntime.sleep(60)\n");

    let store = settings(temp.path());
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        EventBus::new(),
        temp.path().join("logs/services"),
    );
    let services = executor.services().clone();
    let script = temp.path().join("scripts/steady.py");

    services
        .start_service("steady", &script, &BTreeMap::new())
        .unwrap();
    services.set_restart_count("steady", 2);
    assert_eq!(services.handle("steady").unwrap().restart_count, 2);

    services
        .stop_service("steady", Duration::from_secs(5))
        .unwrap();
    services
        .start_service("steady", &script, &BTreeMap::new())
        .unwrap();
    assert_eq!(services.handle("steady").unwrap().restart_count, 0);

    services
        .stop_service("steady", Duration::from_secs(5))
        .unwrap();
}

#[test]
fn stopping_a_service_kills_its_grandchildren() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    let pid_file = temp.path().join("grandchild.pid");
    write_script(
        temp.path(),
        "parent.py",
        &format!(
            concat!(
                "import subprocess, sys, time\n",
                "child = subprocess.Popen([sys.executable, '-c', 'import time; time.sleep(120)'])\n",
                "open(r'{}', 'w').write(str(child.pid))\n",
                "time.sleep(120)\n",
            ),
            pid_file.display()
        ),
    );

    let store = settings(temp.path());
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        EventBus::new(),
        temp.path().join("logs/services"),
    );
    let services = executor.services().clone();
    let script = temp.path().join("scripts/parent.py");

    let handle = services
        .start_service("parent", &script, &BTreeMap::new())
        .unwrap();
    assert!(wait_until(Duration::from_secs(10), || pid_file.exists()));
    let grandchild: u32 = fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(pid_alive(handle.pid));
    assert!(pid_alive(grandchild));

    services
        .stop_service("parent", Duration::from_secs(5))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !pid_alive(handle.pid) && !pid_alive(grandchild)
    }));
}

#[test]
fn service_logs_capture_merged_output() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    write_script(
        temp.path(),
        "loggy.py",
        concat!(
            "import sys, time\n",
            "print('out line', flush=True)\n",
            "print('err line', file=sys.stderr, flush=True)\n",
            "time.sleep(60)\n",
        ),
    );

    let store = settings(temp.path());
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        EventBus::new(),
        temp.path().join("logs/services"),
    );
    let services = executor.services().clone();
    let script = temp.path().join("scripts/loggy.py");

    let handle = services
        .start_service("loggy", &script, &BTreeMap::new())
        .unwrap();
    assert_eq!(
        handle.log_file_path,
        temp.path().join("logs/services/loggy.log")
    );

    assert!(wait_until(Duration::from_secs(10), || {
        fs::read_to_string(&handle.log_file_path)
            .map(|log| log.contains("out line") && log.contains("err line"))
            .unwrap_or(false)
    }));

    services.stop_service("loggy", Duration::from_secs(5)).unwrap();
}
