//! Schedule runtime driven end-to-end through the executor bridge.
mod common;

use std::{collections::BTreeMap, fs, time::Duration};

use bindkit::{
    events::{Event, EventBus},
    executor::ScriptExecutor,
    loader::ScriptLoader,
};
use common::{python3, settings, wait_until, write_script};
use tempfile::tempdir;

#[test]
fn scheduled_script_runs_and_timestamps_persist() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    let witness = temp.path().join("fired.txt");
    write_script(
        temp.path(),
        "tick.py",
        &format!(
            "if __name__ == \"__main__\":\n    open(r'{}', 'a').write('x')\n",
            witness.display()
        ),
    );

    let store = settings(temp.path());
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        EventBus::new(),
        temp.path().join("logs/services"),
    );
    let mut loader = ScriptLoader::new(temp.path().join("scripts"), store.clone());
    loader.discover();
    let script = loader.get("tick.py").unwrap();

    let started = executor.start_interval_schedule(&script, 10, &BTreeMap::new());
    assert!(started.success, "{}", started.error);

    executor.schedules().force_due_for_test("tick.py");
    executor.schedules().tick_for_test();

    assert!(wait_until(Duration::from_secs(15), || witness.exists()));
    assert!(wait_until(Duration::from_secs(5), || {
        executor
            .schedules()
            .snapshot("tick.py")
            .map(|s| !s.is_executing)
            .unwrap_or(false)
    }));

    let persisted = store.schedule_settings("tick.py").unwrap();
    let last_run = persisted.last_run.expect("last_run persisted");
    let next_run = persisted.next_run.expect("next_run persisted");
    let gap = next_run - last_run;
    assert!((9.0..=11.0).contains(&gap), "gap was {gap}");

    assert!(executor.stop_schedule("tick.py").success);
    assert!(!executor.is_schedule_running("tick.py"));
}

#[test]
fn overlapping_ticks_block_and_never_stack() {
    if python3().is_none() {
        return;
    }
    let temp = tempdir().unwrap();
    let witness = temp.path().join("runs.txt");
    write_script(
        temp.path(),
        "slow.py",
        &format!(
            concat!(
                "import time\n",
                "if __name__ == \"__main__\":\n",
                "    open(r'{}', 'a').write('x')\n",
                "    time.sleep(2)\n",
            ),
            witness.display()
        ),
    );

    let store = settings(temp.path());
    let events = EventBus::new();
    let rx = events.subscribe();
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        events,
        temp.path().join("logs/services"),
    );
    let mut loader = ScriptLoader::new(temp.path().join("scripts"), store);
    loader.discover();
    let script = loader.get("slow.py").unwrap();

    assert!(
        executor
            .start_interval_schedule(&script, 10, &BTreeMap::new())
            .success
    );

    executor.schedules().force_due_for_test("slow.py");
    executor.schedules().tick_for_test();
    assert!(wait_until(Duration::from_secs(10), || witness.exists()));

    // Two more due ticks arrive while the first callback is still sleeping.
    executor.schedules().force_due_for_test("slow.py");
    executor.schedules().tick_for_test();
    executor.schedules().force_due_for_test("slow.py");
    executor.schedules().tick_for_test();

    assert!(wait_until(Duration::from_secs(10), || {
        executor
            .schedules()
            .snapshot("slow.py")
            .map(|s| !s.is_executing)
            .unwrap_or(false)
    }));

    let runs = fs::read_to_string(&witness).unwrap_or_default();
    assert_eq!(runs.len(), 1, "exactly one callback ran");

    let mut blocked = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, Event::ScheduleBlocked(ref name) if name == "slow.py") {
            blocked += 1;
        }
    }
    assert!(blocked >= 2, "saw {blocked} blocked ticks");

    executor.stop_schedule("slow.py");
}

#[test]
fn interval_reconfiguration_revalidates() {
    let temp = tempdir().unwrap();
    write_script(temp.path(), "job.py", "print('j')\n");

    let store = settings(temp.path());
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        EventBus::new(),
        temp.path().join("logs/services"),
    );
    let mut loader = ScriptLoader::new(temp.path().join("scripts"), store);
    loader.discover();
    let script = loader.get("job.py").unwrap();

    assert!(
        executor
            .start_interval_schedule(&script, 30, &BTreeMap::new())
            .success
    );
    assert!(executor.schedules().update_interval("job.py", 120).is_ok());
    assert!(executor.schedules().update_interval("job.py", 3).is_err());
    assert!(
        executor
            .schedules()
            .update_interval("missing", 60)
            .is_err()
    );
    executor.stop_schedule("job.py");
}

#[test]
fn cron_schedules_validate_and_preview() {
    let temp = tempdir().unwrap();
    write_script(temp.path(), "nightly.py", "print('n')\n");

    let store = settings(temp.path());
    let executor = ScriptExecutor::with_log_dir(
        store.clone(),
        EventBus::new(),
        temp.path().join("logs/services"),
    );
    let mut loader = ScriptLoader::new(temp.path().join("scripts"), store);
    loader.discover();
    let script = loader.get("nightly.py").unwrap();

    let bad = executor.start_cron_schedule(&script, "61 25 * * *", &BTreeMap::new());
    assert!(!bad.success);

    let good = executor.start_cron_schedule(&script, "0 3 * * *", &BTreeMap::new());
    assert!(good.success, "{}", good.error);

    let snapshot = executor.schedules().snapshot("nightly.py").unwrap();
    assert!(snapshot.next_run.unwrap() > std::time::SystemTime::now());

    assert!(executor.schedules().update_cron("nightly.py", "0 4 * * 1-5").is_ok());
    assert!(executor.schedules().update_cron("nightly.py", "bogus").is_err());

    assert_eq!(executor.schedules().stop_all(), 1);
}
