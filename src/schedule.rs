//! Interval and CRON schedule runtime.
//!
//! A single ticker thread scans active schedules once per second and fires
//! due entries. Callbacks are handed to a bounded worker pool so a slow
//! script never stalls the ticker; the `is_executing` flag is the overlap
//! gate that keeps at most one callback in flight per schedule, with blocked
//! ticks reported rather than queued. CRON schedules hold a stateful
//! iterator that is advanced on each fire, which avoids the double-skip a
//! naive "recompute from now" suffers when ticks arrive slightly early.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{Local, Utc};
use cron::{OwnedScheduleIterator, Schedule};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::{
    constants::{
        CRON_CATCHUP_LIMIT, MAX_INTERVAL_SECONDS, MIN_INTERVAL_SECONDS,
        SCHEDULE_POOL_SIZE, SCHEDULE_TICK_INTERVAL,
    },
    error::ScheduleError,
    events::{Event, EventBus},
    pool::WorkerPool,
    settings::SettingsStore,
};

/// Schedule lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ScheduleState {
    Stopped,
    Scheduled,
    Running,
    Error,
}

/// The two supported schedule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ScheduleKind {
    Interval,
    Cron,
}

/// Callback invoked when a schedule fires. An `Err` transitions the
/// schedule into the `Error` state until the next clean run.
pub type ScheduleCallback = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// Public snapshot of one active schedule.
#[derive(Debug, Clone)]
pub struct ScheduleSnapshot {
    /// Schedule name (canonical script identifier).
    pub script_name: String,
    /// Path of the scheduled script.
    pub script_path: PathBuf,
    /// Interval or CRON.
    pub kind: ScheduleKind,
    /// Interval between runs, for interval schedules.
    pub interval: Option<Duration>,
    /// CRON expression, for CRON schedules.
    pub cron_expression: Option<String>,
    /// Time of the last fired run.
    pub last_run: Option<SystemTime>,
    /// Time of the next planned run.
    pub next_run: Option<SystemTime>,
    /// Whether a callback is currently in flight.
    pub is_executing: bool,
    /// Current state.
    pub state: ScheduleState,
}

struct ActiveSchedule {
    script_name: String,
    script_path: PathBuf,
    kind: ScheduleKind,
    interval: Option<Duration>,
    cron_expression: Option<String>,
    cron_iter: Option<OwnedScheduleIterator<Local>>,
    last_run: Option<SystemTime>,
    next_run: Option<SystemTime>,
    is_executing: bool,
    state: ScheduleState,
    callback: ScheduleCallback,
}

impl ActiveSchedule {
    fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            script_name: self.script_name.clone(),
            script_path: self.script_path.clone(),
            kind: self.kind,
            interval: self.interval,
            cron_expression: self.cron_expression.clone(),
            last_run: self.last_run,
            next_run: self.next_run,
            is_executing: self.is_executing,
            state: self.state,
        }
    }
}

/// Drives interval and CRON schedules from a shared ticker thread.
#[derive(Clone)]
pub struct ScheduleRuntime {
    schedules: Arc<Mutex<HashMap<String, ActiveSchedule>>>,
    settings: SettingsStore,
    events: EventBus,
    stop: Arc<AtomicBool>,
    ticker: Arc<Mutex<Option<thread::JoinHandle<()>>>>,
    pool: Arc<Mutex<WorkerPool>>,
}

impl ScheduleRuntime {
    /// Creates the runtime. The ticker is not started until
    /// [`ScheduleRuntime::start_ticker`] is called, so tests can drive ticks
    /// deterministically.
    pub fn new(settings: SettingsStore, events: EventBus) -> Self {
        Self {
            schedules: Arc::new(Mutex::new(HashMap::new())),
            settings,
            events,
            stop: Arc::new(AtomicBool::new(false)),
            ticker: Arc::new(Mutex::new(None)),
            pool: Arc::new(Mutex::new(WorkerPool::new(SCHEDULE_POOL_SIZE))),
        }
    }

    /// Starts the shared ticker thread. Idempotent.
    pub fn start_ticker(&self) {
        let mut ticker = self.ticker.lock().unwrap();
        if ticker.is_some() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);

        let runtime = self.clone();
        let stop = Arc::clone(&self.stop);
        *ticker = Some(thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                runtime.tick();

                let mut slept = Duration::ZERO;
                while slept < SCHEDULE_TICK_INTERVAL {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let remaining = SCHEDULE_TICK_INTERVAL.saturating_sub(slept);
                    let step = remaining.min(Duration::from_millis(100));
                    thread::sleep(step);
                    slept += step;
                }
            }
        }));
        info!("Schedule ticker started");
    }

    /// Stops the ticker thread, drains the callback pool, and joins both.
    /// Active schedules remain registered but no longer fire.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            let _ = handle.join();
            info!("Schedule ticker stopped");
        }
        self.pool.lock().unwrap().shutdown();
    }

    /// Validates a CRON expression, returning the parsed schedule.
    /// Five-field expressions get a seconds field prepended.
    pub fn validate_cron_expression(expression: &str) -> Result<Schedule, ScheduleError> {
        let (normalized, was_normalized) = normalize_cron_expression(expression);
        if was_normalized {
            debug!("CRON expression '{expression}' normalized to '{normalized}'");
        }
        Schedule::from_str(&normalized).map_err(|err| ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: err.to_string(),
        })
    }

    /// The next `count` fire times of a CRON expression, for previews in the
    /// settings dialog.
    pub fn cron_preview(
        expression: &str,
        count: usize,
    ) -> Result<Vec<SystemTime>, ScheduleError> {
        let schedule = Self::validate_cron_expression(expression)?;
        Ok(schedule
            .upcoming(Local)
            .take(count)
            .map(|dt| dt.with_timezone(&Utc).into())
            .collect())
    }

    /// Registers and arms an interval schedule.
    pub fn start_interval(
        &self,
        script_name: &str,
        script_path: &Path,
        interval_seconds: u64,
        callback: ScheduleCallback,
    ) -> Result<ScheduleSnapshot, ScheduleError> {
        validate_interval(interval_seconds)?;
        info!(
            "Starting interval schedule for '{script_name}' (interval: {interval_seconds}s)"
        );

        let interval = Duration::from_secs(interval_seconds);
        let entry = ActiveSchedule {
            script_name: script_name.to_string(),
            script_path: script_path.to_path_buf(),
            kind: ScheduleKind::Interval,
            interval: Some(interval),
            cron_expression: None,
            cron_iter: None,
            last_run: None,
            next_run: Some(SystemTime::now() + interval),
            is_executing: false,
            state: ScheduleState::Scheduled,
            callback,
        };
        self.register(script_name, entry)
    }

    /// Registers and arms a CRON schedule.
    pub fn start_cron(
        &self,
        script_name: &str,
        script_path: &Path,
        expression: &str,
        callback: ScheduleCallback,
    ) -> Result<ScheduleSnapshot, ScheduleError> {
        let schedule = Self::validate_cron_expression(expression)?;
        info!("Starting CRON schedule for '{script_name}' (expression: {expression})");

        let mut iter = schedule.after_owned(Local::now());
        let next_run: Option<SystemTime> =
            iter.next().map(|dt| dt.with_timezone(&Utc).into());

        let entry = ActiveSchedule {
            script_name: script_name.to_string(),
            script_path: script_path.to_path_buf(),
            kind: ScheduleKind::Cron,
            interval: None,
            cron_expression: Some(expression.to_string()),
            cron_iter: Some(iter),
            last_run: None,
            next_run,
            is_executing: false,
            state: ScheduleState::Scheduled,
            callback,
        };
        self.register(script_name, entry)
    }

    fn register(
        &self,
        script_name: &str,
        entry: ActiveSchedule,
    ) -> Result<ScheduleSnapshot, ScheduleError> {
        let snapshot = entry.snapshot();
        {
            let mut schedules = self.schedules.lock().unwrap();
            if schedules.contains_key(script_name) {
                return Err(ScheduleError::AlreadyActive(script_name.to_string()));
            }
            schedules.insert(script_name.to_string(), entry);
        }

        if let Some(next) = snapshot.next_run {
            self.settings
                .set_schedule_next_run(script_name, epoch_seconds(next));
        }
        self.events
            .publish(Event::ScheduleStarted(script_name.to_string()));
        Ok(snapshot)
    }

    /// Stops a schedule. An in-flight callback observes the stop and skips
    /// its post-run state update. Returns `false` when no such schedule
    /// exists.
    pub fn stop_schedule(&self, script_name: &str) -> bool {
        {
            let mut schedules = self.schedules.lock().unwrap();
            let Some(entry) = schedules.get_mut(script_name) else {
                warn!("Schedule for '{script_name}' is not running");
                return false;
            };
            // Removal under the lock is the stop signal: later ticks no
            // longer see the entry, and an in-flight callback finds it gone
            // and skips its post-run state update.
            entry.state = ScheduleState::Stopped;
            schedules.remove(script_name);
        }

        info!("Schedule for '{script_name}' stopped");
        self.events
            .publish(Event::ScheduleStopped(script_name.to_string()));
        true
    }

    /// Stops every schedule from a snapshot of names; returns how many were
    /// stopped.
    pub fn stop_all(&self) -> usize {
        let names: Vec<String> = {
            let schedules = self.schedules.lock().unwrap();
            schedules.keys().cloned().collect()
        };
        info!("Stopping all schedules ({} active)", names.len());

        let mut stopped = 0;
        for name in names {
            if self.stop_schedule(&name) {
                stopped += 1;
            }
        }
        stopped
    }

    /// Whether the named schedule is active.
    pub fn is_scheduled(&self, script_name: &str) -> bool {
        let schedules = self.schedules.lock().unwrap();
        schedules
            .get(script_name)
            .map(|s| s.state != ScheduleState::Stopped)
            .unwrap_or(false)
    }

    /// Snapshot of one schedule.
    pub fn snapshot(&self, script_name: &str) -> Option<ScheduleSnapshot> {
        let schedules = self.schedules.lock().unwrap();
        schedules.get(script_name).map(ActiveSchedule::snapshot)
    }

    /// Snapshots of every active schedule.
    pub fn all_schedules(&self) -> Vec<ScheduleSnapshot> {
        let schedules = self.schedules.lock().unwrap();
        schedules.values().map(ActiveSchedule::snapshot).collect()
    }

    /// Human-readable status for the schedule row.
    pub fn status_label(&self, script_name: &str) -> String {
        match self.snapshot(script_name) {
            Some(snapshot) => capitalize(snapshot.state.as_ref()),
            None => "Not scheduled".to_string(),
        }
    }

    /// Replaces the interval of an active interval schedule and re-arms it.
    pub fn update_interval(
        &self,
        script_name: &str,
        interval_seconds: u64,
    ) -> Result<(), ScheduleError> {
        validate_interval(interval_seconds)?;

        let next = {
            let mut schedules = self.schedules.lock().unwrap();
            let entry = schedules
                .get_mut(script_name)
                .ok_or_else(|| ScheduleError::NotFound(script_name.to_string()))?;
            if entry.kind != ScheduleKind::Interval {
                return Err(ScheduleError::WrongKind {
                    name: script_name.to_string(),
                    expected: "interval",
                });
            }

            let old = entry.interval;
            entry.interval = Some(Duration::from_secs(interval_seconds));
            let next = SystemTime::now() + Duration::from_secs(interval_seconds);
            entry.next_run = Some(next);
            info!(
                "Updated interval for '{script_name}': {old:?} -> {interval_seconds}s"
            );
            next
        };

        self.settings
            .set_schedule_next_run(script_name, epoch_seconds(next));
        Ok(())
    }

    /// Replaces the expression of an active CRON schedule, recreating its
    /// iterator from now.
    pub fn update_cron(
        &self,
        script_name: &str,
        expression: &str,
    ) -> Result<(), ScheduleError> {
        let schedule = Self::validate_cron_expression(expression)?;

        let next = {
            let mut schedules = self.schedules.lock().unwrap();
            let entry = schedules
                .get_mut(script_name)
                .ok_or_else(|| ScheduleError::NotFound(script_name.to_string()))?;
            if entry.kind != ScheduleKind::Cron {
                return Err(ScheduleError::WrongKind {
                    name: script_name.to_string(),
                    expected: "cron",
                });
            }

            let old = entry.cron_expression.take();
            entry.cron_expression = Some(expression.to_string());
            let mut iter = schedule.after_owned(Local::now());
            let next: Option<SystemTime> =
                iter.next().map(|dt| dt.with_timezone(&Utc).into());
            entry.cron_iter = Some(iter);
            entry.next_run = next;
            info!("Updated CRON for '{script_name}': {old:?} -> {expression}");
            next
        };

        if let Some(next) = next {
            self.settings
                .set_schedule_next_run(script_name, epoch_seconds(next));
        }
        Ok(())
    }

    /// One ticker pass: fire due schedules, report blocked ones.
    fn tick(&self) {
        let now = SystemTime::now();
        let mut due: Vec<(String, ScheduleCallback, Option<f64>, Option<f64>)> =
            Vec::new();

        {
            let mut schedules = self.schedules.lock().unwrap();
            for (name, entry) in schedules.iter_mut() {
                let Some(next_run) = entry.next_run else {
                    continue;
                };
                if next_run > now {
                    continue;
                }

                if entry.is_executing {
                    debug!(
                        "Skipping execution of '{name}' (previous execution still running)"
                    );
                    advance_next_run(entry, now);
                    self.events.publish(Event::ScheduleBlocked(name.clone()));
                    continue;
                }

                entry.is_executing = true;
                entry.state = ScheduleState::Running;
                entry.last_run = Some(now);
                advance_next_run(entry, now);

                due.push((
                    name.clone(),
                    Arc::clone(&entry.callback),
                    entry.last_run.map(epoch_seconds),
                    entry.next_run.map(epoch_seconds),
                ));
            }
        }

        for (name, callback, last_run, next_run) in due {
            // Timestamps are flushed before the callback runs; a settings
            // write failure is logged inside the store and never aborts the
            // run.
            if let Some(ts) = last_run {
                self.settings.set_schedule_last_run(&name, ts);
            }
            if let Some(ts) = next_run {
                self.settings.set_schedule_next_run(&name, ts);
            }

            info!("Executing scheduled task: '{name}'");
            // The job captures only the map and the bus, never the pool, so
            // a worker can never hold the pool's last reference and join
            // itself on drop.
            let schedules = Arc::clone(&self.schedules);
            let events = self.events.clone();
            self.pool
                .lock()
                .unwrap()
                .execute(move || run_callback(&schedules, &events, &name, callback));
        }
    }

    /// Marks a schedule due immediately. Test hook for driving fires without
    /// waiting out real intervals.
    #[doc(hidden)]
    pub fn force_due_for_test(&self, script_name: &str) {
        let mut schedules = self.schedules.lock().unwrap();
        if let Some(entry) = schedules.get_mut(script_name) {
            entry.next_run = Some(SystemTime::now() - Duration::from_millis(1));
        }
    }

    /// Runs one ticker pass immediately. Test hook.
    #[doc(hidden)]
    pub fn tick_for_test(&self) {
        self.tick();
    }
}

/// Runs one fired callback and does its post-run bookkeeping: reports the
/// outcome and releases the overlap gate. A schedule stopped mid-flight is
/// gone from the map, so its post-run state update is suppressed.
fn run_callback(
    schedules: &Arc<Mutex<HashMap<String, ActiveSchedule>>>,
    events: &EventBus,
    name: &str,
    callback: ScheduleCallback,
) {
    let result = callback(name);

    let mut schedules = schedules.lock().unwrap();
    let Some(entry) = schedules.get_mut(name) else {
        debug!("Schedule '{name}' removed during execution");
        return;
    };

    match result {
        Ok(()) => {
            events.publish(Event::ScheduleExecuted(name.to_string()));
        }
        Err(message) => {
            warn!("Error executing scheduled task '{name}': {message}");
            entry.state = ScheduleState::Error;
            events.publish(Event::ScheduleError {
                name: name.to_string(),
                message,
            });
        }
    }

    entry.is_executing = false;
    if entry.state != ScheduleState::Error {
        entry.state = ScheduleState::Scheduled;
    }
}

/// Advances `next_run` after a fire or a blocked tick.
fn advance_next_run(entry: &mut ActiveSchedule, now: SystemTime) {
    match entry.kind {
        ScheduleKind::Interval => {
            if let Some(interval) = entry.interval {
                entry.next_run = Some(now + interval);
            }
        }
        ScheduleKind::Cron => {
            entry.next_run = advance_cron(entry, now);
        }
    }
}

/// Advances the stateful CRON iterator past `now`, bounded against clock
/// jumps, recreating the iterator from now when it faults.
fn advance_cron(entry: &mut ActiveSchedule, now: SystemTime) -> Option<SystemTime> {
    if let Some(iter) = entry.cron_iter.as_mut() {
        for _ in 0..CRON_CATCHUP_LIMIT {
            match iter.next() {
                Some(dt) => {
                    let ts: SystemTime = dt.with_timezone(&Utc).into();
                    if ts > now {
                        return Some(ts);
                    }
                    warn!(
                        "CRON next run for '{}' is in the past, getting next",
                        entry.script_name
                    );
                }
                None => break,
            }
        }
    }

    // Iterator fault or catch-up bound hit: rebuild from now.
    warn!(
        "Recreating CRON iterator for '{}' from current time",
        entry.script_name
    );
    let expression = entry.cron_expression.as_deref()?;
    let (normalized, _) = normalize_cron_expression(expression);
    let schedule = Schedule::from_str(&normalized).ok()?;
    let mut iter = schedule.after_owned(Local::now());
    let next: Option<SystemTime> = iter.next().map(|dt| dt.with_timezone(&Utc).into());
    entry.cron_iter = Some(iter);
    next
}

fn validate_interval(interval_seconds: u64) -> Result<(), ScheduleError> {
    if !(MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&interval_seconds) {
        return Err(ScheduleError::IntervalOutOfRange {
            seconds: interval_seconds,
        });
    }
    Ok(())
}

/// Prefixes a seconds field onto five-field expressions; anything else is
/// passed through with whitespace collapsed.
fn normalize_cron_expression(expression: &str) -> (String, bool) {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    match parts.len() {
        5 => (format!("0 {}", parts.join(" ")), true),
        _ => (parts.join(" "), false),
    }
}

fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
