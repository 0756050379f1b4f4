//! Error handling for bindkit.
use thiserror::Error;

/// Errors raised by the service runtime and monitor.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A service with the same name is already active.
    #[error("Service '{0}' is already running")]
    AlreadyRunning(String),

    /// No active service with the given name.
    #[error("Service '{0}' is not running")]
    NotRunning(String),

    /// Error spawning a service process.
    #[error("Failed to start service '{service}': {source}")]
    SpawnFailed {
        /// The service name that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error stopping a service process.
    #[error("Failed to stop service '{service}': {source}")]
    StopFailed {
        /// The service name that failed to stop.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error opening or rotating a service log file.
    #[error("Log file error for service '{service}': {source}")]
    LogFile {
        /// The service whose log file could not be opened.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// No interpreter available for the service script.
    #[error("No interpreter available to run service '{0}'")]
    NoInterpreter(String),
}

/// Errors raised by the schedule runtime.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A schedule with the same name is already active.
    #[error("Schedule for '{0}' is already active")]
    AlreadyActive(String),

    /// No active schedule with the given name.
    #[error("Schedule for '{0}' not found")]
    NotFound(String),

    /// Interval outside the supported range.
    #[error(
        "Interval {seconds}s is outside the supported range ({min}s to {max}s)",
        min = crate::constants::MIN_INTERVAL_SECONDS,
        max = crate::constants::MAX_INTERVAL_SECONDS
    )]
    IntervalOutOfRange {
        /// The rejected interval, in seconds.
        seconds: u64,
    },

    /// CRON expression failed to parse.
    #[error("Invalid CRON expression '{expression}': {reason}")]
    InvalidCron {
        /// The rejected expression.
        expression: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// Operation applied to the wrong schedule kind.
    #[error("Schedule for '{name}' is not an {expected} schedule")]
    WrongKind {
        /// The schedule name.
        name: String,
        /// The kind required by the operation.
        expected: &'static str,
    },
}

/// Errors raised by the hotkey registry and backend adapter.
#[derive(Debug, Error)]
pub enum HotkeyError {
    /// Binding target name was empty.
    #[error("Hotkey target name cannot be empty")]
    EmptyName,

    /// Chord string was empty.
    #[error("Hotkey cannot be empty")]
    EmptyChord,

    /// Chord could not be parsed into modifiers plus one key.
    #[error("Invalid hotkey format: {0}")]
    InvalidChord(String),

    /// Chord belongs to the reserved system set.
    #[error("Hotkey {0} is reserved by the system")]
    Reserved(String),

    /// Chord is already bound to another target here.
    #[error("Hotkey {chord} is already assigned to '{existing}'")]
    Conflict {
        /// The contested chord.
        chord: String,
        /// The target that already owns the chord.
        existing: String,
    },

    /// The OS reports the chord as held by another application.
    #[error("Hotkey {0} is already registered by another application")]
    ClaimedElsewhere(String),

    /// Backend registration failed for another reason.
    #[error("Failed to register hotkey {chord}: {reason}")]
    Backend {
        /// The chord that failed to register.
        chord: String,
        /// OS-level diagnostic.
        reason: String,
    },
}

/// Errors raised by the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Error reading or writing the settings file.
    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing the settings file contents.
    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised when dispatching an on-demand execution.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The script is already executing.
    #[error("Script '{0}' is already running")]
    AlreadyRunning(String),

    /// No script with the given name or alias.
    #[error("Script '{0}' not found")]
    NotFound(String),

    /// The named preset does not exist for this script.
    #[error("Preset '{preset}' not found for script '{script}'")]
    PresetNotFound {
        /// The script identifier.
        script: String,
        /// The missing preset name.
        preset: String,
    },
}

/// Errors raised by the single-instance lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Error creating or locking the lock file.
    #[error("Failed to acquire instance lock: {0}")]
    Io(#[from] std::io::Error),
}
