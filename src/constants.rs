//! Constants and default configuration values for bindkit.
//!
//! This module centralizes the timing, sizing, and naming values used
//! throughout the execution core.

use std::time::Duration;

// ============================================================================
// Execution Timing
// ============================================================================

/// Default wall-clock limit for a single script execution.
pub const DEFAULT_SCRIPT_TIMEOUT_SECONDS: u64 = 30;

/// Grace period between a terminate request and a forced kill.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Polling interval while waiting on a child process.
pub const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Graceful portion of the worker rejoin window after a cancel.
pub const CANCEL_REJOIN_GRACE: Duration = Duration::from_secs(2);

/// Hard portion of the worker rejoin window after a cancel.
pub const CANCEL_REJOIN_HARD: Duration = Duration::from_secs(1);

// ============================================================================
// Service Supervision
// ============================================================================

/// Default wait for a graceful service stop before the group is killed.
pub const SERVICE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between service monitor health probes.
pub const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default auto-restart flag for crashed services.
pub const DEFAULT_AUTO_RESTART: bool = true;

/// Default bound on automatic restarts per service lifetime.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Default delay before an automatic restart attempt.
pub const DEFAULT_RESTART_DELAY_SECONDS: u64 = 5;

/// Directory under the log root that holds per-service log files.
pub const SERVICE_LOG_DIR_NAME: &str = "services";

// ============================================================================
// Scheduling
// ============================================================================

/// Minimum schedule interval, preventing excessive executions.
pub const MIN_INTERVAL_SECONDS: u64 = 10;

/// Maximum schedule interval. The timer primitive stores milliseconds in a
/// 32-bit signed integer, so 2_147_483s (~24.8 days) is the largest safe value.
pub const MAX_INTERVAL_SECONDS: u64 = 2_147_483;

/// Resolution of the schedule ticker.
pub const SCHEDULE_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on iterator re-advances when a CRON fire time lands in the past.
pub const CRON_CATCHUP_LIMIT: usize = 1_000;

// ============================================================================
// Module Cache
// ============================================================================

/// Default number of cached in-process script modules.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 20;

/// Default time-to-live for a cached module.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 1_800;

/// Upper bound on the interval between cache sweeps. The effective cadence
/// is the smaller of this value and the configured TTL.
pub const CACHE_SWEEP_MAX_INTERVAL_SECONDS: u64 = 300;

// ============================================================================
// Discovery and Dispatch
// ============================================================================

/// Worker threads used per discovery shard.
pub const DISCOVERY_WORKERS: usize = 4;

/// Worker threads in the subprocess execution pool.
pub const EXECUTION_POOL_SIZE: usize = 4;

/// Worker threads in the schedule callback pool.
pub const SCHEDULE_POOL_SIZE: usize = 4;

/// File name prefix that excludes a script from discovery.
pub const SCRIPT_SKIP_PREFIX: &str = "__";

/// Extensions accepted by discovery, lowercased.
pub const SCRIPT_EXTENSIONS: &[&str] = &["py", "ps1", "bat", "cmd", "sh"];

// ============================================================================
// Single-Instance Lock
// ============================================================================

/// Name of the per-user instance lock file.
pub const INSTANCE_LOCK_FILE: &str = "bindkit.lock";

/// Age after which an unlockable instance lock is treated as stale.
pub const STALE_LOCK_WINDOW: Duration = Duration::from_secs(10);

// ============================================================================
// Settings Keys
// ============================================================================

/// Settings key for the per-installation execution timeout.
pub const KEY_SCRIPT_TIMEOUT: &str = "execution/script_timeout_seconds";

/// Settings prefix for persisted hotkey chords.
pub const KEY_HOTKEY_PREFIX: &str = "scripts/hotkeys";

/// Settings prefix for external script paths.
pub const KEY_EXTERNAL_PREFIX: &str = "scripts/external";

/// Settings prefix for user-chosen display names.
pub const KEY_CUSTOM_NAME_PREFIX: &str = "scripts/custom_names";

/// Settings prefix for saved argument maps.
pub const KEY_ARGS_PREFIX: &str = "scripts/args";

/// Settings prefix for named argument presets.
pub const KEY_PRESET_PREFIX: &str = "scripts/presets";

/// Settings prefix for per-service configuration.
pub const KEY_SERVICE_PREFIX: &str = "scripts/services";

/// Settings prefix for per-script schedule configuration.
pub const KEY_SCHEDULE_PREFIX: &str = "scripts/schedule";

/// Settings key holding the disabled-script set.
pub const KEY_DISABLED_SCRIPTS: &str = "scripts/disabled";
