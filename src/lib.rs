//! Desktop script runner: discovery, hotkeys, services, and schedules.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
use ctrlc as _;
#[cfg(test)]
use predicates as _;
use strum as _;
#[cfg(test)]
use tempfile as _;
use tracing_subscriber as _;

/// Script classification and argument extraction.
pub mod analyzer;

/// Module cache for in-process execution strategies.
pub mod cache;

/// CLI parsing.
pub mod cli;

/// Filtered script catalog.
pub mod collection;

/// Constants.
pub mod constants;

/// Errors.
pub mod error;

/// Typed event bus.
pub mod events;

/// On-demand execution model with worker pool dispatch.
pub mod execmodel;

/// Execution dispatch and result capture.
pub mod executor;

/// Global hotkey registry and backend adapter.
pub mod hotkey;

/// Interpreter path resolution.
pub mod interpreter;

/// Script discovery.
pub mod loader;

/// Single-instance lock.
pub mod lock;

/// Service health monitoring and auto-restart.
pub mod monitor;

/// Bounded worker pool.
pub mod pool;

/// Runtime paths.
pub mod runtime;

/// Schedule runtime for interval and CRON execution.
pub mod schedule;

/// Long-running service processes.
pub mod service;

/// Key/value settings store.
pub mod settings;

/// Test utils.
#[doc(hidden)]
pub mod test_utils;
