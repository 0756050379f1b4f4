//! CLI parsing for the host binary.
use std::path::PathBuf;

use clap::Parser;

/// Desktop script runner with global hotkeys, services, and schedules.
#[derive(Debug, Parser)]
#[command(name = "bindkit", version, about)]
pub struct Cli {
    /// Start with the tray icon visible and no foreground window.
    #[arg(long)]
    pub minimized: bool,

    /// Directory scanned for scripts. Defaults to ./scripts.
    #[arg(long, value_name = "DIR")]
    pub scripts_dir: Option<PathBuf>,

    /// Settings file location override.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}
