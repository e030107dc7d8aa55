//! Install directory layout
//!
//! A runner's install directory holds its scripts and a few marker files:
//! - `.runner`: written by a successful registration
//! - `Runner.Listener.pid` / `.path`: PID of the live listener, first valid wins
//! - `run.sh` / `config.sh` (or `.cmd` on Windows): entrypoint and registration scripts

use std::path::Path;

use crate::domain::runner::Status;

/// Presence of this file means the runner completed registration
pub const REGISTRATION_MARKER: &str = ".runner";

/// Candidate PID files, in lookup order
pub const PID_FILE_CANDIDATES: [&str; 2] = ["Runner.Listener.pid", ".path"];

/// Entrypoint script for the current platform
pub fn run_script_name() -> &'static str {
    if cfg!(windows) { "run.cmd" } else { "run.sh" }
}

/// Registration script for the current platform
pub fn config_script_name() -> &'static str {
    if cfg!(windows) {
        "config.cmd"
    } else {
        "config.sh"
    }
}

/// Status derived purely from disk
///
/// Never returns `Unknown`: filesystem errors read as `Missing`.
pub fn disk_status(install_dir: &Path) -> Status {
    if install_dir.as_os_str().is_empty() || !install_dir.is_dir() {
        return Status::Missing;
    }

    if install_dir.join(REGISTRATION_MARKER).exists() {
        Status::Installed
    } else {
        Status::New
    }
}

/// Reads the runner PID from the first candidate file holding a positive integer
pub fn read_pid(install_dir: &Path) -> Option<u32> {
    PID_FILE_CANDIDATES.iter().find_map(|name| {
        let content = std::fs::read_to_string(install_dir.join(name)).ok()?;
        content.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
    })
}
