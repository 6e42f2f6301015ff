//! Well-known on-disk locations shared by the scheduler and control-plane
//! processes.

use std::path::PathBuf;

/// Directory for user-editable configuration (`stoplight.toml`).
pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))
        .map(|p| p.join("stoplight"))
}

/// Directory for persistent data (currently just the daemon log file).
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get data directory"))
        .map(|p| p.join("stoplight"))
}

/// Directory for the mailbox file, the command-queue spool, and the
/// semaphore/lock files backing them. Falls back to the cache directory on
/// platforms without an XDG runtime directory.
pub fn get_runtime_dir() -> anyhow::Result<PathBuf> {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to get runtime or cache directory"))
        .map(|p| p.join("stoplight"))
}

/// Backing file for the status [`Mailbox`](crate::mailbox::Mailbox), shared
/// between the scheduler and control-plane processes.
pub fn get_mailbox_path() -> anyhow::Result<PathBuf> {
    Ok(get_runtime_dir()?.join("mailbox.bin"))
}

/// Directory backing the [`CommandQueue`](crate::queue::CommandQueue) spool.
pub fn get_command_queue_dir() -> anyhow::Result<PathBuf> {
    Ok(get_runtime_dir()?.join("commands"))
}

/// Name of the POSIX named semaphore backing the mailbox's read gate. Fixed
/// (not PID-scoped) so both processes, started independently, open the
/// same one.
pub const MAILBOX_SEMAPHORE: &str = "/stoplight-mailbox-read-gate";
