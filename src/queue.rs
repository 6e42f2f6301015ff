//! The command queue: a multi-producer, single-consumer, unbounded,
//! insertion-ordered channel from the control-plane process to the
//! scheduler process.
//!
//! The original carries arbitrary Python objects through a
//! `multiprocessing.Queue`; there's no equivalent pipe-backed primitive in
//! the ambient dependency stack here, so this is a maildir-style spool
//! directory instead: each [`Command`] is serialized to JSON and written
//! via write-to-temp-then-`rename` (atomic on the same filesystem) under a
//! monotonically increasing filename, so a plain sorted directory listing
//! gives arrival order. The consumer lists, reads, and removes oldest
//! first — non-blockingly, same as every other scheduler-tick operation.

use crate::job::Job;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// One entry on the command queue. Only `AddJob` is wired up to the
/// Manager today; `CancelJob`/`Shutdown` are declared now so the wire
/// format (and any caller building against it) has explicit room to grow
/// without breaking existing spool files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    AddJob { job: Job },
    CancelJob { id: Uuid },
    Shutdown {},
}

pub struct CommandQueue {
    dir: PathBuf,
}

impl CommandQueue {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating command queue directory {}", dir.display()))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    /// Enqueues `command`. Never blocks; the queue is unbounded.
    pub fn push(&self, command: &Command) -> Result<()> {
        let payload = serde_json::to_vec(command).context("serializing command")?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let final_name = format!("{nanos:020}-{sequence:010}-{}.json", Uuid::new_v4());
        let tmp_name = format!(".tmp-{final_name}");

        let tmp_path = self.dir.join(&tmp_name);
        let final_path = self.dir.join(&final_name);

        fs::write(&tmp_path, &payload)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("publishing {}", final_path.display()))?;
        Ok(())
    }

    /// Returns every command currently spooled, oldest first, removing
    /// each as it's read. Non-blocking: an empty queue returns an empty
    /// vector immediately.
    pub fn drain(&self) -> Result<Vec<Command>> {
        let mut names: Vec<String> = fs::read_dir(&self.dir)
            .with_context(|| format!("listing command queue directory {}", self.dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with(".tmp-"))
            .collect();
        names.sort();

        let mut commands = Vec::with_capacity(names.len());
        for name in names {
            let path = self.dir.join(&name);
            let contents = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
            };

            match serde_json::from_slice::<Command>(&contents) {
                Ok(command) => commands.push(command),
                Err(e) => tracing::warn!(file = %name, error = %e, "dropping malformed queued command"),
            }

            let _ = fs::remove_file(&path);
        }

        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{JobManifest, ResourceUsage};
    use std::path::PathBuf;

    fn sample_job(name: &str) -> Job {
        Job::new(
            PathBuf::from("/tmp/does-not-matter"),
            JobManifest {
                name: name.to_string(),
                description: "d".to_string(),
                container: "alpine".to_string(),
                volumes: Default::default(),
                resource_usage: ResourceUsage::default(),
            },
        )
    }

    #[test]
    fn drain_returns_commands_in_push_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = CommandQueue::open(dir.path()).unwrap();

        queue.push(&Command::AddJob { job: sample_job("A") }).unwrap();
        queue.push(&Command::AddJob { job: sample_job("B") }).unwrap();
        queue.push(&Command::AddJob { job: sample_job("C") }).unwrap();

        let drained = queue.drain().unwrap();
        let names: Vec<&str> = drained
            .iter()
            .map(|c| match c {
                Command::AddJob { job } => job.name(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn drain_empties_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = CommandQueue::open(dir.path()).unwrap();
        queue.push(&Command::AddJob { job: sample_job("A") }).unwrap();

        assert_eq!(queue.drain().unwrap().len(), 1);
        assert_eq!(queue.drain().unwrap().len(), 0);
    }

    #[test]
    fn drain_on_empty_queue_is_immediate_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = CommandQueue::open(dir.path()).unwrap();
        assert!(queue.drain().unwrap().is_empty());
    }

    #[test]
    fn stray_temp_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".tmp-stray"), b"garbage").unwrap();
        let queue = CommandQueue::open(dir.path()).unwrap();
        assert!(queue.drain().unwrap().is_empty());
    }

    #[test]
    fn other_command_variants_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let queue = CommandQueue::open(dir.path()).unwrap();
        let id = Uuid::new_v4();
        queue.push(&Command::CancelJob { id }).unwrap();
        queue.push(&Command::Shutdown {}).unwrap();

        let drained = queue.drain().unwrap();
        assert!(matches!(drained[0], Command::CancelJob { id: got } if got == id));
        assert!(matches!(drained[1], Command::Shutdown {}));
    }
}
