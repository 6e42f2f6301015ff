//! A lock-protected, single-slot mailbox for passing one value between the
//! scheduler and control-plane processes.
//!
//! This is a direct port of the daemon's original `Mailbox`: a fixed-size
//! shared buffer, a short-lived mutex (`sync_lock`) guarding reads/writes,
//! and a binary "read gate" that starts open, is held closed by [`set`]
//! while the slot holds unread data, and is reopened by whichever call
//! clears the slot (`get`, or a subsequent `set`). [`wait_for_read`] just
//! waits for that gate to reopen — i.e. it blocks until the current
//! occupant has been read, not until one arrives.
//!
//! [`set`]: Mailbox::set
//! [`wait_for_read`]: Mailbox::wait_for_read

use crate::ipc::NamedSemaphore;
use anyhow::{bail, Context, Result};
use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Matches the original's `Array('c', 1024)`.
const CAPACITY: usize = 1024;
const HEADER_LEN: usize = 4;
const REGION_LEN: usize = HEADER_LEN + CAPACITY;

pub struct Mailbox {
    lock_file: File,
    mmap: MmapMut,
    read_gate: NamedSemaphore,
}

impl Mailbox {
    /// Opens (creating if needed) the mailbox backed by `backing_path` and
    /// the named semaphore `semaphore_name`. Two `Mailbox` handles opened
    /// with the same pair, in different processes, talk to the same box.
    pub fn open(backing_path: &Path, semaphore_name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(backing_path)
            .with_context(|| format!("opening mailbox file {}", backing_path.display()))?;
        file.set_len(REGION_LEN as u64)
            .context("sizing mailbox backing file")?;

        let mmap = unsafe {
            MmapOptions::new()
                .len(REGION_LEN)
                .map_mut(&file)
                .context("memory-mapping mailbox backing file")?
        };

        let read_gate = NamedSemaphore::create(semaphore_name, 1)
            .context("opening mailbox read-gate semaphore")?;

        Ok(Self { lock_file: file, mmap, read_gate })
    }

    fn used_len(&self) -> usize {
        u32::from_le_bytes(self.mmap[..HEADER_LEN].try_into().unwrap()) as usize
    }

    fn set_used_len(&mut self, len: usize) {
        self.mmap[..HEADER_LEN].copy_from_slice(&(len as u32).to_le_bytes());
    }

    /// Clears the slot and, if it held data, reopens the read gate. No
    /// locking of its own — callers must already hold `sync_lock`.
    fn clear_box(&mut self) -> Result<()> {
        if self.used_len() == 0 {
            return Ok(());
        }
        self.set_used_len(0);
        self.read_gate.post().context("reopening mailbox read gate")
    }

    /// No locking of its own — callers must already hold `sync_lock`.
    fn do_read(&self) -> Option<Vec<u8>> {
        let len = self.used_len();
        if len == 0 {
            return None;
        }
        Some(self.mmap[HEADER_LEN..HEADER_LEN + len].to_vec())
    }

    /// Puts `bytes` in the box, replacing and discarding whatever was there
    /// before. Blocks (briefly, on the gate) only behind concurrent
    /// `set`/`get`/`peek` calls, never on a reader.
    pub fn set(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > CAPACITY {
            bail!("payload of {} bytes exceeds mailbox capacity of {CAPACITY}", bytes.len());
        }

        self.lock_file.lock_exclusive().context("acquiring mailbox sync lock")?;
        let result = (|| {
            if self.used_len() != 0 {
                self.clear_box()?;
            }
            self.mmap[HEADER_LEN..HEADER_LEN + bytes.len()].copy_from_slice(bytes);
            self.set_used_len(bytes.len());
            Ok(())
        })();
        FileExt::unlock(&self.lock_file).context("releasing mailbox sync lock")?;
        result?;

        // Close the gate: there is now unread data in the box.
        self.read_gate.wait().context("closing mailbox read gate")
    }

    /// Returns whatever is in the box without consuming it. Does not count
    /// as a read for the purposes of [`wait_for_read`](Self::wait_for_read).
    pub fn peek(&mut self) -> Result<Option<Vec<u8>>> {
        self.lock_file.lock_exclusive().context("acquiring mailbox sync lock")?;
        let loaded = self.do_read();
        FileExt::unlock(&self.lock_file).context("releasing mailbox sync lock")?;
        Ok(loaded)
    }

    /// Returns whatever is in the box and clears it, reopening the read
    /// gate for any `set` or `wait_for_read` callers.
    pub fn get(&mut self) -> Result<Option<Vec<u8>>> {
        self.lock_file.lock_exclusive().context("acquiring mailbox sync lock")?;
        let result = (|| {
            let loaded = self.do_read();
            self.clear_box()?;
            Ok(loaded)
        })();
        FileExt::unlock(&self.lock_file).context("releasing mailbox sync lock")?;
        result
    }

    /// Blocks until the box's current occupant has been read (or returns
    /// immediately if the box is already empty). Does not consume
    /// anything itself.
    pub fn wait_for_read(&self) -> Result<()> {
        self.read_gate.wait().context("waiting on mailbox read gate")?;
        self.read_gate.post().context("reopening mailbox read gate")
    }
}
