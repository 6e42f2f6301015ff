//! A thin wrapper around POSIX named semaphores (`sem_open`/`sem_wait`/
//! `sem_post`).
//!
//! This is the one IPC primitive [`crate::mailbox::Mailbox`] needs that a
//! plain advisory file lock (`flock`) can't provide: the ability for a
//! process *other than the one that acquired it* to release it. That's
//! exactly how Python's `multiprocessing.Lock` behaves (it's backed by a
//! named semaphore under the hood), which is what the mailbox's
//! `wait_for_read`/`get` pairing was built around.

use libc::{c_char, mode_t};
use std::ffi::CString;
use std::fmt;
use std::io;

pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: CString,
}

// `sem_t` is safe to share across threads/processes by design; the
// pointer itself just identifies the kernel object.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Opens the named semaphore, creating it with `initial` count if it
    /// does not already exist. `initial` is ignored if another process got
    /// there first.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        let cname = CString::new(name).expect("semaphore name must not contain NUL");
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr() as *const c_char,
                libc::O_CREAT,
                0o644 as mode_t,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem, name: cname })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    /// Blocks until the count is > 0, then atomically decrements it.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            let rc = unsafe { libc::sem_wait(self.sem) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Non-blocking variant: returns `Ok(false)` immediately instead of
    /// blocking when the count is currently 0.
    pub fn try_wait(&self) -> io::Result<bool> {
        let rc = unsafe { libc::sem_trywait(self.sem) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            return Ok(false);
        }
        Err(err)
    }

    /// Increments the count, waking at most one waiter blocked in
    /// [`wait`](Self::wait). May be called from a different process than
    /// the one that last called `wait` — that's the whole point.
    pub fn post(&self) -> io::Result<()> {
        let rc = unsafe { libc::sem_post(self.sem) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Removes the semaphore from the host's namespace. Only the process
    /// tearing down the mailbox for good should call this.
    pub fn unlink(name: &str) -> io::Result<()> {
        let cname = CString::new(name).expect("semaphore name must not contain NUL");
        let rc = unsafe { libc::sem_unlink(cname.as_ptr() as *const c_char) };
        if rc == 0 {
            Ok(())
        } else {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

impl fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedSemaphore").field("name", &self.name()).finish()
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}
