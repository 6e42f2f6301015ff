//! Cross-process primitives shared by the scheduler and control-plane
//! processes: a named POSIX semaphore (the one primitive here that a
//! process other than the acquirer can release) plus the file-lock and
//! memory-mapping helpers the [`crate::mailbox`] and [`crate::queue`]
//! modules build on.

pub mod semaphore;

pub use semaphore::NamedSemaphore;
