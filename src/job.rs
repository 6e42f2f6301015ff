//! The Job entity and its container runner.
//!
//! [`Job`] is the serializable, cross-process-safe snapshot (id, directory,
//! decoded manifest) that rides the command queue and sits in the Manager's
//! pending queue. [`JobRunner`] is the process-local runtime state —
//! the child process, its pipes, and the open `job.out`/`job.err` handles —
//! that only ever exists inside the scheduler process, for the lifetime of
//! one admitted job.

use crate::manifest::JobManifest;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use uuid::Uuid;

/// Where the job directory is bind-mounted inside the container.
pub const IN_CONTAINER_MOUNT: &str = "/job_files";

/// A decoded job, ready to be queued, admitted, or run. Cheap to clone and
/// carries no process/file-descriptor state, so it's safe to serialize
/// across the command queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_dir: PathBuf,
    pub manifest: JobManifest,
}

impl Job {
    pub fn new(job_dir: PathBuf, manifest: JobManifest) -> Self {
        Self { id: Uuid::new_v4(), job_dir, manifest }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn description(&self) -> &str {
        &self.manifest.description
    }

    /// A job needs the GPU-aware runtime iff it asked for any GPU or VRAM.
    pub fn wants_gpu(&self) -> bool {
        self.manifest.resource_usage.gpu > 0.0 || self.manifest.resource_usage.vram > 0.0
    }

    /// Computed once, here, rather than re-derived in `start()` — the
    /// original kept these as constructor-scoped locals that `start()`
    /// referenced without them being in scope; we fix that by owning the
    /// paths for the Job's whole lifetime.
    pub fn output_path(&self) -> PathBuf {
        self.job_dir.join("job.out")
    }

    pub fn error_path(&self) -> PathBuf {
        self.job_dir.join("job.err")
    }

    pub fn entry_point(&self) -> PathBuf {
        self.job_dir.join(crate::manifest::ENTRY_POINT)
    }
}

/// Terminal disposition of a Job, used only for logging/status purposes at
/// the moment it leaves the running set — the Manager does not retain Jobs
/// past this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Completed,
    Failed,
    Terminated,
    Discarded,
}

/// Injectable execution strategy for running a job's container — the same
/// dependency-injection shape as an `Executor` trait, substituting a
/// container invocation for whatever the concrete backend runs. Exists so
/// the Manager can be tested without a real container runtime installed.
pub trait ContainerRuntime: Send + Sync {
    fn spawn(&self, job: &Job) -> Result<Child>;
}

/// Shells out to `docker` or `nvidia-docker`, resolved once via `which` at
/// construction time — mirrors the original's fatal-on-missing-tool
/// resolution (`util.get_path`), just without the `sys.exit` and with the
/// equivalent of its "very disappointed" log message kept as a `tracing`
/// warning instead of a literal port of the joke.
pub struct DockerRuntime {
    plain_binary: PathBuf,
    gpu_binary: PathBuf,
}

impl DockerRuntime {
    pub fn discover() -> Result<Self> {
        Ok(Self {
            plain_binary: which_tool("docker")?,
            gpu_binary: which_tool("nvidia-docker")?,
        })
    }
}

fn which_tool(tool: &str) -> Result<PathBuf> {
    let output = Command::new("which")
        .arg(tool)
        .output()
        .with_context(|| format!("failed to invoke 'which {tool}'"))?;

    if !output.status.success() {
        bail!("'{tool}' was not found on PATH; install it before starting the scheduler");
    }

    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        bail!("'which {tool}' produced no output");
    }
    Ok(PathBuf::from(path))
}

/// Builds the argument vector for the container invocation. Split out from
/// [`ContainerRuntime::spawn`] so it can be asserted against without
/// actually spawning a process.
fn container_args(job: &Job) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string(), "--net=host".to_string()];

    let job_dir = job.job_dir.canonicalize().unwrap_or_else(|_| job.job_dir.clone());
    args.push("-v".to_string());
    args.push(format!("{}:{IN_CONTAINER_MOUNT}", job_dir.display()));

    for (host_path, container_path) in &job.manifest.volumes {
        args.push("-v".to_string());
        args.push(format!("{host_path}:{container_path}"));
    }

    args.push(job.manifest.container.clone());
    args.push(format!("{IN_CONTAINER_MOUNT}/{}", crate::manifest::ENTRY_POINT));
    args
}

impl ContainerRuntime for DockerRuntime {
    fn spawn(&self, job: &Job) -> Result<Child> {
        if !job.entry_point().exists() {
            bail!("'{}' not found, or not executable.", job.entry_point().display());
        }

        let binary = if job.wants_gpu() { &self.gpu_binary } else { &self.plain_binary };
        Command::new(binary)
            .args(container_args(job))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn container for job '{}'", job.name()))
    }
}

/// A no-op runtime that spawns `true` instead of a container. Used by the
/// Manager's benchmarks (and available to any caller that wants to exercise
/// the admission loop without a real container engine installed).
pub struct NullRuntime;

impl ContainerRuntime for NullRuntime {
    fn spawn(&self, job: &Job) -> Result<Child> {
        tracing::debug!(job = job.name(), "NullRuntime: not actually invoking a container");
        Command::new("true")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning stand-in process for NullRuntime")
    }
}

/// Sets `O_NONBLOCK` on a raw fd, the same `fcntl`/`F_SETFL` dance the
/// original used on the subprocess pipes.
fn set_nonblocking(fd: i32) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            bail!("fcntl(F_GETFL) failed: {}", std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            bail!("fcntl(F_SETFL) failed: {}", std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Owns one running container: the child process, its non-blocking output
/// pipes, and the open `job.out`/`job.err` handles. Acquired on
/// [`start`](Self::start), released on drop along a single code path
/// regardless of whether the job finished cleanly, failed, or the daemon
/// is tearing down.
pub struct JobRunner {
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    out_file: File,
    err_file: File,
}

impl JobRunner {
    pub fn start(job: &Job, runtime: &dyn ContainerRuntime) -> Result<Self> {
        tracing::info!(job = job.name(), description = job.description(), "Starting job");

        let out_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(job.output_path())
            .with_context(|| format!("opening {}", job.output_path().display()))?;
        let err_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(job.error_path())
            .with_context(|| format!("opening {}", job.error_path().display()))?;

        let mut child = runtime.spawn(job)?;
        let stdout = child.stdout.take().context("child had no stdout pipe")?;
        let stderr = child.stderr.take().context("child had no stderr pipe")?;
        set_nonblocking(stdout.as_raw_fd())?;
        set_nonblocking(stderr.as_raw_fd())?;

        Ok(Self { child, stdout, stderr, out_file, err_file })
    }

    /// Non-blocking poll. `true` once the child has exited (clean or not);
    /// `false` while still running.
    pub fn is_finished(&mut self) -> Result<bool> {
        Ok(self.child.try_wait().context("polling child process")?.is_some())
    }

    /// Only meaningful after [`is_finished`](Self::is_finished) returns
    /// `true`. `true` means the runner exited 0.
    pub fn exited_successfully(&mut self) -> Result<bool> {
        match self.child.try_wait().context("polling child process")? {
            Some(status) => Ok(status.success()),
            None => bail!("exit status requested before the job finished"),
        }
    }

    /// Drains whatever is currently buffered on stdout/stderr without
    /// blocking, appends it to `job.out`/`job.err`, and flushes
    /// immediately so a concurrent `tail -f` sees it.
    pub fn drain_output(&mut self) -> Result<()> {
        drain_pipe(&mut self.stdout, &mut self.out_file)?;
        drain_pipe(&mut self.stderr, &mut self.err_file)?;
        Ok(())
    }

    /// Best-effort stop, issued when the runner is abandoned before
    /// completion (daemon shutdown).
    pub fn terminate(&mut self) {
        if let Err(e) = self.child.kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!(error = %e, "failed to terminate job runner");
            }
        }
        let _ = self.child.wait();
    }
}

fn drain_pipe(pipe: &mut impl Read, out: &mut File) -> Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                out.write_all(&buf[..n]).context("writing job output")?;
                out.flush().context("flushing job output")?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e).context("reading job output pipe"),
        }
    }
    Ok(())
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        if matches!(self.is_finished(), Ok(false)) {
            tracing::warn!(job_pid = self.child.id(), "terminating abandoned job runner");
            self.terminate();
        }
    }
}
