//! One-shot discovery of host capacity: CPU cores, total RAM, total VRAM.
//!
//! All three collaborators here (the OS, `/proc/meminfo`, `nvidia-smi`) are
//! treated as external — failure to probe them is fatal at startup, per
//! spec; there are no runtime retries.

use anyhow::{bail, Context, Result};
use std::process::Command;

/// Immutable capacity constants computed once at daemon startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capacity {
    pub cpu_cores: f64,
    pub total_ram_bytes: f64,
    pub total_vram_bytes: f64,
    /// Always 1.0: a single tracked GPU (spec.md §4.3 / Non-goals: no
    /// multi-GPU topology).
    pub one_gpu: f64,
}

/// Name of the external binary used to query GPU memory. Overridable so
/// tests can point it at a stub script.
pub const GPU_TOOL: &str = "nvidia-smi";

impl Capacity {
    /// Probes CPU core count, total RAM, and total VRAM using the default
    /// GPU tool name (`nvidia-smi`). Aborts (returns `Err`) if any
    /// collaborator is missing or unparseable; the caller is expected to
    /// treat this as fatal.
    pub fn probe() -> Result<Self> {
        Self::probe_with_gpu_tool(GPU_TOOL)
    }

    /// Same as [`probe`](Self::probe), but with the GPU tool binary name
    /// taken from config rather than the built-in default.
    pub fn probe_with_gpu_tool(gpu_tool: &str) -> Result<Self> {
        let cpu_cores = num_cpus::get() as f64;
        let total_ram_bytes = total_ram_bytes()?;
        let total_vram_bytes = total_vram_bytes(gpu_tool)?;

        tracing::info!(
            cpu_cores,
            total_ram_bytes,
            total_vram_bytes,
            "Probed host capacity"
        );

        Ok(Capacity {
            cpu_cores,
            total_ram_bytes,
            total_vram_bytes,
            one_gpu: 1.0,
        })
    }
}

fn total_ram_bytes() -> Result<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")
        .context("failed to read /proc/meminfo for total RAM")?;

    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest
                .split_whitespace()
                .next()
                .context("malformed MemTotal line in /proc/meminfo")?
                .parse()
                .context("MemTotal value is not an integer")?;
            return Ok(kb as f64 * 1000.0);
        }
    }

    bail!("MemTotal not found in /proc/meminfo")
}

/// Queries total VRAM in megabytes via the vendor tool and normalizes to
/// bytes. The tool reports in decimal megabytes, so the conversion is
/// `* 10^6`, matching the vendor's own convention (not `* 2^20`).
fn total_vram_bytes(gpu_tool: &str) -> Result<f64> {
    let output = Command::new(gpu_tool)
        .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
        .output()
        .with_context(|| format!("failed to invoke GPU tool '{gpu_tool}'"))?;

    if !output.status.success() {
        bail!(
            "GPU tool '{gpu_tool}' exited with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout
        .lines()
        .next()
        .context("GPU tool produced no output")?
        .trim();
    let megabytes: f64 = first_line
        .parse()
        .with_context(|| format!("could not parse GPU tool output '{first_line}'"))?;

    Ok(megabytes * 1_000_000.0)
}
