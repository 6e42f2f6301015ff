//! The scheduling core: pending/running sets, the four-dimensional
//! admission check, and the per-tick reap/admit/drain/publish cycle.
//!
//! No direct teacher analogue carries this exact fast-path algorithm (the
//! teacher's own scheduler is a much larger priority/dependency/group
//! scheduler); what's kept from it is the *shape* — a struct holding
//! parallel collections plus an `update`/tick method that returns a status
//! view, the same state-vs-loop split the teacher's `Scheduler` /
//! `SchedulerRuntime` pair uses.

use crate::capacity::Capacity;
use crate::job::{ContainerRuntime, Job, JobRunner};
use crate::mailbox::Mailbox;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// A job's raw resource request mapped onto a percent-of-host-capacity
/// 4-tuple. Also doubles as a running utilization accumulator — both are
/// "the same four numbers", just summed differently.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Normalized {
    cpu: f64,
    ram: f64,
    gpu: f64,
    vram: f64,
}

impl Normalized {
    fn of(job: &Job, capacity: &Capacity) -> Self {
        let usage = &job.manifest.resource_usage;
        Self {
            cpu: usage.cpu / capacity.cpu_cores,
            ram: usage.ram / capacity.total_ram_bytes * 100.0,
            gpu: usage.gpu / capacity.one_gpu,
            vram: usage.vram / capacity.total_vram_bytes * 100.0,
        }
    }

    fn headroom(&self) -> Self {
        Self { cpu: 100.0 - self.cpu, ram: 100.0 - self.ram, gpu: 100.0 - self.gpu, vram: 100.0 - self.vram }
    }

    fn fits_under(&self, headroom: &Self) -> bool {
        self.cpu <= headroom.cpu && self.ram <= headroom.ram && self.gpu <= headroom.gpu && self.vram <= headroom.vram
    }

    fn add_assign(&mut self, other: &Self) {
        self.cpu += other.cpu;
        self.ram += other.ram;
        self.gpu += other.gpu;
        self.vram += other.vram;
    }

    fn sub_assign(&mut self, other: &Self) {
        self.cpu -= other.cpu;
        self.ram -= other.ram;
        self.gpu -= other.gpu;
        self.vram -= other.vram;
    }
}

/// `{running: [(name, description)...], pending: [(name, description)...]}`,
/// published into the mailbox after every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: Vec<(String, String)>,
    pub pending: Vec<(String, String)>,
}

struct RunningJob {
    job: Job,
    runner: JobRunner,
}

pub struct Manager<R> {
    capacity: Capacity,
    runtime: R,
    mailbox: Mailbox,

    pending: VecDeque<Job>,
    /// Supplementary ordered list of jobs added since the last scheduling
    /// pass; the fast path when nothing has completed.
    candidates: VecDeque<Job>,
    /// Ids admitted via the candidate-list fast path that still have a
    /// stale entry sitting in `pending`. Consulted (and pruned) the next
    /// time `pending` is walked in full — which may be several ticks from
    /// now, so this persists across ticks rather than being reset every
    /// one (see DESIGN.md for why this departs from a literal reading of
    /// spec's data model section).
    already_started: HashSet<Uuid>,
    running: Vec<RunningJob>,
    utilization: Normalized,
}

impl<R: ContainerRuntime> Manager<R> {
    pub fn new(capacity: Capacity, runtime: R, mailbox: Mailbox) -> Self {
        Self {
            capacity,
            runtime,
            mailbox,
            pending: VecDeque::new(),
            candidates: VecDeque::new(),
            already_started: HashSet::new(),
            running: Vec::new(),
            utilization: Normalized::default(),
        }
    }

    /// Appends to the pending queue and the admission-candidate list. O(1),
    /// never blocks. Does not itself attempt admission.
    pub fn add_job(&mut self, job: Job) {
        self.pending.push_back(job.clone());
        self.candidates.push_back(job);
    }

    /// One scheduling tick: reap finished runners, admit what now fits,
    /// drain running output, and publish a fresh status snapshot.
    pub fn update(&mut self) -> Result<()> {
        let any_finished = self.reap()?;

        if any_finished {
            self.admit_from_pending()?;
        } else {
            self.admit_from_candidates()?;
        }
        self.candidates.clear();

        for running in &mut self.running {
            running.runner.drain_output()?;
        }

        self.publish()?;
        Ok(())
    }

    /// Pure read: the current running/pending composition.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            running: self.running.iter().map(|r| (r.job.name().to_string(), r.job.description().to_string())).collect(),
            pending: self
                .pending
                .iter()
                .filter(|job| !self.already_started.contains(&job.id))
                .map(|job| (job.name().to_string(), job.description().to_string()))
                .collect(),
        }
    }

    /// Best-effort terminate of every running job, for daemon shutdown.
    pub fn terminate_all(&mut self) {
        for running in &mut self.running {
            running.runner.terminate();
        }
        self.running.clear();
    }

    fn reap(&mut self) -> Result<bool> {
        let mut finished_indices = Vec::new();
        for (index, running) in self.running.iter_mut().enumerate() {
            if running.runner.is_finished()? {
                finished_indices.push(index);
            }
        }

        let any_finished = !finished_indices.is_empty();
        for index in finished_indices.into_iter().rev() {
            let mut running = self.running.remove(index);
            let succeeded = running.runner.exited_successfully()?;
            if succeeded {
                tracing::info!(job = running.job.name(), "job completed");
            } else {
                tracing::warn!(job = running.job.name(), "job failed");
            }
            self.utilization.sub_assign(&Normalized::of(&running.job, &self.capacity));
        }

        Ok(any_finished)
    }

    /// Full walk of the pending queue: resource availability changed, so
    /// previously rejected jobs may now fit. Strict FIFO — the walk stops
    /// the instant a job doesn't fit, rather than skipping ahead.
    fn admit_from_pending(&mut self) -> Result<()> {
        loop {
            let Some(job) = self.pending.pop_front() else { break };

            if self.already_started.remove(&job.id) {
                // Ghost entry: already running via the candidate fast path.
                continue;
            }

            let request = Normalized::of(&job, &self.capacity);
            if request.fits_under(&self.utilization.headroom()) {
                self.admit(job)?;
            } else {
                self.pending.push_front(job);
                break;
            }
        }
        Ok(())
    }

    /// Fast path: utilization could only have grown since the last tick
    /// (new submissions), so only the candidate list needs checking.
    fn admit_from_candidates(&mut self) -> Result<()> {
        loop {
            let Some(job) = self.candidates.pop_front() else { break };

            let request = Normalized::of(&job, &self.capacity);
            if request.fits_under(&self.utilization.headroom()) {
                self.already_started.insert(job.id);
                self.admit(job)?;
            } else {
                self.candidates.push_front(job);
                break;
            }
        }
        Ok(())
    }

    fn admit(&mut self, job: Job) -> Result<()> {
        let runner = JobRunner::start(&job, &self.runtime)
            .with_context(|| format!("starting job runner for '{}'", job.name()))?;
        self.utilization.add_assign(&Normalized::of(&job, &self.capacity));
        self.running.push(RunningJob { job, runner });
        Ok(())
    }

    /// Test-only window onto the raw utilization vector, so property tests
    /// can assert P1/P2 directly instead of inferring them from `status()`.
    #[cfg(test)]
    fn utilization(&self) -> (f64, f64, f64, f64) {
        (self.utilization.cpu, self.utilization.ram, self.utilization.gpu, self.utilization.vram)
    }

    fn publish(&mut self) -> Result<()> {
        let snapshot = self.status();
        let payload = serde_json::to_vec(&snapshot).context("serializing status snapshot")?;
        if let Err(e) = self.mailbox.set(&payload) {
            tracing::warn!(error = %e, "status snapshot exceeded mailbox capacity, leaving prior snapshot in place");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{JobManifest, ResourceUsage};
    use std::path::PathBuf;
    use std::process::{Child, Command, Stdio};

    fn capacity() -> Capacity {
        Capacity { cpu_cores: 4.0, total_ram_bytes: 16.0 * 1024.0 * 1024.0 * 1024.0, total_vram_bytes: 8.0 * 1024.0 * 1024.0 * 1024.0, one_gpu: 1.0 }
    }

    fn job(name: &str, cpu: f64, ram: f64, gpu: f64, vram: f64) -> Job {
        Job::new(
            PathBuf::from("/tmp/does-not-matter"),
            JobManifest {
                name: name.to_string(),
                description: name.to_lowercase(),
                container: "alpine".to_string(),
                volumes: Default::default(),
                resource_usage: ResourceUsage { cpu, ram, gpu, vram },
            },
        )
    }

    /// Spawns real, near-instant processes instead of containers, so
    /// Manager's reap/admit logic can be exercised without Docker
    /// installed.
    struct InstantRuntime;

    impl ContainerRuntime for InstantRuntime {
        fn spawn(&self, _job: &Job) -> Result<Child> {
            Command::new("true").stdout(Stdio::piped()).stderr(Stdio::piped()).spawn().context("spawning stub job")
        }
    }

    struct NeverFinishesRuntime;

    impl ContainerRuntime for NeverFinishesRuntime {
        fn spawn(&self, _job: &Job) -> Result<Child> {
            Command::new("sleep").arg("30").stdout(Stdio::piped()).stderr(Stdio::piped()).spawn().context("spawning stub job")
        }
    }

    fn open_mailbox(tag: &str) -> (Mailbox, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailbox.bin");
        let sem_name = format!("/stoplight-test-manager-{tag}-{}", std::process::id());
        let _ = crate::ipc::NamedSemaphore::unlink(&sem_name);
        (Mailbox::open(&path, &sem_name).unwrap(), dir)
    }

    #[test]
    fn single_small_job_admits_immediately() {
        let (mailbox, _dir) = open_mailbox("single");
        let mut manager = Manager::new(capacity(), InstantRuntime, mailbox);
        manager.add_job(job("A", 50.0, 1024f64.powi(3), 10.0, 1024f64.powi(3)));
        manager.update().unwrap();

        let status = manager.status();
        assert_eq!(status.running, vec![("A".to_string(), "a".to_string())]);
        assert!(status.pending.is_empty());
    }

    #[test]
    fn strict_fifo_blocks_on_first_non_fitting_job() {
        let (mailbox, _dir) = open_mailbox("fifo");
        let mut manager = Manager::new(capacity(), NeverFinishesRuntime, mailbox);
        manager.add_job(job("B", 400.0, 0.0, 0.0, 0.0));
        manager.add_job(job("C", 50.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();

        let status = manager.status();
        assert_eq!(status.running, vec![("B".to_string(), "b".to_string())]);
        assert_eq!(status.pending, vec![("C".to_string(), "c".to_string())]);
    }

    #[test]
    fn oversized_job_never_admits() {
        let (mailbox, _dir) = open_mailbox("oversized");
        let mut manager = Manager::new(capacity(), InstantRuntime, mailbox);
        manager.add_job(job("E", 500.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();
        manager.update().unwrap();

        let status = manager.status();
        assert!(status.running.is_empty());
        assert_eq!(status.pending, vec![("E".to_string(), "e".to_string())]);
    }

    #[test]
    fn zero_resource_job_admits_regardless_of_headroom() {
        let (mailbox, _dir) = open_mailbox("zero-resource");
        let mut manager = Manager::new(capacity(), NeverFinishesRuntime, mailbox);
        manager.add_job(job("F1", 400.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();
        manager.add_job(job("F2", 0.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();

        let status = manager.status();
        assert!(status.running.iter().any(|(name, _)| name == "F2"));
    }

    #[test]
    fn exact_fit_at_boundary_admits() {
        let (mailbox, _dir) = open_mailbox("boundary");
        let mut manager = Manager::new(capacity(), InstantRuntime, mailbox);
        manager.add_job(job("G", 400.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();
        let status = manager.status();
        assert_eq!(status.running, vec![("G".to_string(), "g".to_string())]);
    }

    #[test]
    fn candidate_fast_path_admits_without_touching_older_pending() {
        let (mailbox, _dir) = open_mailbox("fast-path");
        let mut manager = Manager::new(capacity(), NeverFinishesRuntime, mailbox);
        // A leaves headroom; never finishes, so the only way D can be
        // admitted on the next tick is via the candidate-list fast path.
        manager.add_job(job("A", 50.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();
        manager.add_job(job("D", 50.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();

        let status = manager.status();
        assert!(status.running.iter().any(|(name, _)| name == "A"));
        assert!(status.running.iter().any(|(name, _)| name == "D"));
        assert!(status.pending.is_empty());
    }

    #[test]
    fn completed_job_frees_resources_for_pending() {
        let (mailbox, _dir) = open_mailbox("reclaim");
        let mut manager = Manager::new(capacity(), InstantRuntime, mailbox);
        manager.add_job(job("B", 400.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();
        manager.add_job(job("C", 50.0, 0.0, 0.0, 0.0));
        manager.update().unwrap();
        assert!(manager.status().pending.iter().any(|(n, _)| n == "C"));

        // B (InstantRuntime) has already exited; next tick reaps it and
        // frees headroom for C.
        std::thread::sleep(std::time::Duration::from_millis(50));
        manager.update().unwrap();
        assert!(manager.status().running.iter().any(|(n, _)| n == "C"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        /// Property: whatever sequence of jobs gets submitted, utilization
        /// never leaves `[0, 100]` in any dimension (P1), and every job
        /// reported running is accounted for in exactly one of pending or
        /// running, never both (P3, modulo the already-started ghost
        /// entries `status()` itself filters out).
        proptest! {
            #[test]
            fn utilization_stays_in_bounds(
                requests in prop::collection::vec((0.0f64..500.0, 0.0f64..2e10, 0.0f64..150.0, 0.0f64..2e10), 1..12)
            ) {
                let (mailbox, _dir) = open_mailbox(&format!("prop-bounds-{}", Uuid::new_v4()));
                let mut manager = Manager::new(capacity(), InstantRuntime, mailbox);

                for (i, (cpu, ram, gpu, vram)) in requests.iter().enumerate() {
                    manager.add_job(job(&format!("J{i}"), *cpu, *ram, *gpu, *vram));
                }
                manager.update().unwrap();

                let (cpu_used, ram_used, gpu_used, vram_used) = manager.utilization();
                prop_assert!((0.0..=100.0001).contains(&cpu_used));
                prop_assert!((0.0..=100.0001).contains(&ram_used));
                prop_assert!((0.0..=100.0001).contains(&gpu_used));
                prop_assert!((0.0..=100.0001).contains(&vram_used));

                let status = manager.status();
                prop_assert_eq!(status.running.len() + status.pending.len(), requests.len());
            }

            /// Property (B2): a job whose own normalized request exceeds
            /// 100 in any dimension never admits, no matter how many ticks
            /// pass on an otherwise-empty system.
            #[test]
            fn oversized_single_dimension_request_never_admits(
                which in 0usize..4,
                overshoot in 1.01f64..5.0,
            ) {
                let cap = capacity();
                // Per-dimension raw request that normalizes to just over
                // 100% headroom against `capacity()`, for whichever
                // dimension `which` picks.
                let thresholds = [cap.cpu_cores * 100.0, cap.total_ram_bytes, cap.one_gpu * 100.0, cap.total_vram_bytes];

                let (mailbox, _dir) = open_mailbox(&format!("prop-oversized-{}", Uuid::new_v4()));
                let mut manager = Manager::new(cap, InstantRuntime, mailbox);

                let mut req = [0.0f64; 4];
                req[which] = thresholds[which] * overshoot;
                manager.add_job(job("OVER", req[0], req[1], req[2], req[3]));

                for _ in 0..3 {
                    manager.update().unwrap();
                }

                prop_assert!(manager.status().running.is_empty());
                prop_assert_eq!(manager.status().pending.len(), 1);
            }
        }
    }
}
