//! Benchmarks for the Manager's per-tick admission loop: how submission
//! volume and FIFO queue depth affect `update()` cost. Scoped to this
//! scheduler's actual scale (a single host, a handful to a few hundred
//! concurrent submissions) rather than the teacher's 10k-100k job corpus,
//! which this crate has no counterpart for.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stoplight::capacity::Capacity;
use stoplight::job::{Job, NullRuntime};
use stoplight::mailbox::Mailbox;
use stoplight::manager::Manager;
use stoplight::manifest::{JobManifest, ResourceUsage};

fn capacity() -> Capacity {
    Capacity {
        cpu_cores: 64.0,
        total_ram_bytes: 256.0 * 1024.0 * 1024.0 * 1024.0,
        total_vram_bytes: 80.0 * 1024.0 * 1024.0 * 1024.0,
        one_gpu: 1.0,
    }
}

fn tiny_job(index: usize) -> Job {
    Job::new(
        std::path::PathBuf::from("/tmp/bench-job-does-not-exist"),
        JobManifest {
            name: format!("job-{index}"),
            description: "benchmark job".to_string(),
            container: "alpine".to_string(),
            volumes: Default::default(),
            resource_usage: ResourceUsage { cpu: 1.0, ram: 1024.0, gpu: 0.0, vram: 0.0 },
        },
    )
}

fn open_bench_mailbox(tag: &str) -> (Mailbox, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mailbox.bin");
    let sem_name = format!("/stoplight-bench-{tag}-{}", std::process::id());
    let _ = stoplight::ipc::NamedSemaphore::unlink(&sem_name);
    (Mailbox::open(&path, &sem_name).unwrap(), dir)
}

/// A full tick's worth of submission + admission, at various queue depths.
/// Every job fits (resource requests are tiny relative to `capacity()`), so
/// this measures the fast candidate-list path's per-job overhead.
fn bench_admit_from_candidates(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager/admit_from_candidates");

    for size in [10usize, 50, 200, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("jobs", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let (mailbox, dir) = open_bench_mailbox(&format!("candidates-{size}"));
                    let manager = Manager::new(capacity(), NullRuntime, mailbox);
                    (manager, dir)
                },
                |(mut manager, _dir)| {
                    for i in 0..size {
                        manager.add_job(tiny_job(i));
                    }
                    manager.update().unwrap();
                    std::hint::black_box(manager.status());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Status-snapshot serialization and publish cost at various running-set
/// sizes, once jobs are already admitted.
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager/publish");

    for size in [10usize, 100, 500] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("running_jobs", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let (mailbox, dir) = open_bench_mailbox(&format!("publish-{size}"));
                    let mut manager = Manager::new(capacity(), NullRuntime, mailbox);
                    for i in 0..size {
                        manager.add_job(tiny_job(i));
                    }
                    manager.update().unwrap();
                    (manager, dir)
                },
                |(mut manager, _dir)| {
                    manager.update().unwrap();
                    std::hint::black_box(manager.status());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_admit_from_candidates, bench_publish);
criterion_main!(benches);
