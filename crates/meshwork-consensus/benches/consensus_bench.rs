//! Benchmarks for meshwork consensus
//!
//! Measures:
//! - Proposal digests
//! - A full agreement among 3f+1 in-process validators
//! - Agreement with one dissenting validator

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use meshwork_consensus::{validators_for, ConsensusConfig, LocalCluster, Proposal, TaskId};
use meshwork_topology::NodeId;

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("proposal_digest");
    for size in [64usize, 4096, 65536] {
        let proposal = Proposal::new("bench", vec![7u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &proposal, |b, p| {
            b.iter(|| black_box(p.digest()));
        });
    }
    group.finish();
}

fn bench_agreement(c: &mut Criterion) {
    let mut group = c.benchmark_group("agreement");
    for f in [1usize, 2, 3] {
        let n = validators_for(f) as u64;
        group.bench_with_input(BenchmarkId::new("honest", n), &f, |b, &f| {
            b.iter(|| {
                let task = TaskId::new("bench");
                let mut cluster = LocalCluster::new(n, ConsensusConfig::default());
                cluster
                    .start(&task, f, 0, |_| Some(Proposal::new(task.clone(), b"value".to_vec())))
                    .ok();
                black_box(cluster.decisions().len())
            });
        });
        group.bench_with_input(BenchmarkId::new("one_dissenter", n), &f, |b, &f| {
            b.iter(|| {
                let task = TaskId::new("bench");
                let mut cluster = LocalCluster::new(n, ConsensusConfig::default());
                cluster
                    .start(&task, f, 0, |id| {
                        let value = if id == NodeId(n) { b"other".to_vec() } else { b"value".to_vec() };
                        Some(Proposal::new(task.clone(), value))
                    })
                    .ok();
                black_box(cluster.decisions().len())
            });
        });
    }
    group.finish();
}

fn bench_view_change(c: &mut Criterion) {
    c.bench_function("agreement/silent_primary", |b| {
        b.iter(|| {
            let task = TaskId::new("bench");
            let config = ConsensusConfig::default().with_round_timeout(Duration::from_millis(10));
            let mut cluster = LocalCluster::new(4, config);
            cluster.crash(NodeId(1));
            cluster
                .start(&task, 1, 0, |_| Some(Proposal::new(task.clone(), b"value".to_vec())))
                .ok();
            cluster.settle(&task, Duration::from_millis(10), 20);
            black_box(cluster.decisions().len())
        });
    });
}

criterion_group!(benches, bench_digest, bench_agreement, bench_view_change);
criterion_main!(benches);
