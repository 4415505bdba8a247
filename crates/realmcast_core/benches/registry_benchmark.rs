//! # Registry Performance Benchmark
//!
//! ARCHITECT'S REQUIREMENTS:
//! - NPC churn (despawn + respawn) stays O(log n) per operation
//! - component snapshots for 10k members stay well under a tick
//!
//! Run with: `cargo bench --package realmcast_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use realmcast_core::{EntityKind, EntityRegistry, LivingState};

struct Channeling;

/// Benchmark: fill the NPC arena.
fn bench_add_npcs(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_npcs");

    for count in [1_000, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let registry = EntityRegistry::new(count);
                for _ in 0..count {
                    let npc = registry.create(EntityKind::Npc, "mob", LivingState::default());
                    black_box(registry.add_npc(npc));
                }
                registry.last_non_null_npc_index()
            });
        });
    }

    group.finish();
}

/// Benchmark: despawn every other NPC, then respawn into the holes.
fn bench_slot_churn(c: &mut Criterion) {
    let registry = EntityRegistry::new(10_000);
    let npcs: Vec<_> = (0..10_000)
        .map(|_| {
            let npc = registry.create(EntityKind::Npc, "mob", LivingState::default());
            registry.add_npc(Arc::clone(&npc));
            npc
        })
        .collect();

    c.bench_function("slot_churn_5k", |b| {
        b.iter(|| {
            for npc in npcs.iter().step_by(2) {
                registry.remove_npc(npc);
            }
            for npc in npcs.iter().step_by(2) {
                black_box(registry.add_npc(Arc::clone(npc)));
            }
        });
    });
}

/// Benchmark: snapshot a large component set.
fn bench_component_snapshot(c: &mut Criterion) {
    let registry = EntityRegistry::new(16);
    for _ in 0..10_000 {
        registry.add_component::<Channeling>(registry.allocate_id());
    }

    c.bench_function("component_snapshot_10k", |b| {
        b.iter(|| black_box(registry.get_by_component::<Channeling>().len()));
    });
}

criterion_group!(benches, bench_add_npcs, bench_slot_churn, bench_component_snapshot);
criterion_main!(benches);
