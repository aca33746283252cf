use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use galaxy_core::demo::{demo_planet, demo_world};
use galaxy_core::{
    build_demo_scheduler, EmpireId, EntitySpec, NullHost, RuntimeConfig, Simulation, SystemId,
};

fn populated_simulation(population: usize) -> Simulation {
    let config = Arc::new(RuntimeConfig::builtin());
    let mut sim = Simulation::new(config, demo_world());
    let mut rng = SmallRng::seed_from_u64(0xBEEF);
    let defs = ["fighter", "frigate", "carrier", "bomber", "shield_tender"];
    for _ in 0..population {
        let owner = EmpireId(rng.gen_range(1..=3));
        let planet = demo_planet(SystemId(rng.gen_range(1..=4)), rng.gen_range(1..=2));
        let spec = if rng.gen_bool(0.1) {
            EntitySpec::structure("defense_platform", owner, planet)
        } else {
            let def = defs[rng.gen_range(0..defs.len())];
            EntitySpec::unit(def, owner, planet)
                .with_stats(rng.gen_range(50.0..400.0), rng.gen_range(1.0..5.0))
        };
        let _ = sim.spawn(spec);
    }
    sim
}

fn bench_combat(c: &mut Criterion) {
    let mut group = c.benchmark_group("combat");

    for size in [500usize, 2_000, 5_000] {
        group.bench_with_input(BenchmarkId::new("resolve_all", size), &size, |b, &size| {
            b.iter_batched(
                || populated_simulation(size),
                |mut sim| sim.run_combat(),
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_governance(c: &mut Criterion) {
    let mut group = c.benchmark_group("governance");

    for size in [3_500usize, 6_000] {
        group.bench_with_input(BenchmarkId::new("full_cleanup", size), &size, |b, &size| {
            b.iter_batched(
                || populated_simulation(size),
                |mut sim| sim.run_governance(),
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    c.bench_function("tick/demo", |b| {
        b.iter_batched(
            || build_demo_scheduler(Arc::new(RuntimeConfig::builtin()), NullHost),
            |mut scheduler| scheduler.tick(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(tick_benches, bench_combat, bench_governance, bench_tick);
criterion_main!(tick_benches);
