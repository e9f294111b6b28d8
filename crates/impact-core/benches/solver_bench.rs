// -------------------------------------------------------------------------
// SCPN Impact Core -- Solver Benchmark
// One SPH step over a homogeneous sphere, sequential vs pooled
// scheduling, and the finder variants on the same cloud.
// -------------------------------------------------------------------------

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use impact_core::boundary::NullBoundary;
use impact_core::equations::{
    AdaptiveSmoothingLength, ContinuityEquation, EquationTerm, PressureForce, StandardAV,
};
use impact_core::finders::{BvhFinder, KdTree, SpatialFinder, UniformGridFinder};
use impact_core::initial::make_sphere_body;
use impact_core::scheduler::{RayonScheduler, Scheduler, SequentialScheduler};
use impact_core::solver::{Solver, SphSolver};
use impact_core::storage::QuantityId;
use impact_math::kernel::LutKernel;
use impact_math::Vector;
use impact_types::config::BodyConfig;
use impact_types::stats::Statistics;
use std::hint::black_box;

fn standard_terms() -> Vec<Box<dyn EquationTerm>> {
    vec![
        Box::new(PressureForce),
        Box::new(ContinuityEquation::new(false)),
        Box::new(StandardAV::new(1.5, 3.0)),
        Box::new(AdaptiveSmoothingLength),
    ]
}

fn bench_sph_step(c: &mut Criterion) {
    let body = BodyConfig {
        particle_count: 5000,
        density: 1.0,
        energy: 1.0,
        ..BodyConfig::default()
    };
    let mut group = c.benchmark_group("sph_step");
    let schedulers: Vec<(&str, Box<dyn Scheduler>)> = vec![
        ("sequential", Box::new(SequentialScheduler)),
        ("pool4", Box::new(RayonScheduler::new(4).unwrap())),
    ];
    for (name, scheduler) in &schedulers {
        group.bench_function(BenchmarkId::new("step", name), |b| {
            let mut storage = make_sphere_body(&body, 1.0, Vector::zero(), 5, 0).unwrap();
            let mut solver = SphSolver::new(
                LutKernel::default(),
                Box::new(KdTree::new()),
                standard_terms(),
                Box::new(NullBoundary),
                None,
                100,
            )
            .unwrap();
            solver.create(&mut storage).unwrap();
            let mut stats = Statistics::default();
            b.iter(|| {
                storage.init();
                solver
                    .integrate(scheduler.as_ref(), &mut storage, &mut stats)
                    .unwrap();
                black_box(stats.neighbour_counts.mean());
            });
        });
    }
    group.finish();
}

fn bench_finders(c: &mut Criterion) {
    let body = BodyConfig {
        particle_count: 10000,
        density: 1.0,
        ..BodyConfig::default()
    };
    let storage = make_sphere_body(&body, 1.0, Vector::zero(), 9, 0).unwrap();
    let positions = storage.value::<Vector>(QuantityId::Position).unwrap();
    let radius = 2.0 * positions[0].h();
    let scheduler = SequentialScheduler;

    let mut group = c.benchmark_group("finders");
    let mut finders: Vec<(&str, Box<dyn SpatialFinder>)> = vec![
        ("kd_tree", Box::new(KdTree::new())),
        ("uniform_grid", Box::new(UniformGridFinder::new())),
        ("bvh", Box::new(BvhFinder::new())),
    ];
    for (name, finder) in &mut finders {
        group.bench_function(BenchmarkId::new("build_and_query", *name), |b| {
            let mut records = Vec::new();
            b.iter(|| {
                finder.build(&scheduler, positions);
                let mut found = 0;
                for i in (0..positions.len()).step_by(10) {
                    records.clear();
                    found += finder.find_all(i, radius, &mut records);
                }
                black_box(found);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sph_step, bench_finders);
criterion_main!(benches);
