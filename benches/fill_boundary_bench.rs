use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use block_halo::prelude::*;

fn random_collection(n: i32, block: i32, ncomp: usize, seed: u64) -> Collection<f64> {
    let domain = IndexBox::new(IntVect::ZERO, IntVect::new(n - 1, n - 1, n - 1));
    let boxes = BoxArray::chop(domain, IntVect::new(block, block, block)).expect("non-empty domain");
    let dmap = DistributionMap::round_robin(boxes.len(), 1);
    let mut c = Collection::new(boxes, dmap, ncomp, IntVect::new(2, 2, 2), 0).expect("valid collection");
    let mut rng = SmallRng::seed_from_u64(seed);
    c.fill_valid_with(|_, _, _| rng.r#gen::<f64>());
    c
}

fn bench_fill_boundary(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_boundary");
    let period = Periodicity::new(
        &IndexBox::new(IntVect::ZERO, IntVect::new(63, 63, 63)),
        [true, true, true],
    );

    for backend in [ExecBackend::Cpu, ExecBackend::DeviceAsync, ExecBackend::DeviceGraph] {
        let ctx = HaloContext::new(NoComm::default(), HaloConfig::default().with_backend(backend));
        let mut u = random_collection(64, 16, 4, 42);
        let opts = FillBoundaryOptions::new().with_period(period);
        group.bench_with_input(BenchmarkId::new("periodic_64cubed", format!("{backend:?}")), &opts, |b, opts| {
            b.iter(|| fill_boundary(&ctx, black_box(&mut u), *opts).expect("fill"));
        });
    }

    group.finish();
}

fn bench_parallel_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_copy");
    let src = random_collection(64, 16, 8, 7);

    for &max_comp in &[2usize, 8] {
        let ctx = HaloContext::new(NoComm::default(), HaloConfig::default().with_max_comp(max_comp));
        let dba = BoxArray::chop(
            IndexBox::new(IntVect::ZERO, IntVect::new(63, 63, 63)),
            IntVect::new(32, 32, 8),
        )
        .expect("non-empty domain");
        let ddm = DistributionMap::round_robin(dba.len(), 1);
        let mut dst = Collection::<f64>::new(dba, ddm, 8, IntVect::ZERO, 0).expect("valid collection");
        group.bench_with_input(BenchmarkId::new("relayout", max_comp), &max_comp, |b, _| {
            b.iter(|| {
                parallel_copy(&ctx, black_box(&mut dst), &src, CopySpec::new(0, 0, 8), None).expect("copy")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fill_boundary, bench_parallel_copy);
criterion_main!(benches);
