#![allow(dead_code)]
use block_halo::prelude::*;

/// Run `f` on every rank of an in-process world of `n` ranks, one thread per
/// rank; results come back in rank order.
pub fn run_ranks<T, F>(n: usize, config: HaloConfig, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&HaloContext<RayonComm>) -> T + Sync,
{
    let world = RayonComm::world(n);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let ctx = HaloContext::new(comm, config);
                    f(&ctx)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// 32x8 domain.
pub fn domain() -> IndexBox {
    IndexBox::new_2d(0, 0, 31, 7)
}

/// Four 8x8 boxes in a row covering [`domain`].
pub fn row_of_four() -> BoxArray {
    BoxArray::chop(domain(), IntVect::new(8, 8, 1)).unwrap()
}

/// Periodic in x only.
pub fn x_periodic() -> Periodicity {
    Periodicity::new(&domain(), [true, false, false])
}

/// Distinct value for every point and component.
pub fn ramp(p: IntVect, n: usize) -> f64 {
    (p[0] * 100 + p[1]) as f64 + 0.25 * n as f64
}

/// Locally stored blocks of `coll`, by index.
pub fn local_blocks<V: Element>(coll: &Collection<V>) -> Vec<(usize, Block<V>)> {
    coll.iter().map(|(i, b)| (i, b.clone())).collect()
}

/// Merge per-rank block lists into one list sorted by block index.
pub fn merged<V: Element>(per_rank: Vec<Vec<(usize, Block<V>)>>) -> Vec<(usize, Block<V>)> {
    let mut all: Vec<_> = per_rank.into_iter().flatten().collect();
    all.sort_by_key(|(i, _)| *i);
    all
}

/// A collection of `ncomp` ramp components over `boxes`.
pub fn ramp_collection(
    boxes: BoxArray,
    dmap: DistributionMap,
    ncomp: usize,
    ngrow: IntVect,
    rank: usize,
) -> Collection<f64> {
    let mut c = Collection::new(boxes, dmap, ncomp, ngrow, rank).unwrap();
    c.fill_valid_with(|_, p, n| ramp(p, n));
    c
}
