#![allow(dead_code)]
use std::collections::BTreeMap;
use std::sync::Arc;
use sweep_sieve::prelude::*;

/// The same gateway on every boundary of a `grid_2d` mesh.
pub fn boundaries_of(gateway: Arc<dyn BoundaryGateway>) -> BoundaryMap {
    (0..4).map(|id| (id, Arc::clone(&gateway))).collect()
}

pub fn vacuum() -> BoundaryMap {
    boundaries_of(Arc::new(VacuumBoundary))
}

/// Column strips: rank `r` owns columns `[r*nx/ranks, (r+1)*nx/ranks)`.
pub fn strip_owner(nx: usize, ranks: usize) -> impl Fn(usize, usize) -> usize + Copy {
    move |i, _j| i * ranks / nx
}

pub fn split_grid(nx: usize, ny: usize, ranks: usize, rank: usize) -> LocalPartition {
    LocalPartition::grid_2d(nx, ny, rank, strip_owner(nx, ranks))
}

/// One angle set per quadrant of the xy-plane, direction index = quadrant.
pub fn quadrant_specs() -> Vec<AngleSetSpec> {
    [[1.0, 1.0], [-1.0, 1.0], [-1.0, -1.0], [1.0, -1.0]]
        .iter()
        .enumerate()
        .map(|(d, o)| AngleSetSpec::new(Direction::new([o[0], o[1], 0.0]), [d]))
        .collect()
}

/// Kernel computing `1 + Σ upwind` per cell and publishing it downwind.
/// Results land in `out` keyed by `(angle set, global cell)`.
pub fn accumulate(
    out: &mut BTreeMap<(usize, CellId), f64>,
) -> impl FnMut(&mut SweepContext<'_>) -> Result<(), SweepError> + '_ {
    move |ctx: &mut SweepContext<'_>| {
        let direction = ctx.directions()[0];
        let mut value = 1.0;
        for (f, face) in ctx.faces().iter().enumerate() {
            if face.orientation != FaceOrientation::Incoming {
                continue;
            }
            value += match face.neighbor {
                FaceNeighbor::Boundary(_) => ctx.boundary_value(f, 0, direction, 0)?,
                _ => ctx.upwind_values(f)?.first().copied().unwrap_or(0.0),
            };
        }
        for f in 0..ctx.faces().len() {
            let face = ctx.faces()[f];
            if face.orientation == FaceOrientation::Outgoing
                && !matches!(face.neighbor, FaceNeighbor::Boundary(_))
            {
                ctx.set_downwind_values(f, vec![value])?;
            }
        }
        out.insert((ctx.angle_set_id(), ctx.global_id()), value);
        Ok(())
    }
}

/// Run `f` once per rank of an in-process world, each on its own thread.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let world = LocalComm::world(size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = world.into_iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Advance one angle set per rank round-robin on the current thread until
/// all finish. Returns the number of rounds.
pub fn lockstep<K: SweepChunk>(
    sets: &mut [AngleSet<LocalComm>],
    kernels: &mut [K],
    max_rounds: usize,
) -> Result<usize, SweepError> {
    for round in 1..=max_rounds {
        let mut done = true;
        for (set, kernel) in sets.iter_mut().zip(kernels.iter_mut()) {
            if set.advance(kernel)? != AngleSetStatus::Finished {
                done = false;
            }
        }
        if done {
            return Ok(round);
        }
    }
    panic!("angle sets did not finish within {max_rounds} rounds");
}
