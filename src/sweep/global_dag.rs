//! Collective cross-rank check of a sweep graph.
//!
//! Every rank reduces its [`SweepGraph`] to a summary over global cell ids:
//!
//! * `CROSS` edges `remote src -> local consumer`, one per remote dependency;
//! * `LINK` edges `local producer -> remote dst`, one per remote successor;
//! * `REACH` edges `entry -> exit`, from each cell with a remote dependency
//!   to each cell with a remote successor that it reaches locally.
//!
//! All summaries are exchanged with every rank. Each rank then checks that
//! the `CROSS` and `LINK` sets agree (a dependency nobody sends, or a send
//! nobody waits for, would deadlock or fail the sweep) and that the union of
//! all edges is acyclic. Every rank reaches the same verdict.
//!
//! The check is split into [`GlobalDagValidation::start`] and
//! [`GlobalDagValidation::poll`] so that in-process ranks sharing a thread
//! can interleave it; [`validate_global`] is the blocking form.

use crate::algs::communicator::{CommTag, Communicator, Request};
use crate::algs::wire::{WireEdge, decode_edges, encode_edges};
use crate::sweep::graph::{SweepGraph, kahn_order};
use crate::sweep_error::SweepError;
use crate::topology::cell::CellId;
use std::collections::{BTreeMap, BTreeSet};

const CROSS: u32 = 0;
const REACH: u32 = 1;
const LINK: u32 = 2;

/// Summary edges of the local graph, in global ids.
pub fn summarize(graph: &SweepGraph) -> Vec<WireEdge> {
    let mut edges = Vec::new();
    for dep in graph.incoming() {
        edges.push(WireEdge::new(dep.src, graph.global_id(dep.task), CROSS));
    }
    for succ in graph.outgoing() {
        edges.push(WireEdge::new(graph.global_id(succ.task), succ.dst, LINK));
    }

    let exits: BTreeSet<usize> = graph.outgoing().iter().map(|s| s.task).collect();
    let entries: BTreeSet<usize> = graph.incoming().iter().map(|d| d.task).collect();
    let mut seen = vec![false; graph.num_tasks()];
    for &entry in &entries {
        seen.iter_mut().for_each(|s| *s = false);
        let mut stack = vec![entry];
        seen[entry] = true;
        while let Some(t) = stack.pop() {
            if exits.contains(&t) {
                edges.push(WireEdge::new(graph.global_id(entry), graph.global_id(t), REACH));
            }
            for &s in &graph.task(t).successors {
                if !seen[s] {
                    seen[s] = true;
                    stack.push(s);
                }
            }
        }
    }
    edges
}

/// One in-progress collective validation.
pub struct GlobalDagValidation<H> {
    round: u64,
    edges: Vec<WireEdge>,
    pending: BTreeSet<usize>,
    sends: Vec<H>,
    done: bool,
}

impl<H: Request> GlobalDagValidation<H> {
    /// Post this rank's summary to every other rank.
    ///
    /// All ranks must start validations in the same order with the same
    /// `round`.
    pub fn start<C>(graph: &SweepGraph, comm: &C, round: u64) -> Result<Self, SweepError>
    where
        C: Communicator<SendHandle = H>,
    {
        let edges = summarize(graph);
        let payload = encode_edges(round, &edges);
        let me = comm.rank();
        let mut pending = BTreeSet::new();
        let mut sends = Vec::new();
        for peer in (0..comm.size()).filter(|&p| p != me) {
            sends.push(comm.isend(peer, CommTag::GRAPH_VALIDATION, payload.clone())?);
            pending.insert(peer);
        }
        log::debug!(
            "rank {me}: global validation round {round} started ({} summary edges)",
            edges.len()
        );
        Ok(Self {
            round,
            edges,
            pending,
            sends,
            done: false,
        })
    }

    /// Progress the exchange. Returns `Ok(true)` once the verdict is in and
    /// the graph is globally sound.
    pub fn poll<C>(&mut self, comm: &C) -> Result<bool, SweepError>
    where
        C: Communicator<SendHandle = H>,
    {
        if self.done {
            return Ok(true);
        }
        let pending: Vec<usize> = self.pending.iter().copied().collect();
        for peer in pending {
            let Some(bytes) = comm.try_recv(peer, CommTag::GRAPH_VALIDATION)? else {
                continue;
            };
            let (round, edges) = decode_edges(&bytes).map_err(|e| SweepError::transport(peer, e))?;
            if round != self.round {
                return Err(SweepError::transport(
                    peer,
                    format!("graph summary for round {round} during round {}", self.round),
                ));
            }
            if let Some(bad) = edges.iter().find(|e| e.decode().2 > LINK) {
                return Err(SweepError::transport(
                    peer,
                    format!("unknown summary edge kind {}", bad.decode().2),
                ));
            }
            self.edges.extend(edges);
            self.pending.remove(&peer);
        }

        let mut i = 0;
        while i < self.sends.len() {
            if self.sends[i].test()? {
                self.sends.swap_remove(i);
            } else {
                i += 1;
            }
        }
        if !self.pending.is_empty() || !self.sends.is_empty() {
            return Ok(false);
        }

        check_summary(&self.edges)?;
        self.done = true;
        log::debug!("rank {}: global validation round {} passed", comm.rank(), self.round);
        Ok(true)
    }
}

/// Blocking collective validation of `graph`.
pub fn validate_global<C: Communicator>(graph: &SweepGraph, comm: &C, round: u64) -> Result<(), SweepError> {
    let mut validation = GlobalDagValidation::start(graph, comm, round)?;
    while !validation.poll(comm)? {
        std::thread::yield_now();
    }
    Ok(())
}

/// Link consistency and acyclicity of the merged summaries.
fn check_summary(edges: &[WireEdge]) -> Result<(), SweepError> {
    let mut cross = BTreeSet::new();
    let mut links = BTreeSet::new();
    for e in edges {
        let (src, dst, kind) = e.decode();
        match kind {
            CROSS => cross.insert((src, dst)),
            LINK => links.insert((src, dst)),
            _ => false,
        };
    }
    if let Some(&(src, dst)) = cross.symmetric_difference(&links).next() {
        let reason = if cross.contains(&(src, dst)) {
            format!("inconsistent adjacency: cell {dst} waits on cell {src}, which never sends")
        } else {
            format!("inconsistent adjacency: cell {src} sends to cell {dst}, which never waits")
        };
        return Err(SweepError::degenerate(dst, reason));
    }

    let mut index: BTreeMap<CellId, usize> = BTreeMap::new();
    let mut ids = Vec::new();
    let mut dense = |c: CellId| {
        *index.entry(c).or_insert_with(|| {
            ids.push(c);
            ids.len() - 1
        })
    };
    let pairs: BTreeSet<(usize, usize)> = edges
        .iter()
        .map(|e| {
            let (src, dst, _) = e.decode();
            (dense(src), dense(dst))
        })
        .collect();
    let mut successors = vec![Vec::new(); ids.len()];
    let mut predecessors = vec![Vec::new(); ids.len()];
    for &(a, b) in &pairs {
        successors[a].push(b);
        predecessors[b].push(a);
    }
    kahn_order(&successors, &predecessors)
        .map(|_| ())
        .map_err(|node| SweepError::degenerate(ids[node], "cycle in global sweep graph"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use crate::sweep::graph::build_task_graph;
    use crate::topology::direction::Direction;
    use crate::topology::mesh::{FaceNeighbor, LocalPartition};

    fn run_pair(graphs: [&SweepGraph; 2]) -> [Result<(), SweepError>; 2] {
        let world = LocalComm::world(2);
        let mut v0 = GlobalDagValidation::start(graphs[0], &world[0], 7).unwrap();
        let mut v1 = GlobalDagValidation::start(graphs[1], &world[1], 7).unwrap();
        let mut out: [Option<Result<(), SweepError>>; 2] = [None, None];
        while out.iter().any(Option::is_none) {
            for (r, v) in [&mut v0, &mut v1].into_iter().enumerate() {
                if out[r].is_none() {
                    match v.poll(&world[r]) {
                        Ok(false) => {}
                        Ok(true) => out[r] = Some(Ok(())),
                        Err(e) => out[r] = Some(Err(e)),
                    }
                }
            }
        }
        out.map(|o| o.unwrap())
    }

    #[test]
    fn split_grid_is_sound() {
        let owner = |i: usize, _j: usize| usize::from(i >= 2);
        let omega = Direction::new([1.0, 0.5, 0.0]);
        let g0 = build_task_graph(&LocalPartition::grid_2d(4, 3, 0, owner), omega).unwrap();
        let g1 = build_task_graph(&LocalPartition::grid_2d(4, 3, 1, owner), omega).unwrap();
        assert!(summarize(&g0).iter().any(|e| e.decode().2 == LINK));
        let [r0, r1] = run_pair([&g0, &g1]);
        r0.unwrap();
        r1.unwrap();
    }

    #[test]
    fn single_rank_passes_immediately() {
        let g = build_task_graph(&LocalPartition::grid_2d(3, 3, 0, |_, _| 0), Direction::new([1.0, 1.0, 0.0]))
            .unwrap();
        let world = LocalComm::world(1);
        validate_global(&g, &world[0], 0).unwrap();
    }

    /// Two cells per rank, wired so that flow goes 0 -> 2 (rank 1), 2 -> 3
    /// locally, 3 -> 1 (rank 0) and 1 -> 0 locally: a cycle no single rank
    /// can see.
    fn cyclic_ranks() -> (LocalPartition, LocalPartition) {
        let ghost = |rank: usize, cell: u64| FaceNeighbor::Ghost {
            rank,
            cell: CellId::new(cell),
        };
        let mut p0 = LocalPartition::new(0);
        p0.add_cell(CellId::new(0));
        p0.add_cell(CellId::new(1));
        // cell 0: fed by local 1 (from -x), feeds ghost 2 (+x)
        p0.add_face(0, [-1.0, 0.0, 0.0], FaceNeighbor::Local(1)).unwrap();
        p0.add_face(0, [1.0, 0.0, 0.0], ghost(1, 2)).unwrap();
        // cell 1: fed by ghost 3, feeds local 0
        p0.add_face(1, [-1.0, 0.0, 0.0], ghost(1, 3)).unwrap();
        p0.add_face(1, [1.0, 0.0, 0.0], FaceNeighbor::Local(0)).unwrap();

        let mut p1 = LocalPartition::new(1);
        p1.add_cell(CellId::new(2));
        p1.add_cell(CellId::new(3));
        p1.add_face(0, [-1.0, 0.0, 0.0], ghost(0, 0)).unwrap();
        p1.add_face(0, [1.0, 0.0, 0.0], FaceNeighbor::Local(1)).unwrap();
        p1.add_face(1, [-1.0, 0.0, 0.0], FaceNeighbor::Local(0)).unwrap();
        p1.add_face(1, [1.0, 0.0, 0.0], ghost(0, 1)).unwrap();
        (p0, p1)
    }

    #[test]
    fn cross_rank_cycle_is_degenerate() {
        let (p0, p1) = cyclic_ranks();
        let omega = Direction::new([1.0, 0.0, 0.0]);
        let g0 = build_task_graph(&p0, omega).unwrap();
        let g1 = build_task_graph(&p1, omega).unwrap();
        for r in run_pair([&g0, &g1]) {
            let err = r.unwrap_err();
            assert!(err.to_string().contains("cycle"), "{err}");
        }
    }

    #[test]
    fn unmatched_link_is_inconsistent() {
        let owner = |i: usize, _j: usize| usize::from(i >= 2);
        let g0 = build_task_graph(&LocalPartition::grid_2d(4, 1, 0, owner), Direction::new([1.0, 0.0, 0.0]))
            .unwrap();
        // Rank 1 sweeps the opposite way, so nobody waits on rank 0's send
        // and rank 0 never sends what rank 1 waits for.
        let g1 = build_task_graph(&LocalPartition::grid_2d(4, 1, 1, owner), Direction::new([-1.0, 0.0, 0.0]))
            .unwrap();
        for r in run_pair([&g0, &g1]) {
            assert!(r.unwrap_err().to_string().contains("inconsistent adjacency"));
        }
    }

    #[test]
    fn round_mismatch_is_transport_failure() {
        let g = build_task_graph(&LocalPartition::grid_2d(2, 1, 0, |_, _| 0), Direction::new([1.0, 0.0, 0.0]))
            .unwrap();
        let world = LocalComm::world(2);
        let _ = GlobalDagValidation::start(&g, &world[1], 1).unwrap();
        let mut v0 = GlobalDagValidation::start(&g, &world[0], 2).unwrap();
        let err = v0.poll(&world[0]).unwrap_err();
        assert!(matches!(err, SweepError::TransportFailure { peer: 1, .. }));
    }
}
