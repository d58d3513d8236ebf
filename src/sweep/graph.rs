//! Task Graph Builder: per-direction dependency graph over local cells.
//!
//! For every face of a local cell `A` with outward normal `n`, the sweep
//! direction `Ω` decides the role of the neighbor `B` behind it:
//!
//! * `Ω·n < 0` (incoming): `B` is upwind and `A` depends on it. A local `B`
//!   lists `A` among its successors; a ghost `B` becomes a remote
//!   dependency that only a received message can satisfy; a boundary makes
//!   `A` read from that boundary's gateway.
//! * `Ω·n > 0` (outgoing): a ghost `B` becomes a remote successor that `A`
//!   must send its interface values to.
//! * otherwise the face is parallel to `Ω` and carries nothing.
//!
//! Edges are created only from the consumer's incoming faces, so each local
//! edge is recorded once regardless of how the two sides' normals round.
//! The local graph is then checked for cycles with Kahn's algorithm, which
//! also yields the scan order used by angle sets.
//!
//! ## Complexity
//! - Time: **O(cells + faces)**
//! - Space: **O(cells + faces)**

use crate::debug_invariants::DebugInvariants;
use crate::sweep::task::{CellTask, TaskList};
use crate::sweep_error::SweepError;
use crate::topology::cell::CellId;
use crate::topology::direction::{Direction, FaceOrientation};
use crate::topology::mesh::{BoundaryId, FaceNeighbor, SweepMesh};
use itertools::Itertools;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// A local task waiting on a value produced by a cell on another rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteDependency {
    pub task: usize,
    pub peer: usize,
    /// Global id of the upwind cell on `peer`.
    pub src: CellId,
}

/// A local task whose output feeds a cell on another rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteSuccessor {
    pub task: usize,
    pub face: usize,
    pub peer: usize,
    /// Global id of the downwind cell on `peer`.
    pub dst: CellId,
}

/// A cell face as seen by the sweep for one direction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GraphFace {
    pub normal: [f64; 3],
    pub neighbor: FaceNeighbor,
    pub orientation: FaceOrientation,
}

/// Dependency graph of one sweep direction over the local partition.
///
/// Built once and shared (`Arc`) by every angle set whose directions share
/// this upwind/downwind topology.
#[derive(Clone, Debug)]
pub struct SweepGraph {
    direction: Direction,
    rank: usize,
    tasks: TaskList,
    predecessors: Vec<Vec<usize>>,
    scan_order: Vec<usize>,
    global_ids: Vec<CellId>,
    faces: Vec<Vec<GraphFace>>,
    incoming: Vec<RemoteDependency>,
    outgoing: Vec<RemoteSuccessor>,
    recv_index: HashMap<(usize, CellId, CellId), usize>,
    boundary_inputs: Vec<Vec<BoundaryId>>,
}

impl SweepGraph {
    /// Direction the graph was built for.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Rank owning the partition.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Fresh task list with all dependency counts at their initial value.
    pub fn task_list(&self) -> TaskList {
        self.tasks.clone()
    }

    /// Template task (initial dependency count).
    pub fn task(&self, task: usize) -> &CellTask {
        &self.tasks[task]
    }

    /// Local upwind tasks of `task`.
    pub fn predecessors(&self, task: usize) -> &[usize] {
        &self.predecessors[task]
    }

    /// Topological order of the local graph; index order among independent tasks.
    pub fn scan_order(&self) -> &[usize] {
        &self.scan_order
    }

    pub fn global_id(&self, cell: usize) -> CellId {
        self.global_ids[cell]
    }

    /// Faces of `cell`, in mesh order.
    pub fn faces(&self, cell: usize) -> &[GraphFace] {
        &self.faces[cell]
    }

    /// Remote dependencies (one message each).
    pub fn incoming(&self) -> &[RemoteDependency] {
        &self.incoming
    }

    /// Remote successors (one message record each).
    pub fn outgoing(&self) -> &[RemoteSuccessor] {
        &self.outgoing
    }

    /// Remote successors fed by `task`.
    pub fn remote_successors(&self, task: usize) -> &[RemoteSuccessor] {
        // Recorded while visiting cells in index order, so sorted by task.
        let lo = self.outgoing.partition_point(|s| s.task < task);
        let hi = self.outgoing.partition_point(|s| s.task <= task);
        &self.outgoing[lo..hi]
    }

    /// Task unblocked by the record `(src -> dst)` arriving from `peer`.
    pub fn task_for_message(&self, peer: usize, src: CellId, dst: CellId) -> Option<usize> {
        self.recv_index.get(&(peer, src, dst)).copied()
    }

    /// Boundaries read through the incoming faces of `task`.
    pub fn boundary_inputs(&self, task: usize) -> &[BoundaryId] {
        &self.boundary_inputs[task]
    }

    /// Every boundary touched by any face (incoming or outgoing).
    pub fn boundary_ids(&self) -> BTreeSet<BoundaryId> {
        self.faces
            .iter()
            .flatten()
            .filter_map(|f| match f.neighbor {
                FaceNeighbor::Boundary(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Ranks this partition expects messages from.
    pub fn incoming_peers(&self) -> BTreeSet<usize> {
        self.incoming.iter().map(|d| d.peer).collect()
    }

    /// Ranks this partition sends messages to.
    pub fn outgoing_peers(&self) -> BTreeSet<usize> {
        self.outgoing.iter().map(|s| s.peer).collect()
    }

    /// Number of local edges.
    pub fn num_local_edges(&self) -> usize {
        self.predecessors.iter().map(Vec::len).sum()
    }
}

impl DebugInvariants for SweepGraph {
    const NAME: &'static str = "SweepGraph";

    /// Successors and predecessors agree, and every dependency count equals
    /// local predecessors plus remote dependencies.
    fn validate_invariants(&self) -> Result<(), SweepError> {
        let mut remote = vec![0usize; self.tasks.len()];
        for d in &self.incoming {
            remote[d.task] += 1;
        }
        for (t, task) in self.tasks.iter().enumerate() {
            for &s in &task.successors {
                if !self.predecessors[s].contains(&t) {
                    return Err(SweepError::degenerate(
                        self.global_ids[t],
                        format!("successor {s} does not list {t} as a predecessor"),
                    ));
                }
            }
            for &p in &self.predecessors[t] {
                if !self.tasks[p].successors.contains(&t) {
                    return Err(SweepError::degenerate(
                        self.global_ids[t],
                        format!("predecessor {p} does not list {t} as a successor"),
                    ));
                }
            }
            if task.num_dependencies != self.predecessors[t].len() + remote[t] {
                return Err(SweepError::degenerate(
                    self.global_ids[t],
                    "dependency count disagrees with recorded predecessors",
                ));
            }
        }
        Ok(())
    }
}

/// Builds [`SweepGraph`]s for a local partition.
pub struct TaskGraphBuilder<'m, M: SweepMesh + ?Sized> {
    mesh: &'m M,
}

impl<'m, M: SweepMesh + ?Sized> TaskGraphBuilder<'m, M> {
    pub fn new(mesh: &'m M) -> Self {
        Self { mesh }
    }

    /// Build the graph for `direction`.
    ///
    /// # Errors
    /// * [`SweepError::CellOutOfRange`]: a face names a local cell past the end.
    /// * [`SweepError::DegenerateGeometry`]: the local graph has a cycle, or
    ///   two faces map the same remote message onto one cell.
    pub fn build(&self, direction: Direction) -> Result<SweepGraph, SweepError> {
        let mesh = self.mesh;
        let n = mesh.num_local_cells();
        let rank = mesh.rank();
        let global_ids: Vec<CellId> = (0..n).map(|c| mesh.global_id(c)).collect();

        let mut tasks: TaskList = (0..n).map(CellTask::new).collect();
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut faces = Vec::with_capacity(n);
        let mut incoming = Vec::new();
        let mut outgoing = Vec::new();
        let mut recv_index = HashMap::new();
        let mut boundary_inputs = vec![Vec::new(); n];

        for a in 0..n {
            let mut cell_faces = Vec::with_capacity(mesh.faces(a).len());
            for (f, face) in mesh.faces(a).iter().enumerate() {
                let orientation = direction.classify(face.normal);
                cell_faces.push(GraphFace {
                    normal: face.normal,
                    neighbor: face.neighbor,
                    orientation,
                });
                match (face.neighbor, orientation) {
                    (FaceNeighbor::Local(b), FaceOrientation::Incoming) => {
                        if b >= n {
                            return Err(SweepError::CellOutOfRange { cell: b, num_cells: n });
                        }
                        if predecessors[a].contains(&b) {
                            continue;
                        }
                        predecessors[a].push(b);
                        tasks[b].successors.push(a);
                        tasks[a].num_dependencies += 1;
                    }
                    (FaceNeighbor::Ghost { rank: peer, cell }, FaceOrientation::Incoming) => {
                        if recv_index.insert((peer, cell, global_ids[a]), a).is_some() {
                            return Err(SweepError::degenerate(
                                global_ids[a],
                                format!("two faces expect the same message from cell {cell} on rank {peer}"),
                            ));
                        }
                        incoming.push(RemoteDependency { task: a, peer, src: cell });
                        tasks[a].num_dependencies += 1;
                    }
                    (FaceNeighbor::Ghost { rank: peer, cell }, FaceOrientation::Outgoing) => {
                        outgoing.push(RemoteSuccessor {
                            task: a,
                            face: f,
                            peer,
                            dst: cell,
                        });
                    }
                    (FaceNeighbor::Boundary(id), FaceOrientation::Incoming) => {
                        boundary_inputs[a].push(id);
                    }
                    _ => {}
                }
            }
            faces.push(cell_faces);
        }
        for inputs in &mut boundary_inputs {
            *inputs = inputs.iter().copied().sorted_unstable().dedup().collect();
        }

        let successors: Vec<&[usize]> = tasks.iter().map(|t| t.successors.as_slice()).collect();
        let scan_order = kahn_order(&successors, &predecessors)
            .map_err(|cell| SweepError::degenerate(global_ids[cell], "cycle in local sweep graph"))?;

        let graph = SweepGraph {
            direction,
            rank,
            tasks,
            predecessors,
            scan_order,
            global_ids,
            faces,
            incoming,
            outgoing,
            recv_index,
            boundary_inputs,
        };
        graph.debug_assert_invariants();
        log::debug!(
            "rank {rank}: sweep graph for direction {direction}: {} tasks, {} local edges, {} incoming / {} outgoing remote links",
            graph.num_tasks(),
            graph.num_local_edges(),
            graph.incoming.len(),
            graph.outgoing.len(),
        );
        Ok(graph)
    }
}

/// Convenience wrapper around [`TaskGraphBuilder::build`].
pub fn build_task_graph<M: SweepMesh + ?Sized>(
    mesh: &M,
    direction: Direction,
) -> Result<SweepGraph, SweepError> {
    TaskGraphBuilder::new(mesh).build(direction)
}

/// Kahn's algorithm over a dense graph given as successor and predecessor
/// lists. On a cycle, returns a node that lies on it.
pub(crate) fn kahn_order<S: AsRef<[usize]>>(
    successors: &[S],
    predecessors: &[Vec<usize>],
) -> Result<Vec<usize>, usize> {
    let n = successors.len();
    let mut in_deg: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = (0..n).filter(|&t| in_deg[t] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(t) = queue.pop_front() {
        order.push(t);
        for &s in successors[t].as_ref() {
            in_deg[s] -= 1;
            if in_deg[s] == 0 {
                queue.push_back(s);
            }
        }
    }
    if order.len() == n {
        return Ok(order);
    }
    // Every unprocessed task still has an unprocessed predecessor; walking
    // those backwards must revisit a task, and that task is on a cycle.
    let start = (0..n).find(|&t| in_deg[t] > 0).unwrap_or_default();
    let mut visited = vec![false; n];
    let mut cur = start;
    while !visited[cur] {
        visited[cur] = true;
        match predecessors[cur].iter().copied().find(|&p| in_deg[p] > 0) {
            Some(p) => cur = p,
            None => break,
        }
    }
    Err(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::mesh::LocalPartition;

    fn chain(n: usize) -> LocalPartition {
        let mut p = LocalPartition::new(0);
        for i in 0..n {
            p.add_cell(CellId::new(i as u64));
        }
        for i in 0..n {
            let left = if i == 0 {
                FaceNeighbor::Boundary(0)
            } else {
                FaceNeighbor::Local(i - 1)
            };
            let right = if i + 1 == n {
                FaceNeighbor::Boundary(1)
            } else {
                FaceNeighbor::Local(i + 1)
            };
            p.add_face(i, [-1.0, 0.0, 0.0], left).unwrap();
            p.add_face(i, [1.0, 0.0, 0.0], right).unwrap();
        }
        p
    }

    #[test]
    fn chain_left_to_right() {
        let g = build_task_graph(&chain(4), Direction::new([1.0, 0.0, 0.0])).unwrap();
        assert_eq!(g.scan_order(), &[0, 1, 2, 3]);
        assert_eq!(g.task(0).num_dependencies, 0);
        for i in 1..4 {
            assert_eq!(g.task(i).num_dependencies, 1);
            assert_eq!(g.predecessors(i), &[i - 1]);
            assert_eq!(g.task(i - 1).successors, vec![i]);
        }
        assert_eq!(g.boundary_inputs(0), &[0]);
        assert!(g.boundary_inputs(3).is_empty());
        assert_eq!(g.boundary_ids(), BTreeSet::from([0, 1]));
        assert_eq!(g.faces(0)[0].orientation, FaceOrientation::Incoming);
        assert_eq!(g.faces(0)[1].orientation, FaceOrientation::Outgoing);
    }

    #[test]
    fn chain_right_to_left_reverses_order() {
        let g = build_task_graph(&chain(4), Direction::new([-1.0, 0.0, 0.0])).unwrap();
        assert_eq!(g.scan_order(), &[3, 2, 1, 0]);
        assert_eq!(g.boundary_inputs(3), &[1]);
    }

    #[test]
    fn perpendicular_direction_has_no_edges() {
        let g = build_task_graph(&chain(3), Direction::new([0.0, 1.0, 0.0])).unwrap();
        assert_eq!(g.num_local_edges(), 0);
        assert_eq!(g.scan_order(), &[0, 1, 2]);
    }

    #[test]
    fn successors_and_predecessors_round_trip_on_grid() {
        let mesh = LocalPartition::grid_2d(5, 4, 0, |_, _| 0);
        for omega in [[1.0, 1.0, 0.0], [-1.0, 0.5, 0.0], [0.3, -1.0, 0.2]] {
            let g = build_task_graph(&mesh, Direction::new(omega)).unwrap();
            g.validate_invariants().unwrap();
            for t in 0..g.num_tasks() {
                for &s in &g.task(t).successors {
                    assert!(g.predecessors(s).contains(&t));
                }
            }
            // Scan order respects every edge.
            let pos: HashMap<usize, usize> =
                g.scan_order().iter().enumerate().map(|(i, &t)| (t, i)).collect();
            for t in 0..g.num_tasks() {
                for &p in g.predecessors(t) {
                    assert!(pos[&p] < pos[&t]);
                }
            }
        }
    }

    #[test]
    fn ghost_faces_become_remote_links() {
        let owner = |i: usize, _j: usize| usize::from(i >= 2);
        let mesh = LocalPartition::grid_2d(4, 1, 1, owner);
        let g = build_task_graph(&mesh, Direction::new([1.0, 0.0, 0.0])).unwrap();
        assert_eq!(
            g.incoming(),
            &[RemoteDependency {
                task: 0,
                peer: 0,
                src: CellId::new(1)
            }]
        );
        assert!(g.outgoing().is_empty());
        assert_eq!(g.task(0).num_dependencies, 1);
        assert_eq!(g.task_for_message(0, CellId::new(1), CellId::new(2)), Some(0));
        assert_eq!(g.task_for_message(0, CellId::new(1), CellId::new(3)), None);

        let mesh0 = LocalPartition::grid_2d(4, 1, 0, owner);
        let g0 = build_task_graph(&mesh0, Direction::new([1.0, 0.0, 0.0])).unwrap();
        assert_eq!(g0.outgoing().len(), 1);
        assert_eq!(g0.outgoing()[0].task, 1);
        assert_eq!(g0.outgoing()[0].dst, CellId::new(2));
        assert_eq!(g0.outgoing_peers(), BTreeSet::from([1]));
    }

    #[test]
    fn cyclic_adjacency_is_degenerate() {
        // Three cells whose normals all point "forward" into the previous
        // cell: 0 <- 1 <- 2 <- 0.
        let mut p = LocalPartition::new(0);
        for i in 0..3 {
            p.add_cell(CellId::new(i));
        }
        for i in 0..3usize {
            let prev = (i + 2) % 3;
            let next = (i + 1) % 3;
            p.add_face(i, [-1.0, 0.0, 0.0], FaceNeighbor::Local(prev)).unwrap();
            p.add_face(i, [0.0, 1.0, 0.0], FaceNeighbor::Local(next)).unwrap();
        }
        let err = build_task_graph(&p, Direction::new([1.0, 0.0, 0.0])).unwrap_err();
        match err {
            SweepError::DegenerateGeometry { cell: Some(c), .. } => assert!(c.get() < 3),
            other => panic!("expected DegenerateGeometry, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_neighbor() {
        let mut p = LocalPartition::new(0);
        p.add_cell(CellId::new(0));
        p.add_face(0, [-1.0, 0.0, 0.0], FaceNeighbor::Local(4)).unwrap();
        assert!(matches!(
            build_task_graph(&p, Direction::new([1.0, 0.0, 0.0])),
            Err(SweepError::CellOutOfRange { cell: 4, .. })
        ));
    }
}
