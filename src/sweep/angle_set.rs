//! Angle set: a group of directions sharing one task graph, driven as a
//! cooperative state machine.
//!
//! [`AngleSet::advance`] is a non-blocking step function. Each call
//!
//! 1. returns `Finished` straight away once the set has completed;
//! 2. checks the boundary gateways the set touches and bails out with
//!    `Receiving` (no side effects) if one of them is not ready;
//! 3. lazily instantiates the task list from the graph template;
//! 4. scans the tasks once in topological order, running the kernel on
//!    every ready task and releasing its local successors;
//! 5. posts staged remote data and progresses in-flight sends;
//! 6. drains arrived messages, releasing the tasks they feed;
//! 7. reports `Finished` when every task ran and every send completed,
//!    `NotFinished` otherwise.
//!
//! Callers loop on `Receiving` / `NotFinished`; any `Err` is fatal for the
//! sweep. [`AngleSet::reset`] prepares the set for the next iteration.

use crate::algs::communicator::{CommTag, Communicator};
use crate::config::{BoundaryGating, SweepOptions};
use crate::sweep::async_comm::{AsyncCommunicator, CommStats};
use crate::sweep::boundary::{BoundaryMap, FaceNode, psi_boundary};
use crate::sweep::fluds::FluxStore;
use crate::sweep::graph::SweepGraph;
use crate::sweep::kernel::{SweepChunk, SweepContext};
use crate::sweep::task::TaskList;
use crate::sweep_error::SweepError;
use crate::topology::direction::Direction;
use crate::topology::mesh::BoundaryId;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

/// Progress reported by [`AngleSet::advance`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AngleSetStatus {
    /// Waiting on a boundary gateway; nothing could run.
    Receiving,
    /// Made (or awaits) progress; call again.
    NotFinished,
    /// All tasks ran and all sends completed.
    Finished,
}

/// Cumulative counters of one angle set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AngleSetStats {
    /// Calls to `advance` that got past the gateway check.
    pub passes: usize,
    pub tasks_executed: usize,
    pub comm: CommStats,
}

pub struct AngleSet<C: Communicator> {
    id: usize,
    graph: Arc<SweepGraph>,
    directions: Vec<usize>,
    groups: Range<usize>,
    tasks: Option<TaskList>,
    num_completed: usize,
    comm: AsyncCommunicator<C>,
    store: FluxStore,
    boundaries: BoundaryMap,
    gating: BoundaryGating,
    surface_source_active: bool,
    executed: bool,
    passes: usize,
    tasks_executed: usize,
}

impl<C: Communicator> AngleSet<C> {
    /// Create angle set `id` over `graph`.
    ///
    /// Only the gateways of boundaries the graph touches are kept.
    ///
    /// # Errors
    /// [`SweepError::UnknownBoundary`] if a touched boundary has no gateway
    /// in `boundaries`; [`SweepError::TagExhausted`] if `base_tag + id` runs
    /// into the reserved tags.
    pub fn new(
        id: usize,
        graph: Arc<SweepGraph>,
        directions: Vec<usize>,
        groups: Range<usize>,
        comm: C,
        boundaries: &BoundaryMap,
        options: &SweepOptions,
    ) -> Result<Self, SweepError> {
        let mut touched = BoundaryMap::new();
        for id in graph.boundary_ids() {
            let gateway = boundaries.get(&id).ok_or(SweepError::UnknownBoundary(id))?;
            touched.insert(id, Arc::clone(gateway));
        }
        let tag = CommTag::new(options.base_tag)
            .checked_offset(id)
            .ok_or(SweepError::TagExhausted {
                angle_set: id,
                base_tag: options.base_tag,
                reserved: CommTag::GRAPH_VALIDATION.base(),
            })?;
        let comm = AsyncCommunicator::new(comm, Arc::clone(&graph), tag, options.max_message_bytes);
        Ok(Self {
            id,
            graph,
            directions,
            groups,
            tasks: None,
            num_completed: 0,
            comm,
            store: FluxStore::new(),
            boundaries: touched,
            gating: options.boundary_gating,
            surface_source_active: options.surface_source_active,
            executed: false,
            passes: 0,
            tasks_executed: 0,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.graph.direction()
    }

    pub fn directions(&self) -> &[usize] {
        &self.directions
    }

    pub fn groups(&self) -> Range<usize> {
        self.groups.clone()
    }

    pub fn graph(&self) -> &Arc<SweepGraph> {
        &self.graph
    }

    /// Gateways this angle set touches.
    pub fn boundaries(&self) -> &BoundaryMap {
        &self.boundaries
    }

    /// Current task list; `None` before the first pass and after a reset.
    pub fn task_list(&self) -> Option<&TaskList> {
        self.tasks.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.executed
    }

    pub fn stats(&self) -> AngleSetStats {
        AngleSetStats {
            passes: self.passes,
            tasks_executed: self.tasks_executed,
            comm: self.comm.stats(),
        }
    }

    /// Run one non-blocking step. See the module docs.
    pub fn advance<K>(&mut self, kernel: &mut K) -> Result<AngleSetStatus, SweepError>
    where
        K: SweepChunk + ?Sized,
    {
        if self.executed {
            return Ok(AngleSetStatus::Finished);
        }

        let blocked: BTreeSet<BoundaryId> = self
            .boundaries
            .iter()
            .filter(|(_, gw)| !gw.is_ready(&self.directions, self.groups.clone()))
            .map(|(&id, _)| id)
            .collect();
        if !blocked.is_empty() && self.gating == BoundaryGating::AngleSet {
            log::trace!("angle set {}: waiting on boundaries {blocked:?}", self.id);
            return Ok(AngleSetStatus::Receiving);
        }

        let graph = Arc::clone(&self.graph);
        let tasks = self.tasks.get_or_insert_with(|| graph.task_list());
        self.passes += 1;

        let mut executed_now = 0usize;
        let mut held_back = false;
        for &t in graph.scan_order() {
            if !tasks[t].is_ready() {
                continue;
            }
            if !blocked.is_empty() && graph.boundary_inputs(t).iter().any(|b| blocked.contains(b)) {
                held_back = true;
                continue;
            }
            debug_assert_eq!(
                tasks[t].num_dependencies, 0,
                "task {t} executed with outstanding dependencies"
            );

            let mut ctx = SweepContext {
                graph: &graph,
                cell: tasks[t].reference_id,
                angle_set_id: self.id,
                directions: &self.directions,
                groups: self.groups.clone(),
                store: &mut self.store,
                outbox: self.comm.outbox_mut(),
                boundaries: &self.boundaries,
                surface_source_active: self.surface_source_active,
                remote_written: Vec::new(),
            };
            kernel.sweep(&mut ctx)?;
            let written = ctx.remote_written;

            // Every remote successor gets a record, even if the kernel had
            // nothing to say, or the neighbor would wait forever.
            for link in graph.remote_successors(t) {
                if !written.contains(&link.face) {
                    self.comm.queue(link.peer, graph.global_id(t), link.dst, Vec::new());
                }
            }
            for &s in &graph.task(t).successors {
                release(tasks, s, &graph)?;
            }
            tasks[t].completed = true;
            self.num_completed += 1;
            executed_now += 1;
        }
        self.tasks_executed += executed_now;
        let all_completed = self.num_completed == tasks.len();

        let sends_done = self.comm.send_data()?;
        for t in self.comm.receive_data(&mut self.store)? {
            release(tasks, t, &graph)?;
        }

        if all_completed && sends_done {
            self.executed = true;
            for gw in self.boundaries.values() {
                gw.mark_outgoing_complete(&self.directions, self.groups.clone());
            }
            log::debug!(
                "angle set {} finished: {} tasks over {} passes",
                self.id,
                self.num_completed,
                self.passes
            );
            return Ok(AngleSetStatus::Finished);
        }
        log::trace!(
            "angle set {}: pass {} ran {executed_now} task(s), {}/{} complete",
            self.id,
            self.passes,
            self.num_completed,
            tasks.len()
        );
        if executed_now == 0 && held_back {
            return Ok(AngleSetStatus::Receiving);
        }
        Ok(AngleSetStatus::NotFinished)
    }

    /// Abandon or conclude the current sweep and prepare the next one.
    pub fn reset(&mut self) {
        self.tasks = None;
        self.num_completed = 0;
        self.comm.reset();
        self.store.clear();
        self.executed = false;
    }

    /// Incoming value of `boundary` as the kernel would see it.
    pub fn psi_boundary(
        &self,
        boundary: BoundaryId,
        at: FaceNode,
        direction: usize,
        group: usize,
    ) -> Result<f64, SweepError> {
        let gw = self
            .boundaries
            .get(&boundary)
            .ok_or(SweepError::UnknownBoundary(boundary))?;
        Ok(psi_boundary(
            gw.as_ref(),
            at,
            direction,
            group,
            self.surface_source_active,
        ))
    }

    /// Write an outgoing value through the gateway of `boundary`.
    pub fn set_reflecting_outgoing(
        &self,
        boundary: BoundaryId,
        at: FaceNode,
        direction: usize,
        group: usize,
        value: f64,
    ) -> Result<(), SweepError> {
        let gw = self
            .boundaries
            .get(&boundary)
            .ok_or(SweepError::UnknownBoundary(boundary))?;
        gw.set_outgoing_value(at, direction, group, value);
        Ok(())
    }
}

/// Satisfy one dependency of task `t`.
fn release(tasks: &mut TaskList, t: usize, graph: &SweepGraph) -> Result<(), SweepError> {
    let task = &mut tasks[t];
    task.num_dependencies = task.num_dependencies.checked_sub(1).ok_or_else(|| {
        SweepError::degenerate(
            graph.global_id(t),
            "dependency released more often than it was recorded",
        )
    })?;
    Ok(())
}
