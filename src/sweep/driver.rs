//! Groupsets and the sweep driver.
//!
//! A groupset is a contiguous range of energy groups swept together by a
//! list of angle sets. The driver owns the groupsets, builds their angle
//! sets (sharing one [`SweepGraph`] per direction), and runs a sweep by
//! advancing every unfinished angle set of a groupset in FIFO order until
//! all report [`AngleSetStatus::Finished`].

use crate::algs::communicator::Communicator;
use crate::config::SweepOptions;
use crate::data::phi_layout::{PhiLayout, groupset_vector_from_primary, primary_from_groupset_vector};
use crate::sweep::angle_set::{AngleSet, AngleSetStatus};
use crate::sweep::boundary::BoundaryMap;
use crate::sweep::global_dag::validate_global;
use crate::sweep::graph::{SweepGraph, TaskGraphBuilder};
use crate::sweep::kernel::SweepChunk;
use crate::sweep_error::SweepError;
use crate::topology::direction::Direction;
use crate::topology::mesh::SweepMesh;
use std::collections::VecDeque;
use std::ops::{AddAssign, Range};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Directions swept together by one angle set.
#[derive(Clone, Debug, PartialEq)]
pub struct AngleSetSpec {
    /// Direction whose upwind topology all `directions` share.
    pub direction: Direction,
    /// Quadrature indices.
    pub directions: Vec<usize>,
}

impl AngleSetSpec {
    pub fn new(direction: Direction, directions: impl Into<Vec<usize>>) -> Self {
        Self {
            direction,
            directions: directions.into(),
        }
    }
}

pub struct Groupset<C: Communicator> {
    id: usize,
    groups: Range<usize>,
    angle_sets: Vec<AngleSet<C>>,
}

impl<C: Communicator> Groupset<C> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn groups(&self) -> Range<usize> {
        self.groups.clone()
    }

    pub fn angle_sets(&self) -> &[AngleSet<C>] {
        &self.angle_sets
    }
}

/// Work done by one or more sweeps.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Driver passes over the pending angle sets.
    pub passes: usize,
    pub tasks_executed: usize,
    pub messages_sent: usize,
    pub messages_received: usize,
    pub elapsed: Duration,
}

impl AddAssign for SweepStats {
    fn add_assign(&mut self, rhs: Self) {
        self.passes += rhs.passes;
        self.tasks_executed += rhs.tasks_executed;
        self.messages_sent += rhs.messages_sent;
        self.messages_received += rhs.messages_received;
        self.elapsed += rhs.elapsed;
    }
}

pub struct SweepDriver<C: Communicator> {
    options: SweepOptions,
    boundaries: BoundaryMap,
    groupsets: Vec<Groupset<C>>,
    graphs: Vec<Arc<SweepGraph>>,
    next_angle_set: usize,
    validation_round: u64,
}

impl<C: Communicator> SweepDriver<C> {
    pub fn new(options: SweepOptions, boundaries: BoundaryMap) -> Self {
        Self {
            options,
            boundaries,
            groupsets: Vec::new(),
            graphs: Vec::new(),
            next_angle_set: 0,
            validation_round: 0,
        }
    }

    pub fn options(&self) -> &SweepOptions {
        &self.options
    }

    pub fn boundaries(&self) -> &BoundaryMap {
        &self.boundaries
    }

    /// Next unused angle set id (and communicator tag offset).
    pub fn next_angle_set_id(&self) -> usize {
        self.next_angle_set
    }

    /// Register a groupset whose angle sets were built by the caller.
    pub fn add_groupset(
        &mut self,
        id: usize,
        groups: Range<usize>,
        angle_sets: Vec<AngleSet<C>>,
    ) -> Result<(), SweepError> {
        if self.groupsets.iter().any(|g| g.id == id) {
            return Err(SweepError::InvalidGroupsetState {
                groupset: id,
                angle_set: None,
            });
        }
        if let Some(max) = angle_sets.iter().map(AngleSet::id).max() {
            self.next_angle_set = self.next_angle_set.max(max + 1);
        }
        self.groupsets.push(Groupset {
            id,
            groups,
            angle_sets,
        });
        Ok(())
    }

    /// Build groupset `id` over `mesh`, one angle set per spec.
    ///
    /// Graphs are cached by direction across groupsets, so every call must
    /// pass the same mesh. With `validate_global_dag` on and more than one
    /// rank, each new graph is validated collectively: all ranks must build
    /// the same groupsets in the same order.
    pub fn build_groupset<M>(
        &mut self,
        id: usize,
        groups: Range<usize>,
        mesh: &M,
        comm: &C,
        specs: &[AngleSetSpec],
    ) -> Result<(), SweepError>
    where
        M: SweepMesh + ?Sized,
        C: Clone,
    {
        if self.groupsets.iter().any(|g| g.id == id) {
            return Err(SweepError::InvalidGroupsetState {
                groupset: id,
                angle_set: None,
            });
        }
        let builder = TaskGraphBuilder::new(mesh);
        let mut angle_sets = Vec::with_capacity(specs.len());
        for spec in specs {
            let graph = match self.graphs.iter().find(|g| g.direction() == spec.direction) {
                Some(g) => Arc::clone(g),
                None => {
                    let graph = Arc::new(builder.build(spec.direction)?);
                    if self.options.validate_global_dag && comm.size() > 1 {
                        validate_global(&graph, comm, self.validation_round)?;
                        self.validation_round += 1;
                    }
                    self.graphs.push(Arc::clone(&graph));
                    graph
                }
            };
            let angle_set = AngleSet::new(
                self.next_angle_set,
                graph,
                spec.directions.clone(),
                groups.clone(),
                comm.clone(),
                &self.boundaries,
                &self.options,
            )?;
            self.next_angle_set += 1;
            angle_sets.push(angle_set);
        }
        log::debug!(
            "groupset {id}: {} angle set(s) over groups {groups:?}",
            angle_sets.len()
        );
        self.groupsets.push(Groupset {
            id,
            groups,
            angle_sets,
        });
        Ok(())
    }

    pub fn groupsets(&self) -> &[Groupset<C>] {
        &self.groupsets
    }

    pub fn groupset(&self, id: usize) -> Result<&Groupset<C>, SweepError> {
        self.groupsets
            .iter()
            .find(|g| g.id == id)
            .ok_or(SweepError::InvalidGroupsetState {
                groupset: id,
                angle_set: None,
            })
    }

    fn groupset_mut(&mut self, id: usize) -> Result<&mut Groupset<C>, SweepError> {
        self.groupsets
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(SweepError::InvalidGroupsetState {
                groupset: id,
                angle_set: None,
            })
    }

    /// Angle set `angle_set` (by id) of groupset `groupset`.
    pub fn angle_set(&self, groupset: usize, angle_set: usize) -> Result<&AngleSet<C>, SweepError> {
        self.groupset(groupset)?
            .angle_sets
            .iter()
            .find(|a| a.id() == angle_set)
            .ok_or(SweepError::InvalidGroupsetState {
                groupset,
                angle_set: Some(angle_set),
            })
    }

    /// Sweep groupset `id` to completion, then reset it for the next
    /// iteration.
    ///
    /// # Errors
    /// Any angle-set failure, wrapped in [`SweepError::InAngleSet`]. The
    /// groupset is left as it failed; call [`SweepDriver::reset`] to
    /// abandon the sweep.
    pub fn sweep_groupset<K>(&mut self, id: usize, kernel: &mut K) -> Result<SweepStats, SweepError>
    where
        K: SweepChunk + ?Sized,
    {
        let progress_interval = self.options.progress_log_interval;
        let stall_warn = self.options.stall_warn_passes.max(1);
        let groupset = self.groupset_mut(id)?;
        let start = Instant::now();
        let before = totals(&groupset.angle_sets);

        let mut pending: VecDeque<usize> = (0..groupset.angle_sets.len()).collect();
        let mut passes = 0usize;
        let mut stalled = 0usize;
        let mut last = before;
        while !pending.is_empty() {
            passes += 1;
            for _ in 0..pending.len() {
                let Some(i) = pending.pop_front() else { break };
                let angle_set = &mut groupset.angle_sets[i];
                match angle_set.advance(kernel) {
                    Ok(AngleSetStatus::Finished) => {}
                    Ok(_) => pending.push_back(i),
                    Err(e) => {
                        let err = SweepError::InAngleSet {
                            angle_set: angle_set.id(),
                            direction: angle_set.direction(),
                            source: Box::new(e),
                        };
                        log::warn!("groupset {id}: {err}");
                        return Err(err);
                    }
                }
            }

            let now = totals(&groupset.angle_sets);
            if now == last && !pending.is_empty() {
                stalled += 1;
                if stalled % stall_warn == 0 {
                    log::warn!(
                        "groupset {id}: no progress for {stalled} passes, {} angle set(s) pending",
                        pending.len()
                    );
                } else {
                    log::trace!("groupset {id}: pass {passes} stalled");
                }
                std::thread::yield_now();
            } else {
                stalled = 0;
            }
            last = now;
            if progress_interval > 0 && passes % progress_interval == 0 {
                log::debug!(
                    "groupset {id}: pass {passes}, {} angle set(s) pending, {} tasks executed",
                    pending.len(),
                    now.tasks_executed - before.tasks_executed
                );
            }
        }

        let after = totals(&groupset.angle_sets);
        for angle_set in &mut groupset.angle_sets {
            angle_set.reset();
        }
        for gateway in self.boundaries.values() {
            gateway.reset_ready_status();
        }
        let stats = SweepStats {
            passes,
            tasks_executed: after.tasks_executed - before.tasks_executed,
            messages_sent: after.messages_sent - before.messages_sent,
            messages_received: after.messages_received - before.messages_received,
            elapsed: start.elapsed(),
        };
        log::debug!("groupset {id} swept: {stats:?}");
        Ok(stats)
    }

    /// Sweep every groupset in registration order.
    pub fn sweep_all<K>(&mut self, kernel: &mut K) -> Result<SweepStats, SweepError>
    where
        K: SweepChunk + ?Sized,
    {
        let ids: Vec<usize> = self.groupsets.iter().map(|g| g.id).collect();
        let mut total = SweepStats::default();
        for id in ids {
            total += self.sweep_groupset(id, kernel)?;
        }
        Ok(total)
    }

    /// Abandon any sweep in progress.
    pub fn reset(&mut self) {
        for groupset in &mut self.groupsets {
            for angle_set in &mut groupset.angle_sets {
                angle_set.reset();
            }
        }
        for gateway in self.boundaries.values() {
            gateway.reset_ready_status();
        }
    }

    /// Compact vector of groupset `id`'s groups taken from primary vector `y`.
    pub fn groupset_vector(&self, id: usize, layout: &PhiLayout, y: &[f64]) -> Result<Vec<f64>, SweepError> {
        let groups = self.groupset(id)?.groups();
        groupset_vector_from_primary(layout, id, groups, y)
    }

    /// Write compact vector `x` of groupset `id` back into primary vector `y`.
    pub fn scatter_groupset_vector(
        &self,
        id: usize,
        layout: &PhiLayout,
        x: &[f64],
        y: &mut [f64],
    ) -> Result<(), SweepError> {
        let groups = self.groupset(id)?.groups();
        primary_from_groupset_vector(layout, id, groups, x, y)
    }
}

fn totals<C: Communicator>(angle_sets: &[AngleSet<C>]) -> SweepStats {
    angle_sets.iter().fold(SweepStats::default(), |mut acc, a| {
        let s = a.stats();
        acc.tasks_executed += s.tasks_executed;
        acc.messages_sent += s.comm.messages_sent;
        acc.messages_received += s.comm.messages_received;
        acc
    })
}
