//! Compute-kernel interface.
//!
//! The scheduler decides *when* a cell is swept; a [`SweepChunk`] decides
//! *what* sweeping it means. For every ready cell the angle set hands the
//! kernel a [`SweepContext`] through which it reads upwind interface values
//! (from local cells, remote cells or boundaries) and publishes its
//! downwind ones. The payload layout is the kernel's business; the
//! scheduler only moves `f64` slices around.

use crate::algs::wire::FluxRecord;
use crate::sweep::async_comm::Outbox;
use crate::sweep::boundary::{BoundaryMap, FaceNode, psi_boundary};
use crate::sweep::fluds::FluxStore;
use crate::sweep::graph::{GraphFace, SweepGraph};
use crate::sweep_error::SweepError;
use crate::topology::cell::CellId;
use crate::topology::direction::{Direction, FaceOrientation};
use crate::topology::mesh::FaceNeighbor;
use std::ops::Range;

/// Per-cell sweep computation.
pub trait SweepChunk {
    fn sweep(&mut self, ctx: &mut SweepContext<'_>) -> Result<(), SweepError>;
}

impl<F> SweepChunk for F
where
    F: FnMut(&mut SweepContext<'_>) -> Result<(), SweepError>,
{
    fn sweep(&mut self, ctx: &mut SweepContext<'_>) -> Result<(), SweepError> {
        self(ctx)
    }
}

/// Everything a kernel may touch while sweeping one cell.
pub struct SweepContext<'a> {
    pub(crate) graph: &'a SweepGraph,
    pub(crate) cell: usize,
    pub(crate) angle_set_id: usize,
    pub(crate) directions: &'a [usize],
    pub(crate) groups: Range<usize>,
    pub(crate) store: &'a mut FluxStore,
    pub(crate) outbox: &'a mut Outbox,
    pub(crate) boundaries: &'a BoundaryMap,
    pub(crate) surface_source_active: bool,
    pub(crate) remote_written: Vec<usize>,
}

impl<'a> SweepContext<'a> {
    /// Local index of the cell being swept.
    pub fn cell(&self) -> usize {
        self.cell
    }

    pub fn global_id(&self) -> CellId {
        self.graph.global_id(self.cell)
    }

    pub fn angle_set_id(&self) -> usize {
        self.angle_set_id
    }

    /// Quadrature indices of the directions in this angle set.
    pub fn directions(&self) -> &[usize] {
        self.directions
    }

    pub fn groups(&self) -> Range<usize> {
        self.groups.clone()
    }

    /// Representative direction whose graph drives this angle set.
    pub fn direction(&self) -> Direction {
        self.graph.direction()
    }

    pub fn faces(&self) -> &[GraphFace] {
        self.graph.faces(self.cell)
    }

    /// Build a [`SweepError::KernelFailure`] for the current cell.
    pub fn fail(&self, reason: impl Into<String>) -> SweepError {
        SweepError::KernelFailure {
            cell: self.cell,
            reason: reason.into(),
        }
    }

    fn face(&self, face: usize) -> Result<&'a GraphFace, SweepError> {
        let graph: &'a SweepGraph = self.graph;
        graph
            .faces(self.cell)
            .get(face)
            .ok_or(SweepError::InvalidFaceAccess {
                cell: self.cell,
                face,
                reason: "no such face",
            })
    }

    fn oriented(&self, face: usize, want: FaceOrientation) -> Result<&'a GraphFace, SweepError> {
        let f = self.face(face)?;
        if f.orientation != want {
            return Err(SweepError::InvalidFaceAccess {
                cell: self.cell,
                face,
                reason: match want {
                    FaceOrientation::Incoming => "face is not incoming for this direction",
                    _ => "face is not outgoing for this direction",
                },
            });
        }
        Ok(f)
    }

    /// Values the upwind neighbor across incoming `face` produced. Empty if
    /// it wrote none.
    pub fn upwind_values(&self, face: usize) -> Result<&[f64], SweepError> {
        let f = self.oriented(face, FaceOrientation::Incoming)?;
        let values = match f.neighbor {
            FaceNeighbor::Local(b) => self.store.local(b, self.cell),
            FaceNeighbor::Ghost { cell, .. } => self.store.received(cell, self.cell),
            FaceNeighbor::Boundary(_) => {
                return Err(SweepError::InvalidFaceAccess {
                    cell: self.cell,
                    face,
                    reason: "boundary faces are read with boundary_value",
                });
            }
        };
        Ok(values.unwrap_or(&[]))
    }

    /// Incoming angular flux at a node of boundary face `face`.
    pub fn boundary_value(
        &self,
        face: usize,
        node: usize,
        direction: usize,
        group: usize,
    ) -> Result<f64, SweepError> {
        let f = self.oriented(face, FaceOrientation::Incoming)?;
        let FaceNeighbor::Boundary(id) = f.neighbor else {
            return Err(SweepError::InvalidFaceAccess {
                cell: self.cell,
                face,
                reason: "face is not on a boundary",
            });
        };
        let gateway = self
            .boundaries
            .get(&id)
            .ok_or(SweepError::UnknownBoundary(id))?;
        Ok(psi_boundary(
            gateway.as_ref(),
            FaceNode::new(self.cell, face, node),
            direction,
            group,
            self.surface_source_active,
        ))
    }

    /// Publish the interface values for the downwind neighbor across
    /// outgoing `face`. Remote neighbors receive them in the next send.
    pub fn set_downwind_values(&mut self, face: usize, values: Vec<f64>) -> Result<(), SweepError> {
        let f = self.oriented(face, FaceOrientation::Outgoing)?;
        match f.neighbor {
            FaceNeighbor::Local(b) => self.store.store_local(self.cell, b, values),
            FaceNeighbor::Ghost { rank, cell } => {
                if self.remote_written.contains(&face) {
                    return Err(SweepError::InvalidFaceAccess {
                        cell: self.cell,
                        face,
                        reason: "downwind values already sent",
                    });
                }
                let src = self.global_id();
                self.outbox.stage(
                    rank,
                    FluxRecord {
                        src,
                        dst: cell,
                        values,
                    },
                );
                self.remote_written.push(face);
            }
            FaceNeighbor::Boundary(_) => {
                return Err(SweepError::InvalidFaceAccess {
                    cell: self.cell,
                    face,
                    reason: "boundary faces are written with set_boundary_outgoing",
                });
            }
        }
        Ok(())
    }

    /// Write the outgoing angular flux at a node of boundary face `face`.
    pub fn set_boundary_outgoing(
        &self,
        face: usize,
        node: usize,
        direction: usize,
        group: usize,
        value: f64,
    ) -> Result<(), SweepError> {
        let f = self.oriented(face, FaceOrientation::Outgoing)?;
        let FaceNeighbor::Boundary(id) = f.neighbor else {
            return Err(SweepError::InvalidFaceAccess {
                cell: self.cell,
                face,
                reason: "face is not on a boundary",
            });
        };
        let gateway = self
            .boundaries
            .get(&id)
            .ok_or(SweepError::UnknownBoundary(id))?;
        gateway.set_outgoing_value(FaceNode::new(self.cell, face, node), direction, group, value);
        Ok(())
    }
}
