//! Mesh/partition provider contract consumed by the sweep scheduler.
//!
//! The scheduler never generates or partitions meshes. It only needs, per
//! local cell: a global id and a list of faces, each with an outward normal
//! and a neighbor that is either another local cell, a ghost cell owned by
//! a different rank, or a domain boundary.
//!
//! [`LocalPartition`] is the in-memory implementation used by front-ends
//! that already hold their partition in memory, and by the test-suite.

use crate::debug_invariants::DebugInvariants;
use crate::sweep_error::SweepError;
use crate::topology::cell::CellId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Identifier of a domain boundary (one gateway per id).
pub type BoundaryId = u64;

/// What lies on the other side of a cell face.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaceNeighbor {
    /// Another cell of this partition, by local index.
    Local(usize),
    /// A cell owned by `rank`.
    Ghost { rank: usize, cell: CellId },
    /// A domain boundary.
    Boundary(BoundaryId),
}

/// One face of a local cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellFace {
    /// Outward normal (need not be unit length).
    pub normal: [f64; 3],
    pub neighbor: FaceNeighbor,
}

impl CellFace {
    pub fn new(normal: [f64; 3], neighbor: FaceNeighbor) -> Self {
        Self { normal, neighbor }
    }
}

/// Read-only view of the local partition of a mesh.
pub trait SweepMesh {
    /// Rank owning this partition.
    fn rank(&self) -> usize;

    /// Number of local cells; local indices are `0..num_local_cells()`.
    fn num_local_cells(&self) -> usize;

    /// Global id of a local cell.
    fn global_id(&self, cell: usize) -> CellId;

    /// Faces of a local cell, in a stable order.
    fn faces(&self, cell: usize) -> &[CellFace];

    /// All boundary ids referenced by local faces.
    fn boundary_ids(&self) -> BTreeSet<BoundaryId> {
        (0..self.num_local_cells())
            .flat_map(|c| self.faces(c).iter())
            .filter_map(|f| match f.neighbor {
                FaceNeighbor::Boundary(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// All ranks owning ghost neighbors of this partition.
    fn neighbor_ranks(&self) -> BTreeSet<usize> {
        (0..self.num_local_cells())
            .flat_map(|c| self.faces(c).iter())
            .filter_map(|f| match f.neighbor {
                FaceNeighbor::Ghost { rank, .. } => Some(rank),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LocalCell {
    global: CellId,
    faces: Vec<CellFace>,
}

/// In-memory partition: a list of local cells with their faces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalPartition {
    rank: usize,
    cells: Vec<LocalCell>,
}

impl LocalPartition {
    /// Empty partition owned by `rank`.
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            cells: Vec::new(),
        }
    }

    /// Append a cell and return its local index.
    pub fn add_cell(&mut self, global: CellId) -> usize {
        self.cells.push(LocalCell {
            global,
            faces: Vec::new(),
        });
        self.cells.len() - 1
    }

    /// Append a face to local cell `cell`.
    pub fn add_face(
        &mut self,
        cell: usize,
        normal: [f64; 3],
        neighbor: FaceNeighbor,
    ) -> Result<(), SweepError> {
        let num_cells = self.cells.len();
        let slot = self
            .cells
            .get_mut(cell)
            .ok_or(SweepError::CellOutOfRange { cell, num_cells })?;
        slot.faces.push(CellFace::new(normal, neighbor));
        Ok(())
    }

    /// Structured 2-D grid of `nx * ny` unit squares, row-major global ids
    /// `i + nx * j`, keeping only the cells for which `owner(i, j) == rank`.
    ///
    /// Boundary ids: 0 = x-min, 1 = x-max, 2 = y-min, 3 = y-max.
    pub fn grid_2d<F>(nx: usize, ny: usize, rank: usize, owner: F) -> Self
    where
        F: Fn(usize, usize) -> usize,
    {
        let mut part = LocalPartition::new(rank);
        let mut local_of = vec![None; nx * ny];
        for j in 0..ny {
            for i in 0..nx {
                if owner(i, j) == rank {
                    let g = i + nx * j;
                    local_of[g] = Some(part.add_cell(CellId::new(g as u64)));
                }
            }
        }
        let neighbor = |i: isize, j: isize, bid: BoundaryId| -> FaceNeighbor {
            if i < 0 || j < 0 || i >= nx as isize || j >= ny as isize {
                return FaceNeighbor::Boundary(bid);
            }
            let (i, j) = (i as usize, j as usize);
            let g = i + nx * j;
            match local_of[g] {
                Some(l) => FaceNeighbor::Local(l),
                None => FaceNeighbor::Ghost {
                    rank: owner(i, j),
                    cell: CellId::new(g as u64),
                },
            }
        };
        for j in 0..ny {
            for i in 0..nx {
                let Some(local) = local_of[i + nx * j] else {
                    continue;
                };
                let (ii, jj) = (i as isize, j as isize);
                let faces = [
                    ([-1.0, 0.0, 0.0], neighbor(ii - 1, jj, 0)),
                    ([1.0, 0.0, 0.0], neighbor(ii + 1, jj, 1)),
                    ([0.0, -1.0, 0.0], neighbor(ii, jj - 1, 2)),
                    ([0.0, 1.0, 0.0], neighbor(ii, jj + 1, 3)),
                ];
                part.cells[local].faces.extend(
                    faces
                        .into_iter()
                        .map(|(normal, nb)| CellFace::new(normal, nb)),
                );
            }
        }
        part
    }

    /// Check the adjacency the scheduler relies on.
    ///
    /// # Errors
    /// * [`SweepError::CellOutOfRange`] for a local neighbor index past the end.
    /// * [`SweepError::DegenerateGeometry`] for self faces, repeated
    ///   neighbors, ghosts owned by this rank, zero normals, or a local
    ///   neighbor without the reciprocal face.
    pub fn validate(&self) -> Result<(), SweepError> {
        let num_cells = self.cells.len();
        for (c, cell) in self.cells.iter().enumerate() {
            let mut seen = HashSet::new();
            for face in &cell.faces {
                if face.normal.iter().all(|x| *x == 0.0) {
                    return Err(SweepError::degenerate(cell.global, "zero face normal"));
                }
                match face.neighbor {
                    FaceNeighbor::Local(n) => {
                        if n >= num_cells {
                            return Err(SweepError::CellOutOfRange { cell: n, num_cells });
                        }
                        if n == c {
                            return Err(SweepError::degenerate(cell.global, "cell is its own neighbor"));
                        }
                        let reciprocal = self.cells[n]
                            .faces
                            .iter()
                            .any(|f| f.neighbor == FaceNeighbor::Local(c));
                        if !reciprocal {
                            return Err(SweepError::degenerate(
                                cell.global,
                                format!("neighbor {} has no reciprocal face", self.cells[n].global),
                            ));
                        }
                    }
                    FaceNeighbor::Ghost { rank, .. } if rank == self.rank => {
                        return Err(SweepError::degenerate(
                            cell.global,
                            "ghost neighbor owned by the local rank",
                        ));
                    }
                    FaceNeighbor::Ghost { .. } | FaceNeighbor::Boundary(_) => {}
                }
                if !matches!(face.neighbor, FaceNeighbor::Boundary(_)) && !seen.insert(face.neighbor) {
                    return Err(SweepError::degenerate(
                        cell.global,
                        "two faces share the same neighbor cell",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl SweepMesh for LocalPartition {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_local_cells(&self) -> usize {
        self.cells.len()
    }

    fn global_id(&self, cell: usize) -> CellId {
        self.cells[cell].global
    }

    fn faces(&self, cell: usize) -> &[CellFace] {
        &self.cells[cell].faces
    }
}

impl DebugInvariants for LocalPartition {
    const NAME: &'static str = "LocalPartition";

    fn validate_invariants(&self) -> Result<(), SweepError> {
        self.validate()
    }
}
