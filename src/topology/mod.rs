//! Mesh-side abstractions the sweep is built on.
//!
//! - [`cell::CellId`]: global cell identifiers
//! - [`direction::Direction`]: sweep directions and the upwind face test
//! - [`mesh::SweepMesh`]: the partition a rank sweeps, with
//!   [`mesh::LocalPartition`] as the in-memory implementation

pub mod cell;
pub mod direction;
pub mod mesh;

pub use cell::CellId;
pub use direction::{Direction, FaceOrientation};
pub use mesh::{BoundaryId, CellFace, FaceNeighbor, LocalPartition, SweepMesh};
