#![cfg_attr(docsrs, feature(doc_cfg))]
//! # sweep-sieve
//!
//! sweep-sieve schedules discrete-ordinates transport sweeps over a
//! partitioned mesh. For every sweep direction it builds the upwind
//! dependency graph of the local cells, executes ready cells against an
//! external compute kernel, and exchanges interface values with
//! neighboring ranks through non-blocking messages, so that the whole
//! sweep is driven by a cooperative, never-blocking state machine.
//!
//! ## Features
//! - Per-direction task graphs with local cycle detection and an optional
//!   collective cross-rank acyclicity / link-consistency check
//! - Angle sets driven step by step (`Receiving` / `NotFinished` / `Finished`)
//! - Pluggable communication backends: serial, in-process worlds for
//!   testing, and MPI (`mpi-support`)
//! - Boundary gateways (vacuum, isotropic, reflecting) with readiness gating
//! - Groupset vector assembly for iterative solvers
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! sweep-sieve = "0.1"
//! # features = ["mpi-support"]
//! ```
//!
//! A serial sweep over a small grid:
//!
//! ```
//! use std::sync::Arc;
//! use sweep_sieve::prelude::*;
//!
//! let mesh = LocalPartition::grid_2d(4, 4, 0, |_, _| 0);
//! let boundaries: BoundaryMap = (0..4)
//!     .map(|id| (id, Arc::new(VacuumBoundary) as Arc<dyn BoundaryGateway>))
//!     .collect();
//! let mut driver = SweepDriver::new(SweepOptions::default(), boundaries);
//! let spec = AngleSetSpec::new(Direction::new([1.0, 1.0, 0.0]), [0]);
//! driver.build_groupset(0, 0..1, &mesh, &NoComm, &[spec])?;
//!
//! let mut swept = 0;
//! let stats = driver.sweep_groupset(0, &mut |_ctx: &mut SweepContext<'_>| -> Result<(), SweepError> {
//!     swept += 1;
//!     Ok(())
//! })?;
//! assert_eq!((swept, stats.tasks_executed), (16, 16));
//! # Ok::<(), SweepError>(())
//! ```

pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod sweep;
pub mod sweep_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm, Request};
    pub use crate::config::{BoundaryGating, SweepOptions};
    pub use crate::data::phi_layout::PhiLayout;
    pub use crate::sweep::angle_set::{AngleSet, AngleSetStatus};
    pub use crate::sweep::boundary::{
        BoundaryGateway, BoundaryMap, FaceNode, IsotropicBoundary, ReflectingBoundary,
        VacuumBoundary,
    };
    pub use crate::sweep::driver::{AngleSetSpec, SweepDriver, SweepStats};
    pub use crate::sweep::graph::{SweepGraph, TaskGraphBuilder, build_task_graph};
    pub use crate::sweep::kernel::{SweepChunk, SweepContext};
    pub use crate::sweep_error::SweepError;
    pub use crate::topology::cell::CellId;
    pub use crate::topology::direction::{Direction, FaceOrientation};
    pub use crate::topology::mesh::{BoundaryId, CellFace, FaceNeighbor, LocalPartition, SweepMesh};
}
