//! Sweep scheduling: task graphs, angle sets and the driver.
//!
//! Bottom-up: [`graph`] turns a mesh partition and a direction into a
//! [`graph::SweepGraph`]; [`angle_set::AngleSet`] executes one graph for a
//! set of directions against a [`kernel::SweepChunk`], moving interface data
//! through [`fluds::FluxStore`] locally and [`async_comm::AsyncCommunicator`]
//! across ranks; [`driver::SweepDriver`] runs the angle sets of each
//! groupset to completion.

pub mod angle_set;
pub mod async_comm;
pub mod boundary;
pub mod driver;
pub mod fluds;
pub mod global_dag;
pub mod graph;
pub mod kernel;
pub mod task;

pub use angle_set::{AngleSet, AngleSetStats, AngleSetStatus};
pub use driver::{AngleSetSpec, Groupset, SweepDriver, SweepStats};
pub use graph::{SweepGraph, TaskGraphBuilder, build_task_graph};
