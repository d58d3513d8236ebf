//! SweepError: unified error type for sweep-sieve public APIs
//!
//! Every fallible operation in the crate returns `Result<_, SweepError>`.
//! The caller-facing API keeps transient progress states (see
//! [`AngleSetStatus`](crate::sweep::angle_set::AngleSetStatus)) out of this
//! type: anything surfaced here is fatal for the current sweep.

use crate::topology::cell::CellId;
use crate::topology::direction::Direction;
use crate::topology::mesh::BoundaryId;
use thiserror::Error;

/// Unified error type for sweep-sieve operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SweepError {
    /// Task-graph construction found a cycle or an inconsistent adjacency.
    #[error("Degenerate geometry{}: {reason}", fmt_cell(.cell))]
    DegenerateGeometry {
        cell: Option<CellId>,
        reason: String,
    },
    /// The communication substrate failed, or delivered something that
    /// cannot belong to this sweep.
    #[error("Transport failure with peer rank {peer}: {reason}")]
    TransportFailure { peer: usize, reason: String },
    /// A groupset / angle-set combination that was never constructed.
    #[error("Invalid groupset state: groupset {groupset}{}", fmt_angle_set(.angle_set))]
    InvalidGroupsetState {
        groupset: usize,
        angle_set: Option<usize>,
    },
    /// The external compute kernel reported a failure.
    #[error("Kernel failure on local cell {cell}: {reason}")]
    KernelFailure { cell: usize, reason: String },
    /// The kernel addressed a face value that does not exist for the active direction.
    #[error("Invalid face access on local cell {cell}, face {face}: {reason}")]
    InvalidFaceAccess {
        cell: usize,
        face: usize,
        reason: &'static str,
    },
    /// A local cell index outside the partition.
    #[error("Local cell {cell} out of range (partition has {num_cells} cells)")]
    CellOutOfRange { cell: usize, num_cells: usize },
    /// A mesh face references a boundary without a registered gateway.
    #[error("No boundary gateway registered for boundary id {0}")]
    UnknownBoundary(BoundaryId),
    /// An angle set id has no free message tag below the reserved range.
    #[error("No message tag for angle set {angle_set}: base tag {base_tag:#x} + id reaches the reserved tag {reserved:#x}")]
    TagExhausted {
        angle_set: usize,
        base_tag: u16,
        reserved: u16,
    },
    /// Vector assembly was handed a buffer of the wrong size.
    #[error("Layout mismatch: expected length {expected}, found {found}")]
    LayoutMismatch { expected: usize, found: usize },
    /// Diagnostic wrapper added by the sweep driver when it aborts.
    #[error("Angle set {angle_set} (direction {direction}) aborted: {source}")]
    InAngleSet {
        angle_set: usize,
        direction: Direction,
        #[source]
        source: Box<SweepError>,
    },
}

impl SweepError {
    /// Shorthand for a geometry error tied to a cell.
    pub fn degenerate(cell: impl Into<Option<CellId>>, reason: impl Into<String>) -> Self {
        SweepError::DegenerateGeometry {
            cell: cell.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a transport error with a peer.
    pub fn transport(peer: usize, reason: impl Into<String>) -> Self {
        SweepError::TransportFailure {
            peer,
            reason: reason.into(),
        }
    }

    /// Strip any [`SweepError::InAngleSet`] wrappers.
    pub fn root_cause(&self) -> &SweepError {
        match self {
            SweepError::InAngleSet { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn fmt_cell(cell: &Option<CellId>) -> String {
    cell.map(|c| format!(" at cell {c}")).unwrap_or_default()
}

fn fmt_angle_set(angle_set: &Option<usize>) -> String {
    angle_set
        .map(|a| format!(", angle set {a}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = SweepError::degenerate(CellId::new(7), "cycle");
        assert_eq!(e.to_string(), "Degenerate geometry at cell 7: cycle");
        let e = SweepError::degenerate(None, "cycle");
        assert_eq!(e.to_string(), "Degenerate geometry: cycle");
        let e = SweepError::InvalidGroupsetState {
            groupset: 2,
            angle_set: Some(5),
        };
        assert_eq!(e.to_string(), "Invalid groupset state: groupset 2, angle set 5");
    }

    #[test]
    fn root_cause_unwraps_nested_context() {
        let inner = SweepError::transport(3, "lost");
        let wrapped = SweepError::InAngleSet {
            angle_set: 1,
            direction: Direction::new([1.0, 0.0, 0.0]),
            source: Box::new(inner.clone()),
        };
        assert_eq!(wrapped.root_cause(), &inner);
        assert!(wrapped.to_string().contains("Angle set 1"));
    }
}
