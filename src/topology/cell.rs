//! `CellId`: a strong, zero-cost handle for global mesh cells
//!
//! Local cells are addressed by plain `usize` indices into a partition.
//! Anything that crosses a rank boundary (ghost adjacency, message
//! records, global validation) uses the partition-independent `CellId`.

use std::fmt;

/// Global identifier of a mesh cell, unique across all ranks.
///
/// # Memory layout
/// This type is `repr(transparent)` over `u64`, so it can travel on the
/// wire (and through MPI) exactly like a `u64`.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct CellId(u64);

impl CellId {
    /// Wrap a raw global id.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        CellId(raw)
    }

    /// Returns the inner `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for CellId {
    fn from(raw: u64) -> Self {
        CellId(raw)
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CellId").field(&self.0).finish()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `CellId` can be sent over MPI as a `u64`.
#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for CellId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;

    fn equivalent_datatype() -> Self::Out {
        u64::equivalent_datatype()
    }
}

#[cfg(test)]
mod abi_tests {
    use super::*;
    use static_assertions::{assert_eq_align, assert_eq_size};

    assert_eq_size!(CellId, u64);
    assert_eq_align!(CellId, u64);
}
