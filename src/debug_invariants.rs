//! Structural self-checks for sweep graphs and mesh partitions.
//!
//! A structure states its consistency rules once, in
//! [`DebugInvariants::validate_invariants`]. Construction paths call
//! [`DebugInvariants::debug_assert_invariants`], which only runs the check in
//! debug builds or with the `check-invariants` / `strict-invariants`
//! features, and panics with the structure's name on the first violation.

use crate::sweep_error::SweepError;

/// Whether assertions run in this build.
pub const INVARIANTS_ENABLED: bool = cfg!(any(
    debug_assertions,
    feature = "check-invariants",
    feature = "strict-invariants"
));

pub trait DebugInvariants {
    /// Name used in the panic message.
    const NAME: &'static str;

    /// First broken rule, if any.
    fn validate_invariants(&self) -> Result<(), SweepError>;

    /// Panic on a broken rule when [`INVARIANTS_ENABLED`]; no-op otherwise.
    fn debug_assert_invariants(&self) {
        if INVARIANTS_ENABLED {
            if let Err(e) = self.validate_invariants() {
                panic!("{} is inconsistent: {e}", Self::NAME);
            }
        }
    }
}
