//! Runtime options of the sweep scheduler.

use crate::sweep::async_comm::DEFAULT_MAX_MESSAGE_BYTES;
use serde::{Deserialize, Serialize};

/// How boundary readiness holds back work.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryGating {
    /// Any unready gateway stalls the whole angle set.
    #[default]
    AngleSet,
    /// Only cells reading from an unready gateway wait.
    PerCell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepOptions {
    pub boundary_gating: BoundaryGating,
    /// When false, non-reflecting boundaries contribute `zero_flux`.
    pub surface_source_active: bool,
    /// Flush threshold for one aggregated message to a peer.
    pub max_message_bytes: usize,
    /// Angle set `i` communicates on tag `base_tag + i`.
    pub base_tag: u16,
    /// Run the collective acyclicity / link-consistency check when building graphs.
    pub validate_global_dag: bool,
    /// Driver passes between progress log lines; 0 disables them.
    pub progress_log_interval: usize,
    /// Consecutive stalled passes before the driver warns.
    pub stall_warn_passes: usize,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            boundary_gating: BoundaryGating::AngleSet,
            surface_source_active: true,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            base_tag: 0x100,
            validate_global_dag: true,
            progress_log_interval: 1000,
            stall_warn_passes: 100_000,
        }
    }
}
