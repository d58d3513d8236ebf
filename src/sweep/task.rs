//! Per-cell sweep tasks.

/// One unit of sweep work: computing a single local cell for an angle set.
///
/// `num_dependencies` counts upstream predecessors that have not yet
/// delivered (local tasks still to run plus remote messages still to
/// arrive). It only ever decreases, and the task runs exactly once, when it
/// reaches zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellTask {
    /// Local index of the cell this task computes.
    pub reference_id: usize,
    pub num_dependencies: usize,
    /// Task indices to release when this task completes.
    pub successors: Vec<usize>,
    pub completed: bool,
}

impl CellTask {
    pub fn new(reference_id: usize) -> Self {
        Self {
            reference_id,
            num_dependencies: 0,
            successors: Vec::new(),
            completed: false,
        }
    }

    /// Ready to execute this pass.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.num_dependencies == 0 && !self.completed
    }
}

/// Ordered task list of one angle set. Task `i` computes local cell `i`.
pub type TaskList = Vec<CellTask>;
