//! Layout of the flux-moment vector and groupset slicing.
//!
//! The primary vector stores, for every local cell, node, moment and group,
//! one value at
//! `((cell * nodes_per_cell + node) * num_moments + moment) * num_groups + group`.
//! Iterative solvers work on one groupset at a time, so the groupset's
//! contiguous group range is gathered into a compact vector (same
//! cell → node → moment → group ordering) and scattered back afterwards.

use crate::sweep_error::SweepError;
use std::ops::Range;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhiLayout {
    num_cells: usize,
    nodes_per_cell: usize,
    num_moments: usize,
    num_groups: usize,
}

impl PhiLayout {
    pub fn new(num_cells: usize, nodes_per_cell: usize, num_moments: usize, num_groups: usize) -> Self {
        Self {
            num_cells,
            nodes_per_cell,
            num_moments,
            num_groups,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn nodes_per_cell(&self) -> usize {
        self.nodes_per_cell
    }

    pub fn num_moments(&self) -> usize {
        self.num_moments
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// Length of the primary vector.
    pub fn len(&self) -> usize {
        self.num_cells * self.nodes_per_cell * self.num_moments * self.num_groups
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of `(cell, node, moment, group)` in the primary vector.
    #[inline]
    pub fn map(&self, cell: usize, node: usize, moment: usize, group: usize) -> usize {
        ((cell * self.nodes_per_cell + node) * self.num_moments + moment) * self.num_groups + group
    }

    /// Length of a compact vector holding `groups`.
    pub fn groupset_len(&self, groups: &Range<usize>) -> usize {
        self.num_cells * self.nodes_per_cell * self.num_moments * groups.len()
    }

    fn check_groups(&self, groupset: usize, groups: &Range<usize>) -> Result<(), SweepError> {
        if groups.start > groups.end || groups.end > self.num_groups {
            return Err(SweepError::InvalidGroupsetState {
                groupset,
                angle_set: None,
            });
        }
        Ok(())
    }

    fn check_len(expected: usize, found: usize) -> Result<(), SweepError> {
        if expected != found {
            return Err(SweepError::LayoutMismatch { expected, found });
        }
        Ok(())
    }

    /// Offsets in the primary vector of every entry of a compact groupset
    /// vector, in compact order.
    fn groupset_offsets(&self, groups: Range<usize>) -> impl Iterator<Item = usize> + '_ {
        let per_row = self.num_cells * self.nodes_per_cell * self.num_moments;
        (0..per_row).flat_map(move |row| {
            let base = row * self.num_groups;
            groups.clone().map(move |g| base + g)
        })
    }
}

/// Gather the groups of groupset `groupset` from the primary vector `y`.
///
/// # Errors
/// * [`SweepError::InvalidGroupsetState`] if `groups` falls outside the layout.
/// * [`SweepError::LayoutMismatch`] if `y` is not `layout.len()` long.
pub fn groupset_vector_from_primary(
    layout: &PhiLayout,
    groupset: usize,
    groups: Range<usize>,
    y: &[f64],
) -> Result<Vec<f64>, SweepError> {
    layout.check_groups(groupset, &groups)?;
    PhiLayout::check_len(layout.len(), y.len())?;
    Ok(layout.groupset_offsets(groups).map(|i| y[i]).collect())
}

/// Scatter the compact groupset vector `x` back into the primary vector `y`.
/// Entries of other groups are left untouched.
pub fn primary_from_groupset_vector(
    layout: &PhiLayout,
    groupset: usize,
    groups: Range<usize>,
    x: &[f64],
    y: &mut [f64],
) -> Result<(), SweepError> {
    layout.check_groups(groupset, &groups)?;
    PhiLayout::check_len(layout.groupset_len(&groups), x.len())?;
    PhiLayout::check_len(layout.len(), y.len())?;
    for (i, &v) in layout.groupset_offsets(groups).zip(x) {
        y[i] = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_is_group_fastest() {
        let l = PhiLayout::new(2, 3, 2, 4);
        assert_eq!(l.len(), 48);
        assert_eq!(l.map(0, 0, 0, 1), 1);
        assert_eq!(l.map(0, 0, 1, 0), 4);
        assert_eq!(l.map(0, 1, 0, 0), 8);
        assert_eq!(l.map(1, 0, 0, 0), 24);
        assert_eq!(l.map(1, 2, 1, 3), 47);
    }

    #[test]
    fn gather_then_scatter_touches_only_the_groupset() {
        let l = PhiLayout::new(3, 2, 2, 5);
        let y: Vec<f64> = (0..l.len()).map(|i| i as f64).collect();
        let x = groupset_vector_from_primary(&l, 1, 1..3, &y).unwrap();
        assert_eq!(x.len(), l.groupset_len(&(1..3)));
        assert_eq!(&x[..4], &[1.0, 2.0, 6.0, 7.0]);
        assert_eq!(x[x.len() - 1], l.map(2, 1, 1, 2) as f64);

        let mut out = vec![-1.0; l.len()];
        primary_from_groupset_vector(&l, 1, 1..3, &x, &mut out).unwrap();
        for cell in 0..3 {
            for node in 0..2 {
                for m in 0..2 {
                    for g in 0..5 {
                        let i = l.map(cell, node, m, g);
                        let want = if (1..3).contains(&g) { y[i] } else { -1.0 };
                        assert_eq!(out[i], want);
                    }
                }
            }
        }
    }

    #[test]
    fn bad_inputs() {
        let l = PhiLayout::new(1, 1, 1, 2);
        assert_eq!(
            groupset_vector_from_primary(&l, 4, 0..3, &[0.0; 2]),
            Err(SweepError::InvalidGroupsetState {
                groupset: 4,
                angle_set: None
            })
        );
        assert_eq!(
            groupset_vector_from_primary(&l, 0, 0..2, &[0.0; 3]),
            Err(SweepError::LayoutMismatch {
                expected: 2,
                found: 3
            })
        );
        let mut y = [0.0; 2];
        assert!(matches!(
            primary_from_groupset_vector(&l, 0, 1..2, &[1.0, 2.0], &mut y),
            Err(SweepError::LayoutMismatch { expected: 1, found: 2 })
        ));
    }
}
