//! Data layouts shared with the solver.

pub mod phi_layout;

pub use phi_layout::{PhiLayout, groupset_vector_from_primary, primary_from_groupset_vector};
