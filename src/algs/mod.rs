//! Communication substrate and wire format.

pub mod communicator;
pub mod wire;

pub use communicator::{CommTag, Communicator, LocalComm, NoComm, Request};
