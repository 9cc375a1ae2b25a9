//! Communication, execution and the exchange algorithms built on them.

pub mod communicator;
pub mod exchange;
pub mod exec;
pub mod wire;

pub use exchange::{copy_to, fill_boundary, fill_boundary_nowait, parallel_copy, redistribute};
