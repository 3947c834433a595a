//! Allocation backends.

pub mod cma;
