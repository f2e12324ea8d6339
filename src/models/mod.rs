//! Forward modelling of surface NMR decay curves.
//!
//! The operator is a pure function of (kernel, time gates, layered model) so
//! that inversion and simulation code can share it.

pub mod forward;

pub use forward::*;
