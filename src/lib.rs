//! `mrs-invert` library crate.
//!
//! Block inversion of magnetic resonance soundings: a layered water content /
//! T2* model is fitted to amplitude decay data through a complex sensitivity
//! kernel.
//!
//! The binary (`mrs`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the inversion can be embedded without the CLI or io layers

pub mod app;
pub mod cli;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
