//! Domain types used throughout the crate.
//!
//! This module defines:
//!
//! - validated inputs (`KernelModel`, `Sounding`)
//! - the layered model and its flattened parameter layout
//! - run options (`InversionConfig`, `BoundsSpec`, `StartModel`)
//! - run outputs (`InversionResult`, `ModelCovariance`, etc.)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
