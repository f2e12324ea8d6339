//! Mathematical utilities: bounded parameter transform and dense solves.

pub mod linalg;
pub mod transform;

pub use linalg::*;
pub use transform::*;
