//! Input/output helpers.
//!
//! - kernel / sounding JSON ingest (`ingest`)
//! - model column export (`export`)
//! - result JSON read/write (`result`)

pub mod export;
pub mod ingest;
pub mod result;

pub use export::*;
pub use ingest::*;
pub use result::*;
