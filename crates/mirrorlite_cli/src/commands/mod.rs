//! CLI command implementations.

pub mod restore;
pub mod run;
pub mod status;
pub mod sync;
