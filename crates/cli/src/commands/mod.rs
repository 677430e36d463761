//! CLI command implementations.

pub mod migrate;
pub mod prune;
pub mod seed;
