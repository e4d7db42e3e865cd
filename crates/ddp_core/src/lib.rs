//! DDP Core - Backend logic for the DTS to DD+ converter
//!
//! This crate contains all decision logic, validation safeguards, and the
//! safe-replace file-state machine, with zero CLI dependencies. It can be
//! used by the command-line frontend or embedded in another tool.

pub mod batch;
pub mod config;
pub mod models;
pub mod probe;
pub mod qualify;
pub mod recovery;
pub mod replace;
pub mod report;
pub mod runner;
pub mod scan;
pub mod transcode;
pub mod validate;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
