//! claude-wm library crate — the configuration engine behind the CLI.
//!
//! The binary entry point is `main.rs`; everything with behavior lives here
//! so integration tests can drive it directly:
//!
//! - [`model`] — validated paths/hashes, tree indexes, change records
//! - [`merge`] — three-way plans, the planner, the atomic applier
//! - [`fsio`] — atomic writes, advisory locks, corruption detection
//! - [`backup`] / [`recovery`] — ZIP snapshots and git recovery points
//! - [`migrate`] — legacy layout migration
//! - [`ops`] — one module per CLI operation

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsio;
pub mod merge;
pub mod meta;
pub mod migrate;
pub mod model;
pub mod ops;
pub mod project;
pub mod recovery;
pub mod telemetry;
pub mod upstream;
