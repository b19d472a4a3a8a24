//! `fleetcrypt-orchestrator` library crate.
//!
//! Supervises worker processes, dispatches one master process per job and
//! falls back to the local codec when the master leaves no artifact. The
//! binary entrypoint lives in `main.rs`.

pub mod config;
pub mod dispatcher;
pub mod job;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod storage;

pub use orchestrator::Orchestrator;
