//! Domain logic shared by the fleetcrypt orchestrator.
//!
//! Nothing in this crate spawns or supervises processes. It holds the
//! job/worker vocabulary, output-path resolution, and the local fallback
//! codec that runs when the external pipeline fails to produce an artifact.

pub mod error;
pub mod fallback;
pub mod paths;
pub mod types;
