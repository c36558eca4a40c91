//! HARVESTER — Simulated yield-farming lifecycle engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod sources;
pub mod storage;
pub mod types;
