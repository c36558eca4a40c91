//! Core engine — the settle → enter lifecycle loop.

pub mod accountant;
pub mod lifecycle;
pub mod policy;
pub mod settlement;

pub use lifecycle::{Engine, EngineStatus, TickReport};
