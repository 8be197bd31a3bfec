//! Drives conversation sessions: runs the engine step by step and fulfils its effects.

pub mod executor;
pub mod handlers;
pub mod runner;
