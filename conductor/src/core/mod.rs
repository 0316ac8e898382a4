//! Deterministic, pure logic shared by the run engine and orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod citations;
pub mod context;
pub mod lifecycle;
pub mod profile;
pub mod retry;
pub mod types;
