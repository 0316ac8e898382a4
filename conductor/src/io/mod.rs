//! Side-effecting collaborators of the run engine.

pub mod config;
pub mod executor;
pub mod process;
pub mod prompt;
pub mod schema;
pub mod session;
pub mod store;
