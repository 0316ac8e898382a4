//! Agent execution and orchestration engine.
//!
//! An agent turns a typed input into a typed output by way of one call to an
//! external executor. The crate is split the same way throughout:
//!
//! - **[`core`]**: pure, deterministic logic (types, profiles, limits, citation
//!   checks). No I/O.
//! - **[`io`]**: collaborators behind traits (executor, artifact store,
//!   sessions, schemas, prompts, config).
//!
//! [`agent`] drives one run end to end, [`system`] composes runs under
//! aggregate limits, and [`batch`] runs independent units with bounded
//! parallelism.

pub mod agent;
pub mod agents;
pub mod batch;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod system;
pub mod systems;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
