//! Multi-agent systems built on the orchestrator.

pub mod research;

pub use research::{ResearchBatch, ResearchJob, ResearchOutcome, ResearchSystem};
