//! Built-in agent kinds.

pub mod filter;
pub mod research;

pub use filter::{FilterRequest, FilteredReport, ReportFilterAgent};
pub use research::{ResearchAgent, ResearchReport, ResearchRequest};
