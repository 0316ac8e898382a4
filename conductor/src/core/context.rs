//! Per-call run context passed by value down an agent call chain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::budget::SystemLimits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<SystemLimits>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            correlation_id: new_correlation_id(),
            session_id: None,
            workflow_run_id: None,
            target_id: None,
            domain: None,
            parent_agent: None,
            parent_span: None,
            limits: None,
            metadata: BTreeMap::new(),
        }
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Fill in a correlation id if the caller left it blank.
    pub fn ensure_correlation_id(mut self) -> Self {
        if self.correlation_id.trim().is_empty() {
            self.correlation_id = new_correlation_id();
        }
        self
    }

    /// Context for a nested run. Inherits everything, including the
    /// correlation id; `parent_agent` and `parent_span` point at the caller.
    pub fn child(&self, parent_agent: &str, parent_span: Option<&str>) -> Self {
        Self {
            parent_agent: Some(parent_agent.to_string()),
            parent_span: parent_span.map(str::to_string).or_else(|| self.parent_span.clone()),
            ..self.clone()
        }
    }
}

pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
