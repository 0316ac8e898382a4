//! Retryability classification for agent errors.
//!
//! The default policy is a content heuristic: it looks for a fixed vocabulary
//! of transient-failure markers in the error message, ignoring case. It does
//! not inspect error types. Agents that need different behavior supply their
//! own [`RetryPolicy`] instead of changing the marker list.

use crate::core::types::ErrorKind;

/// Markers whose presence makes an error message retryable.
pub const RETRYABLE_MARKERS: [&str; 5] = ["timeout", "rate limit", "overloaded", "503", "529"];

/// Decides whether a failed run is worth re-invoking.
pub trait RetryPolicy: Send + Sync {
    fn is_retryable(&self, message: &str) -> bool;

    /// Optional advice attached to retryable errors.
    fn retry_hint(&self, _kind: ErrorKind) -> Option<String> {
        None
    }
}

/// Case-insensitive substring match against a marker vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRetryPolicy {
    markers: Vec<String>,
}

impl KeywordRetryPolicy {
    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|marker| marker.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for KeywordRetryPolicy {
    fn default() -> Self {
        Self::with_markers(RETRYABLE_MARKERS)
    }
}

impl RetryPolicy for KeywordRetryPolicy {
    fn is_retryable(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.markers
            .iter()
            .any(|marker| message.contains(marker.as_str()))
    }

    fn retry_hint(&self, kind: ErrorKind) -> Option<String> {
        let hint = match kind {
            ErrorKind::Timeout => "re-run with a larger timeout or a narrower task",
            ErrorKind::Model => "back off before re-running; the model endpoint is saturated",
            _ => "re-run after backoff",
        };
        Some(hint.to_string())
    }
}

/// Classify `message` with the default marker vocabulary.
pub fn is_retryable(message: &str) -> bool {
    KeywordRetryPolicy::default().is_retryable(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_match_in_any_case() {
        for message in [
            "Request TIMEOUT after 30s",
            "hit the Rate Limit for this org",
            "server Overloaded, try later",
            "HTTP 503 Service Unavailable",
            "status=529",
            "rate limit",
        ] {
            assert!(is_retryable(message), "{message} should be retryable");
        }
    }

    #[test]
    fn unrelated_messages_are_not_retryable() {
        for message in [
            "schema validation failed",
            "missing field `topic`",
            "permission denied",
            "HTTP 500 internal error",
            "rate-limited",
            "",
        ] {
            assert!(!is_retryable(message), "{message} should not be retryable");
        }
    }

    #[test]
    fn custom_markers_replace_defaults() {
        let policy = KeywordRetryPolicy::with_markers(["Connection Reset"]);
        assert!(policy.is_retryable("connection reset by peer"));
        assert!(!policy.is_retryable("timeout"));
        assert_eq!(policy.markers(), ["connection reset".to_string()]);
    }
}
