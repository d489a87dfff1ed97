//! Error types for the agent wire protocol client.

use thiserror::Error;

/// Errors that can occur while talking to a remote agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Could not establish a connection to the agent endpoint
    #[error("failed to connect to agent at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The call exceeded the session timeout
    #[error("agent call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The agent rejected the configured credentials
    #[error("agent rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// The agent answered, but not with the expected protocol shape
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl AgentError {
    /// Whether the failure is transient (connect/timeout) rather than a
    /// credential or protocol mismatch that a retry cannot fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}
