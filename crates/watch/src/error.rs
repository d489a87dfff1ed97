//! Error types for the fleet control loop.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the control loop components.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("fleet not found: {0}")]
    FleetNotFound(Uuid),

    #[error("alert not found: {0}")]
    AlertNotFound(Uuid),

    #[error("configuration error: {0}")]
    Config(String),

    /// Agent protocol failure, carried through where a caller wants the cause
    #[error(transparent)]
    Agent(#[from] agent_client::AgentError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
