//! Bridge between connection records and agent sessions.
//!
//! The poller and the doctor talk to agents through [`AgentConnector`],
//! never through `agent_client` directly, so tests can substitute an
//! instrumented connector. The production implementation opens one session
//! per call and closes it regardless of the RPC outcome.

use async_trait::async_trait;

use agent_client::{
    AgentAuth, AgentError, AgentSession, ConnectOptions, HealthReport, StatusReport,
};

use crate::model::{AuthMode, Connection};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Health RPC only. Returns the report and the round-trip latency.
    async fn check_health(
        &self,
        connection: &Connection,
        timeout_ms: u64,
    ) -> Result<(HealthReport, u64), AgentError>;

    /// Health and status together, for the deep-health diagnostic path.
    async fn check_deep(
        &self,
        connection: &Connection,
        timeout_ms: u64,
    ) -> Result<(HealthReport, StatusReport, u64), AgentError>;
}

/// Production connector: one short-lived HTTP session per call.
pub struct HttpAgentConnector;

impl HttpAgentConnector {
    fn options(connection: &Connection, timeout_ms: u64) -> ConnectOptions {
        let auth = match connection.auth_mode {
            AuthMode::Token => AgentAuth::Token(connection.auth_secret.clone()),
            AuthMode::Password => AgentAuth::Password(connection.auth_secret.clone()),
        };
        ConnectOptions::new(connection.host.clone(), connection.port, auth)
            .with_timeout_ms(timeout_ms)
    }
}

#[async_trait]
impl AgentConnector for HttpAgentConnector {
    async fn check_health(
        &self,
        connection: &Connection,
        timeout_ms: u64,
    ) -> Result<(HealthReport, u64), AgentError> {
        let session = AgentSession::connect(&Self::options(connection, timeout_ms)).await?;
        // No early return between connect and disconnect
        let report = session.health().await;
        let latency_ms = session.elapsed_ms();
        session.disconnect();
        Ok((report?, latency_ms))
    }

    async fn check_deep(
        &self,
        connection: &Connection,
        timeout_ms: u64,
    ) -> Result<(HealthReport, StatusReport, u64), AgentError> {
        let session = AgentSession::connect(&Self::options(connection, timeout_ms)).await?;
        let (health, status) = tokio::join!(session.health(), session.status());
        let latency_ms = session.elapsed_ms();
        session.disconnect();
        Ok((health?, status?, latency_ms))
    }
}
