//! Short-lived authenticated sessions against a single agent.
//!
//! A session is a scoped resource: callers sequence
//! `connect → RPC → disconnect` with no early return in between, so
//! disconnect runs on success, RPC error and timeout alike. There is no
//! reconnect and no pooling; each poll or diagnostic call pays for its own
//! handshake.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AgentError;
use crate::protocol::{HealthReport, StatusReport};

/// Default per-session timeout, matching the poller's call budget.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Credentials for the agent surface.
#[derive(Debug, Clone)]
pub enum AgentAuth {
    /// `Authorization: Bearer <token>`
    Token(String),
    /// `X-Agent-Password: <password>`
    Password(String),
}

/// Options for opening a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub auth: AgentAuth,
    /// Bounds the handshake and every RPC issued on the session
    pub timeout_ms: u64,
}

impl ConnectOptions {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, auth: AgentAuth) -> Self {
        Self {
            host: host.into(),
            port,
            auth,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// An open, authenticated session against one agent.
#[derive(Debug)]
pub struct AgentSession {
    base_url: String,
    auth: AgentAuth,
    client: reqwest::Client,
    timeout_ms: u64,
    opened_at: Instant,
}

impl AgentSession {
    /// Open a session: build a timeout-bounded client and perform the
    /// authenticated `ping` handshake.
    pub async fn connect(opts: &ConnectOptions) -> Result<Self, AgentError> {
        let base_url = format!("http://{}:{}", opts.host, opts.port);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(opts.timeout_ms))
            .build()
            .map_err(|e| AgentError::Connect {
                endpoint: base_url.clone(),
                reason: e.to_string(),
            })?;

        let session = Self {
            base_url,
            auth: opts.auth.clone(),
            client,
            timeout_ms: opts.timeout_ms,
            opened_at: Instant::now(),
        };

        // Handshake doubles as the auth check
        session.get_json::<serde_json::Value>("/v1/ping").await?;
        debug!(endpoint = %session.base_url, "agent session opened");

        Ok(session)
    }

    /// Issue the `health` RPC.
    pub async fn health(&self) -> Result<HealthReport, AgentError> {
        self.get_json("/v1/health").await
    }

    /// Issue the `status` RPC.
    pub async fn status(&self) -> Result<StatusReport, AgentError> {
        self.get_json("/v1/status").await
    }

    /// Milliseconds since the session was opened. Used by the poller as the
    /// recorded round-trip latency once the health RPC has answered.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.opened_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Close the session. Consumes self so the session cannot be reused.
    pub fn disconnect(self) {
        debug!(endpoint = %self.base_url, "agent session closed");
        drop(self);
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AgentError> {
        let url = format!("{}{path}", self.base_url);

        let mut request = self.client.get(&url);
        request = match &self.auth {
            AgentAuth::Token(token) => request.bearer_auth(token),
            AgentAuth::Password(password) => request.header("X-Agent-Password", password),
        };

        let response = request.send().await.map_err(|e| self.map_transport(&e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AgentError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(AgentError::Protocol(format!(
                "unexpected HTTP {status} from {url}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AgentError::Protocol(format!("malformed payload from {url}: {e}")))
    }

    fn map_transport(&self, err: &reqwest::Error) -> AgentError {
        if err.is_timeout() {
            AgentError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else if err.is_connect() {
            AgentError::Connect {
                endpoint: self.base_url.clone(),
                reason: err.to_string(),
            }
        } else {
            AgentError::Protocol(err.to_string())
        }
    }
}
