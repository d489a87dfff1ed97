//! Client for the bot-agent wire protocol.
//!
//! Every deployed instance exposes a small authenticated HTTP surface
//! (`/v1/ping`, `/v1/health`, `/v1/status`, `/v1/logs`). This crate provides
//! short-lived sessions against that surface for the health poller and the
//! diagnostics doctor, plus a reference-counted log stream multiplexer for
//! fan-out of a single upstream log stream to many subscribers.
//!
//! Sessions are deliberately not pooled: a poll or diagnostic call is
//! connect → RPC → disconnect, bounded by a per-session timeout. Reconnect
//! behavior is disabled for these calls; a failed session is reported, not
//! retried.

pub mod client;
pub mod error;
pub mod logs;
pub mod protocol;

pub use client::{AgentAuth, AgentSession, ConnectOptions};
pub use error::AgentError;
pub use logs::{LogSource, LogStreamMux, LogSubscriber};
pub use protocol::{ChannelHealth, HealthReport, StatusReport};
