//! Wire types for the agent protocol.
//!
//! The agent speaks camelCase JSON; these types mirror the payloads of the
//! `health` and `status` RPCs exactly.

use serde::{Deserialize, Serialize};

/// Health payload returned by the `health` RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Overall machine-level health as reported by the agent itself
    pub ok: bool,
    /// Per-channel link state (chat channels the agent is bridged to)
    #[serde(default)]
    pub channels: Vec<ChannelHealth>,
    /// Agent uptime in seconds
    #[serde(default)]
    pub uptime: u64,
}

impl HealthReport {
    /// Synthetic report used when an instance cannot be reached.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            ok: false,
            channels: Vec::new(),
            uptime: 0,
        }
    }

    /// Number of channels currently degraded (linked but not ok).
    #[must_use]
    pub fn degraded_channels(&self) -> usize {
        self.channels.iter().filter(|c| !c.ok).count()
    }
}

/// One channel entry inside a [`HealthReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHealth {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub ok: bool,
}

/// Status payload returned by the `status` RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: String,
    pub version: String,
    /// Hash of the config the agent last applied, if it knows one
    #[serde(default)]
    pub config_hash: Option<String>,
}

impl StatusReport {
    /// Synthetic report used when an instance cannot be reached.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            state: "unknown".to_string(),
            version: "unknown".to_string(),
            config_hash: None,
        }
    }
}
