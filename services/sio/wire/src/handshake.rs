//! engine.io handshake header carried by the open packet.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ping interval assumed when the server omits `pingInterval` (ms)
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
/// Ping timeout assumed when the server omits `pingTimeout` (ms)
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

/// Session header received on the open packet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Server-assigned session ID
    pub sid: String,
    /// Transport upgrades offered by the server (absent on v4)
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between heartbeats in milliseconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Grace period for a heartbeat in milliseconds
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

impl Handshake {
    /// Parse the JSON body of an open packet (prefix already stripped)
    pub fn parse(payload: &[u8]) -> Result<Self, crate::WireError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Heartbeat interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    /// Heartbeat grace period as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }

    /// Longest silence tolerated before the peer is presumed dead
    pub fn liveness_window(&self) -> Duration {
        self.interval() + self.timeout()
    }
}
