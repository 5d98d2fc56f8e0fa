//! Typed events published by the core to the external notifier.
//!
//! Components never talk to the chat bridge directly; they push these onto
//! an unbounded channel the binary drains. Ordering is FIFO per profile,
//! cross-profile ordering is not guaranteed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection lifecycle state for a single server profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    Degraded,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Result of one scheduled maintenance run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MaintenanceOutcome {
    Succeeded { response: String },
    Failed { reason: String },
}

/// Everything the outside world is told about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum MonitorEvent {
    PlayerJoined {
        profile: String,
        player: String,
        at: DateTime<Utc>,
    },
    PlayerLeft {
        profile: String,
        player: String,
        at: DateTime<Utc>,
        session_seconds: u64,
    },
    ConnectionStateChanged {
        profile: String,
        from: ConnectionState,
        to: ConnectionState,
    },
    MaintenanceCompleted {
        profile: String,
        task: String,
        outcome: MaintenanceOutcome,
    },
}

impl MonitorEvent {
    /// Profile this event belongs to.
    pub fn profile(&self) -> &str {
        match self {
            Self::PlayerJoined { profile, .. }
            | Self::PlayerLeft { profile, .. }
            | Self::ConnectionStateChanged { profile, .. }
            | Self::MaintenanceCompleted { profile, .. } => profile,
        }
    }
}
