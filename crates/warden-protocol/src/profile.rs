//! Server profiles and per-game command tables.

use serde::{Deserialize, Serialize};

/// The game dialect a server speaks.
///
/// RCON framing is identical across games; what differs is the command
/// vocabulary and the roster response format. Adding a game means adding a
/// variant here plus a roster parser in `warden-monitor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameKind {
    Minecraft,
    Palworld,
    ArkAscended,
    Source,
}

impl GameKind {
    /// Human-readable label used in logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Minecraft => "Minecraft",
            Self::Palworld => "Palworld",
            Self::ArkAscended => "ARK: Survival Ascended",
            Self::Source => "SRCDS",
        }
    }

    /// Command that returns the current player roster.
    pub fn list_players_command(&self) -> &'static str {
        match self {
            Self::Minecraft => "list",
            Self::Palworld => "ShowPlayers",
            Self::ArkAscended => "ListPlayers",
            Self::Source => "status",
        }
    }

    /// Cheap round-trip command used for health checks.
    pub fn health_command(&self) -> &'static str {
        match self {
            Self::Minecraft => "list",
            Self::Palworld => "Info",
            Self::ArkAscended => "ListPlayers",
            Self::Source => "version",
        }
    }

    /// Periodic maintenance command. Source servers have no world save over
    /// RCON, so a version probe stands in as the scheduled check.
    pub fn save_command(&self) -> &'static str {
        match self {
            Self::Minecraft => "save-all",
            Self::Palworld => "Save",
            Self::ArkAscended => "SaveWorld",
            Self::Source => "version",
        }
    }
}

impl std::fmt::Display for GameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity and credential for one monitored server.
///
/// Immutable after construction; components receive it by `Arc`. At most one
/// live transport exists per profile at any time (enforced by the
/// supervisor, which owns the transport slot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Unique short name, used as the event/log tag and the playtime key
    /// prefix (e.g. "pal-eu-1").
    pub name: String,
    pub kind: GameKind,
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl ServerProfile {
    /// Socket address string for dialing.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Stable playtime-store key for a player seen on this server.
    pub fn player_key(&self, player: &str) -> String {
        format!("{}:{}", self.name, player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_kebab_case_wire_format() {
        let kind: GameKind = serde_json::from_str("\"ark-ascended\"").unwrap();
        assert_eq!(kind, GameKind::ArkAscended);
        assert_eq!(serde_json::to_string(&GameKind::Minecraft).unwrap(), "\"minecraft\"");
    }

    #[test]
    fn player_key_is_profile_scoped() {
        let profile = ServerProfile {
            name: "mc-main".into(),
            kind: GameKind::Minecraft,
            host: "127.0.0.1".into(),
            port: 25575,
            password: "secret".into(),
        };
        assert_eq!(profile.player_key("Alice"), "mc-main:Alice");
        assert_eq!(profile.addr(), "127.0.0.1:25575");
    }
}
