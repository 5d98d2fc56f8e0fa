//! Roster tracking — polls the player list, diffs it against the previous
//! snapshot, and turns the difference into join/leave events.
//!
//! A failed or unparseable poll skips the cycle and leaves the previous
//! snapshot untouched: an outage must never read as "everyone left".

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use warden_protocol::{GameKind, MonitorEvent, Result, ServerProfile, WardenError};

use crate::playtime::StoreHandle;
use crate::supervisor::ConnectionSupervisor;

/// Turns one game's raw roster response into a set of identities.
pub trait PlayerListParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<BTreeSet<String>>;
}

/// Parser for the profile's game dialect.
pub fn parser_for(kind: GameKind) -> Box<dyn PlayerListParser> {
    match kind {
        GameKind::Minecraft => Box::new(MinecraftParser),
        GameKind::Palworld => Box::new(PalworldParser),
        GameKind::ArkAscended => Box::new(ArkParser),
        GameKind::Source => Box::new(SourceParser),
    }
}

/// Snapshot difference: `(joined, left)`.
pub fn diff(
    previous: &BTreeSet<String>,
    current: &BTreeSet<String>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let joined = current.difference(previous).cloned().collect();
    let left = previous.difference(current).cloned().collect();
    (joined, left)
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-game parsers
// ─────────────────────────────────────────────────────────────────────────────

/// `list` — "There are 2 of a max of 20 players online: Alice, Bob"
struct MinecraftParser;

impl PlayerListParser for MinecraftParser {
    fn parse(&self, raw: &str) -> Result<BTreeSet<String>> {
        let Some((_, names)) = raw.split_once(':') else {
            return Err(WardenError::parse(format!(
                "minecraft list response without separator: {raw:?}"
            )));
        };
        Ok(names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// `ShowPlayers` — CSV with a `name,playeruid,steamid` header row.
struct PalworldParser;

impl PlayerListParser for PalworldParser {
    fn parse(&self, raw: &str) -> Result<BTreeSet<String>> {
        if raw.trim().is_empty() {
            return Ok(BTreeSet::new());
        }

        let mut saw_csv = false;
        let mut players = BTreeSet::new();
        for line in raw.lines() {
            let line = line.trim();
            let Some((name, _)) = line.split_once(',') else {
                // Some builds prepend status lines before the table.
                continue;
            };
            saw_csv = true;
            let name = name.trim();
            if name.is_empty() || name.eq_ignore_ascii_case("name") {
                continue;
            }
            players.insert(name.to_string());
        }

        if !saw_csv {
            return Err(WardenError::parse(format!(
                "palworld roster without csv rows: {raw:?}"
            )));
        }
        Ok(players)
    }
}

/// `ListPlayers` — "0. Alice, 0002f..." per line, or "No Players Connected".
struct ArkParser;

impl PlayerListParser for ArkParser {
    fn parse(&self, raw: &str) -> Result<BTreeSet<String>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains("No Players Connected") {
            return Ok(BTreeSet::new());
        }

        let mut players = BTreeSet::new();
        for line in trimmed.lines() {
            let line = line.trim();
            let Some((index, rest)) = line.split_once('.') else {
                continue;
            };
            if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            // The platform id trails after the last comma; names may
            // themselves contain commas.
            let name = match rest.rsplit_once(',') {
                Some((name, _id)) => name,
                None => rest,
            }
            .trim();
            if !name.is_empty() {
                players.insert(name.to_string());
            }
        }

        if players.is_empty() {
            return Err(WardenError::parse(format!(
                "ark roster without player rows: {raw:?}"
            )));
        }
        Ok(players)
    }
}

/// `status` — player rows look like `# 2 1 "Alice" STEAM_1:0:111 ...`.
struct SourceParser;

impl PlayerListParser for SourceParser {
    fn parse(&self, raw: &str) -> Result<BTreeSet<String>> {
        if !raw.contains('#') {
            return Err(WardenError::parse(format!(
                "srcds status without player table: {raw:?}"
            )));
        }

        let mut players = BTreeSet::new();
        for line in raw.lines() {
            let Some(rest) = line.trim_start().strip_prefix('#') else {
                continue;
            };
            let Some(open) = rest.find('"') else {
                continue; // table header and "#end" carry no quotes
            };
            let head = rest[..open].trim();
            if head.is_empty() || !head.chars().all(|c| c.is_ascii_digit() || c.is_whitespace()) {
                continue;
            }
            let tail = &rest[open + 1..];
            let Some(close) = tail.find('"') else {
                continue;
            };
            let name = tail[..close].trim();
            if !name.is_empty() {
                players.insert(name.to_string());
            }
        }
        Ok(players)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────────────────

/// Per-profile presence state: the last good snapshot plus one open session
/// per identity currently believed online.
pub struct RosterTracker {
    profile: Arc<ServerProfile>,
    parser: Box<dyn PlayerListParser>,
    previous: BTreeSet<String>,
    sessions: HashMap<String, DateTime<Utc>>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    store: StoreHandle,
}

impl RosterTracker {
    pub fn new(
        profile: Arc<ServerProfile>,
        events: mpsc::UnboundedSender<MonitorEvent>,
        store: StoreHandle,
    ) -> Self {
        let parser = parser_for(profile.kind);
        Self {
            profile,
            parser,
            previous: BTreeSet::new(),
            sessions: HashMap::new(),
            events,
            store,
        }
    }

    /// Identities currently believed online.
    pub fn online(&self) -> &BTreeSet<String> {
        &self.previous
    }

    /// One poll cycle. Every failure mode skips the cycle.
    pub async fn poll(&mut self, supervisor: &ConnectionSupervisor) {
        let command = self.profile.kind.list_players_command();
        let raw = match supervisor.execute(command).await {
            Ok(raw) => raw,
            Err(WardenError::NotConnected) => {
                debug!(profile = %self.profile.name, "roster poll skipped; not connected");
                return;
            }
            Err(err) => {
                warn!(profile = %self.profile.name, error = %err, "roster poll failed; keeping previous snapshot");
                return;
            }
        };

        match self.parser.parse(&raw) {
            Ok(current) => self.apply(current, Utc::now()),
            Err(err) => {
                warn!(profile = %self.profile.name, error = %err, "unparseable roster response; skipping cycle");
            }
        }
    }

    /// Fold a successfully parsed snapshot into the tracker state.
    pub fn apply(&mut self, current: BTreeSet<String>, now: DateTime<Utc>) {
        let (joined, left) = diff(&self.previous, &current);

        for player in joined {
            self.sessions.insert(player.clone(), now);
            self.store.player_seen(self.profile.player_key(&player), now);
            let _ = self.events.send(MonitorEvent::PlayerJoined {
                profile: self.profile.name.clone(),
                player,
                at: now,
            });
        }

        for player in left {
            let (joined_at, seconds) = match self.sessions.remove(&player) {
                Some(joined_at) => {
                    // Floor to whole seconds; clock steps must not go negative.
                    let seconds = (now - joined_at).num_seconds().max(0) as u64;
                    (joined_at, seconds)
                }
                None => {
                    warn!(
                        profile = %self.profile.name,
                        %player,
                        "leave without a tracked session; counting zero seconds"
                    );
                    (now, 0)
                }
            };
            self.store
                .session_closed(self.profile.player_key(&player), joined_at, seconds);
            let _ = self.events.send(MonitorEvent::PlayerLeft {
                profile: self.profile.name.clone(),
                player,
                at: now,
                session_seconds: seconds,
            });
        }

        self.previous = current;
    }

    /// Close every open session without emitting leave events — players have
    /// not left, the monitor is going away. Called once at shutdown.
    pub fn drain(&mut self, now: DateTime<Utc>) {
        let open = std::mem::take(&mut self.sessions);
        if !open.is_empty() {
            debug!(profile = %self.profile.name, sessions = open.len(), "folding open sessions into the store");
        }
        for (player, joined_at) in open {
            let seconds = (now - joined_at).num_seconds().max(0) as u64;
            self.store
                .session_closed(self.profile.player_key(&player), joined_at, seconds);
        }
        self.previous.clear();
    }
}
