//! Durable playtime accounting.
//!
//! A single task owns the identity → record mapping; every other component
//! only holds a [`StoreHandle`] and sends it messages. Records are flushed
//! to a JSON file with a write-to-temp-then-rename discipline, so a crash
//! mid-write never corrupts the previous file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, warn};

use warden_protocol::{Result, WardenError};

use crate::supervisor::Backoff;

/// Flush-retry backoff bounds.
const FLUSH_RETRY_INITIAL: Duration = Duration::from_secs(1);
const FLUSH_RETRY_CAP: Duration = Duration::from_secs(60);

/// Cumulative playtime for one identity. Never deleted; the total never
/// decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaytimeRecord {
    pub first_join: DateTime<Utc>,
    pub total_playtime_seconds: u64,
}

/// What to do when the persisted mapping is missing or unreadable at
/// startup. Starting empty silently discards history, so the choice is the
/// operator's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryPolicy {
    /// Log a loud warning and start with an empty mapping.
    #[default]
    StartEmpty,
    /// Rename the unreadable file aside and start empty.
    Quarantine,
    /// Refuse to start.
    Fail,
}

enum StoreCommand {
    PlayerSeen {
        key: String,
        at: DateTime<Utc>,
    },
    SessionClosed {
        key: String,
        joined_at: DateTime<Utc>,
        seconds: u64,
    },
    Flush,
    Snapshot {
        reply: oneshot::Sender<HashMap<String, PlaytimeRecord>>,
    },
}

/// Cheap cloneable front for the store task.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreHandle {
    /// Record that an identity is online; creates the record on first sight.
    pub fn player_seen(&self, key: String, at: DateTime<Utc>) {
        let _ = self.tx.send(StoreCommand::PlayerSeen { key, at });
    }

    /// Fold a closed session into the identity's total.
    pub fn session_closed(&self, key: String, joined_at: DateTime<Utc>, seconds: u64) {
        let _ = self.tx.send(StoreCommand::SessionClosed {
            key,
            joined_at,
            seconds,
        });
    }

    /// Ask for an out-of-cycle flush.
    pub fn flush(&self) {
        let _ = self.tx.send(StoreCommand::Flush);
    }

    /// Read-only copy of the current mapping (for the admin surface).
    pub async fn snapshot(&self) -> HashMap<String, PlaytimeRecord> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(StoreCommand::Snapshot { reply }).is_err() {
            return HashMap::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// The mapping plus its file location. All mutation goes through the task
/// spawned by [`PlaytimeStore::spawn`]; tests drive the methods directly.
#[derive(Debug)]
pub struct PlaytimeStore {
    path: PathBuf,
    records: HashMap<String, PlaytimeRecord>,
    dirty: bool,
}

impl PlaytimeStore {
    /// Load the persisted mapping, applying `policy` when the file is
    /// missing-but-unreadable or corrupt. A simply absent file is normal
    /// (first run) and yields an empty mapping without ceremony.
    pub async fn load(path: PathBuf, policy: RecoveryPolicy) -> Result<Self> {
        let records = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<HashMap<String, PlaytimeRecord>>(&content)
            {
                Ok(records) => {
                    info!(
                        path = %path.display(),
                        identities = records.len(),
                        "loaded playtime records"
                    );
                    records
                }
                Err(err) => {
                    Self::recover(&path, policy, &format!("corrupt mapping: {err}")).await?
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => Self::recover(&path, policy, &format!("unreadable file: {err}")).await?,
        };

        Ok(Self {
            path,
            records,
            dirty: false,
        })
    }

    async fn recover(
        path: &PathBuf,
        policy: RecoveryPolicy,
        reason: &str,
    ) -> Result<HashMap<String, PlaytimeRecord>> {
        match policy {
            RecoveryPolicy::Fail => Err(WardenError::persistence(format!(
                "{}: {reason} (recovery policy is fail)",
                path.display()
            ))),
            RecoveryPolicy::Quarantine => {
                let aside = PathBuf::from(format!(
                    "{}.corrupt-{}",
                    path.display(),
                    Utc::now().timestamp()
                ));
                fs::rename(path, &aside)
                    .await
                    .map_err(|err| WardenError::persistence(format!("quarantine failed: {err}")))?;
                warn!(
                    path = %path.display(),
                    quarantined = %aside.display(),
                    reason,
                    "playtime file quarantined; accounting restarts from zero"
                );
                Ok(HashMap::new())
            }
            RecoveryPolicy::StartEmpty => {
                warn!(
                    path = %path.display(),
                    reason,
                    "playtime file unusable; accounting restarts from zero"
                );
                Ok(HashMap::new())
            }
        }
    }

    pub fn player_seen(&mut self, key: &str, at: DateTime<Utc>) {
        if !self.records.contains_key(key) {
            self.records.insert(
                key.to_string(),
                PlaytimeRecord {
                    first_join: at,
                    total_playtime_seconds: 0,
                },
            );
            self.dirty = true;
        }
    }

    pub fn session_closed(&mut self, key: &str, joined_at: DateTime<Utc>, seconds: u64) {
        let record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| PlaytimeRecord {
                first_join: joined_at,
                total_playtime_seconds: 0,
            });
        record.total_playtime_seconds += seconds;
        self.dirty = true;
    }

    pub fn records(&self) -> &HashMap<String, PlaytimeRecord> {
        &self.records
    }

    pub fn get(&self, key: &str) -> Option<&PlaytimeRecord> {
        self.records.get(key)
    }

    /// Serialize the full mapping and swap it into place atomically.
    /// No-op while nothing changed since the last successful flush.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&self.records)
            .map_err(|err| WardenError::persistence(format!("serialize: {err}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|err| WardenError::persistence(format!("mkdir: {err}")))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|err| WardenError::persistence(format!("write {}: {err}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| WardenError::persistence(format!("rename: {err}")))?;

        self.dirty = false;
        debug!(path = %self.path.display(), identities = self.records.len(), "playtime records flushed");
        Ok(())
    }

    /// Spawn the single-writer task. It exits when every handle is dropped,
    /// performing one final flush on the way out.
    pub fn spawn(self, flush_interval: Duration) -> (StoreHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(run_store(self, rx, flush_interval));
        (StoreHandle { tx }, join)
    }
}

async fn run_store(
    mut store: PlaytimeStore,
    mut rx: mpsc::UnboundedReceiver<StoreCommand>,
    flush_interval: Duration,
) {
    let mut ticker = time::interval(flush_interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let mut backoff = Backoff::new(FLUSH_RETRY_INITIAL, FLUSH_RETRY_CAP);
    let mut retry_at: Option<time::Instant> = None;

    loop {
        let retry_deadline = retry_at;
        let retry_sleep = async move {
            match retry_deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            command = rx.recv() => match command {
                Some(StoreCommand::PlayerSeen { key, at }) => store.player_seen(&key, at),
                Some(StoreCommand::SessionClosed { key, joined_at, seconds }) => {
                    store.session_closed(&key, joined_at, seconds);
                }
                Some(StoreCommand::Flush) => {
                    attempt_flush(&mut store, &mut retry_at, &mut backoff).await;
                }
                Some(StoreCommand::Snapshot { reply }) => {
                    let _ = reply.send(store.records.clone());
                }
                None => break,
            },
            _ = ticker.tick() => {
                attempt_flush(&mut store, &mut retry_at, &mut backoff).await;
            }
            _ = retry_sleep => {
                retry_at = None;
                attempt_flush(&mut store, &mut retry_at, &mut backoff).await;
            }
        }
    }

    if let Err(err) = store.flush().await {
        error!(error = %err, "final playtime flush failed; recent sessions are lost");
    }
}

/// Flush failures never block intake: mutations keep landing in memory and
/// the write is retried on a backoff schedule.
async fn attempt_flush(
    store: &mut PlaytimeStore,
    retry_at: &mut Option<time::Instant>,
    backoff: &mut Backoff,
) {
    match store.flush().await {
        Ok(()) => {
            backoff.reset();
            *retry_at = None;
        }
        Err(err) => {
            let delay = backoff.next_delay();
            warn!(error = %err, retry_in = ?delay, "playtime flush failed");
            *retry_at = Some(time::Instant::now() + delay);
        }
    }
}
