//! Periodic task driving — one independent loop per (profile, task) pair.
//!
//! Health checks, roster polls, and maintenance commands tick on their own
//! cadences. Requests serialize per profile inside the supervisor, so a
//! slow command delays at most its own profile's next tick, never another
//! profile.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use warden_protocol::{MaintenanceOutcome, MonitorEvent, WardenError};

use crate::roster::RosterTracker;
use crate::supervisor::ConnectionSupervisor;

/// Cadences for one profile's periodic work.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub health_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// A named periodic command, e.g. the hourly world save.
#[derive(Debug, Clone)]
pub struct MaintenanceTask {
    pub name: String,
    pub command: String,
    pub interval: Duration,
}

impl MaintenanceTask {
    /// The per-game world save at the given cadence.
    pub fn world_save(kind: warden_protocol::GameKind, interval: Duration) -> Self {
        Self {
            name: "world-save".into(),
            command: kind.save_command().into(),
            interval,
        }
    }
}

/// Owns every periodic loop. Loops stop on the shared shutdown signal;
/// whatever outlives the grace period is abandoned and reported.
pub struct Scheduler {
    tasks: JoinSet<()>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            tasks: JoinSet::new(),
            shutdown,
        }
    }

    /// Wire up every loop for one profile: the supervisor's reconnect loop,
    /// the health probe, the roster poll (which owns the tracker), and one
    /// loop per maintenance task.
    pub fn add_profile(
        &mut self,
        supervisor: Arc<ConnectionSupervisor>,
        tracker: RosterTracker,
        config: ScheduleConfig,
        maintenance: Vec<MaintenanceTask>,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) {
        self.tasks
            .spawn(supervisor.clone().run(self.shutdown.clone()));
        self.tasks.spawn(health_loop(
            supervisor.clone(),
            config.health_interval,
            self.shutdown.clone(),
        ));
        self.tasks.spawn(poll_loop(
            tracker,
            supervisor.clone(),
            config.poll_interval,
            self.shutdown.clone(),
        ));
        for task in maintenance {
            self.tasks.spawn(maintenance_loop(
                supervisor.clone(),
                task,
                events.clone(),
                self.shutdown.clone(),
            ));
        }
    }

    /// Wait for every loop to wind down, up to `grace`. In-flight requests
    /// get to finish or time out; stragglers are abandoned, not awaited
    /// forever.
    pub async fn shutdown(mut self, grace: Duration) {
        let drained = time::timeout(grace, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                pending = self.tasks.len(),
                "shutdown grace period expired; abandoning remaining tasks"
            );
            self.tasks.abort_all();
        }
    }
}

async fn health_loop(
    supervisor: Arc<ConnectionSupervisor>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match supervisor.health_check().await {
                    Ok(()) => {}
                    // Reconnection is the supervisor run loop's job.
                    Err(WardenError::NotConnected) => {}
                    Err(err) => {
                        debug!(profile = %supervisor.profile().name, error = %err, "health probe failed");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn poll_loop(
    mut tracker: RosterTracker,
    supervisor: Arc<ConnectionSupervisor>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => tracker.poll(&supervisor).await,
            _ = shutdown.changed() => break,
        }
    }

    tracker.drain(Utc::now());
}

async fn maintenance_loop(
    supervisor: Arc<ConnectionSupervisor>,
    task: MaintenanceTask,
    events: mpsc::UnboundedSender<MonitorEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    // No run at startup; the first one lands a full interval in.
    let mut ticker = time::interval_at(time::Instant::now() + task.interval, task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = match supervisor.execute(&task.command).await {
                    Ok(response) => MaintenanceOutcome::Succeeded {
                        response: response.trim().to_string(),
                    },
                    Err(err) => {
                        warn!(
                            profile = %supervisor.profile().name,
                            task = %task.name,
                            error = %err,
                            "maintenance run failed"
                        );
                        MaintenanceOutcome::Failed {
                            reason: err.to_string(),
                        }
                    }
                };
                let _ = events.send(MonitorEvent::MaintenanceCompleted {
                    profile: supervisor.profile().name.clone(),
                    task: task.name.clone(),
                    outcome,
                });
            }
            _ = shutdown.changed() => break,
        }
    }
}
