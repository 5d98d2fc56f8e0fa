//! Connection supervisor — per-profile state machine with health checks
//! and backoff-driven reconnection.
//!
//! State machine: `Disconnected → Connecting → Authenticated`, with
//! `Authenticated ⇄ Degraded` on health-check results. A configurable
//! number of consecutive health failures forces `Disconnected` and wakes
//! the reconnect loop. Every transition is published as a
//! `ConnectionStateChanged` event.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time;
use tracing::{debug, info, warn};

use warden_protocol::{ConnectionState, MonitorEvent, Result, ServerProfile, WardenError};
use warden_transport::RconClient;

/// Tunables for one supervised connection.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Deadline for the dial, the auth exchange, and every command.
    pub request_timeout: Duration,
    /// Separate (usually tighter) deadline for health probes.
    pub health_timeout: Duration,
    /// Consecutive health failures before the connection is torn down.
    pub max_health_failures: u32,
    /// First reconnect delay; doubles each attempt.
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling.
    pub backoff_cap: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(5),
            max_health_failures: 3,
            backoff_initial: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// Exponential reconnect backoff with jitter.
pub(crate) struct Backoff {
    initial: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            next: initial,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.next = self.initial;
    }

    /// The next base delay: doubles until it hits the cap.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (self.next * 2).min(self.cap);
        base
    }

    /// ±50% jitter so profiles never retry in lockstep.
    pub(crate) fn jittered(base: Duration) -> Duration {
        base.mul_f64(rand::rng().random_range(0.5..1.5))
    }
}

struct Inner {
    state: ConnectionState,
    consecutive_failures: u32,
}

/// Owns the single transport slot for one server profile and serializes
/// every request through it.
pub struct ConnectionSupervisor {
    profile: Arc<ServerProfile>,
    config: SupervisorConfig,
    /// The transport slot doubles as the request queue: `tokio::sync::Mutex`
    /// grants the lock in FIFO order, so concurrent `execute` callers are
    /// served one at a time per profile, never across profiles.
    transport: tokio::sync::Mutex<Option<RconClient>>,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    reconnect: Notify,
}

impl ConnectionSupervisor {
    pub fn new(
        profile: Arc<ServerProfile>,
        config: SupervisorConfig,
        events: mpsc::UnboundedSender<MonitorEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            profile,
            config,
            transport: tokio::sync::Mutex::new(None),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                consecutive_failures: 0,
            }),
            events,
            reconnect: Notify::new(),
        })
    }

    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn set_state(&self, to: ConnectionState) {
        let from = {
            let mut inner = self.inner.lock();
            if inner.state == to {
                return;
            }
            let from = inner.state;
            inner.state = to;
            from
        };
        debug!(profile = %self.profile.name, %from, %to, "connection state changed");
        let _ = self.events.send(MonitorEvent::ConnectionStateChanged {
            profile: self.profile.name.clone(),
            from,
            to,
        });
    }

    /// One dial-and-authenticate attempt.
    pub async fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        let attempt = async {
            let mut client =
                RconClient::connect(&self.profile.addr(), self.config.request_timeout).await?;
            client
                .authenticate(&self.profile.password, self.config.request_timeout)
                .await?;
            Ok::<_, WardenError>(client)
        };

        match attempt.await {
            Ok(client) => {
                *self.transport.lock().await = Some(client);
                self.inner.lock().consecutive_failures = 0;
                self.set_state(ConnectionState::Authenticated);
                info!(profile = %self.profile.name, addr = %self.profile.addr(), "connected and authenticated");
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Forward a raw command through the profile's request queue.
    ///
    /// Fails fast with `NotConnected` unless the profile is authenticated;
    /// callers decide whether to wait or report. A connection-fatal failure
    /// tears the transport down and wakes the reconnect loop.
    pub async fn execute(&self, command: &str) -> Result<String> {
        if self.state() != ConnectionState::Authenticated {
            return Err(WardenError::NotConnected);
        }

        let mut guard = self.transport.lock().await;
        let Some(client) = guard.as_mut() else {
            return Err(WardenError::NotConnected);
        };

        match client.send(command, self.config.request_timeout).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_connection_fatal() {
                    client.close().await;
                    *guard = None;
                    drop(guard);
                    warn!(profile = %self.profile.name, error = %err, "command failed; dropping connection");
                    self.set_state(ConnectionState::Disconnected);
                    self.reconnect.notify_one();
                }
                Err(err)
            }
        }
    }

    /// Issue the per-game no-op probe.
    ///
    /// Success clears the failure counter and restores `Authenticated` from
    /// `Degraded`. Failure increments it; at the threshold the connection is
    /// torn down and a reconnect scheduled. Below the threshold the (possibly
    /// wedged) connection is kept — a stale late response will surface as a
    /// `Protocol` error on the next exchange and force the teardown anyway.
    pub async fn health_check(&self) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            ConnectionState::Authenticated | ConnectionState::Degraded
        ) {
            return Err(WardenError::NotConnected);
        }

        let result = {
            let mut guard = self.transport.lock().await;
            let Some(client) = guard.as_mut() else {
                return Err(WardenError::NotConnected);
            };
            client
                .send(self.profile.kind.health_command(), self.config.health_timeout)
                .await
        };

        match result {
            Ok(_) => {
                self.inner.lock().consecutive_failures = 0;
                if state == ConnectionState::Degraded {
                    self.set_state(ConnectionState::Authenticated);
                }
                Ok(())
            }
            Err(err) => {
                let failures = {
                    let mut inner = self.inner.lock();
                    inner.consecutive_failures += 1;
                    inner.consecutive_failures
                };
                warn!(profile = %self.profile.name, failures, error = %err, "health check failed");

                if failures >= self.config.max_health_failures {
                    let mut guard = self.transport.lock().await;
                    if let Some(client) = guard.as_mut() {
                        client.close().await;
                    }
                    *guard = None;
                    drop(guard);
                    self.set_state(ConnectionState::Disconnected);
                    self.reconnect.notify_one();
                } else {
                    self.set_state(ConnectionState::Degraded);
                }
                Err(err)
            }
        }
    }

    /// Reconnect loop: keeps the profile connected until shutdown.
    ///
    /// Attempts immediately on entry and whenever the connection drops;
    /// failed attempts sleep on a jittered exponential backoff that resets
    /// after every successful connect.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_cap);

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.state() == ConnectionState::Disconnected {
                match self.connect().await {
                    Ok(()) => backoff.reset(),
                    Err(err) => {
                        let delay = Backoff::jittered(backoff.next_delay());
                        warn!(
                            profile = %self.profile.name,
                            error = %err,
                            retry_in = ?delay,
                            "connect attempt failed"
                        );
                        tokio::select! {
                            _ = time::sleep(delay) => {}
                            _ = shutdown.changed() => break,
                        }
                        continue;
                    }
                }
            }

            // Connected (or degraded): sleep until a loss is reported.
            tokio::select! {
                _ = self.reconnect.notified() => {}
                _ = shutdown.changed() => break,
            }
        }

        // Let an in-flight request finish (the lock is FIFO), then close.
        let mut guard = self.transport.lock().await;
        if let Some(client) = guard.as_mut() {
            client.close().await;
        }
        *guard = None;
        drop(guard);
        self.set_state(ConnectionState::Disconnected);
        debug!(profile = %self.profile.name, "supervisor stopped");
    }
}
