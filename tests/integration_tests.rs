//! End-to-end tests — a scripted in-process RCON server on an OS-assigned
//! port, driven through the full supervisor → transport → roster → store
//! path.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use warden_monitor::{
    ConnectionSupervisor, PlaytimeStore, RecoveryPolicy, RosterTracker, SupervisorConfig,
};
use warden_protocol::{
    ConnectionState, GameKind, MonitorEvent, Packet, ServerProfile, WardenError, AUTH_FAILED_ID,
};
use warden_transport::RconConnection;

const PASSWORD: &str = "s3cret";

/// Shared, scriptable server behavior.
#[derive(Default)]
struct ServerState {
    /// Names returned by the `list` command.
    roster: Vec<String>,
    /// When set, `list` answers with text no parser recognizes.
    garble_roster: bool,
    /// When set, roster responses are split into single-byte-ish fragments.
    fragment_responses: bool,
    /// When set, the server hangs up instead of answering the next command.
    drop_on_command: bool,
}

type SharedState = Arc<Mutex<ServerState>>;

/// Minecraft-dialect mock server. Accepts any number of consecutive
/// connections, authenticates against [`PASSWORD`], answers `list` and
/// `save-all`, and echoes the empty sentinel command back untouched.
async fn spawn_game_server(state: SharedState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let state = state.clone();
            tokio::spawn(async move {
                let mut conn = RconConnection::new(stream);

                let Ok(Some(login)) = conn.read_packet().await else {
                    return;
                };
                if login.payload != PASSWORD {
                    let _ = conn.write_packet(&Packet::response(AUTH_FAILED_ID, "")).await;
                    return;
                }
                if conn
                    .write_packet(&Packet::response(login.request_id, ""))
                    .await
                    .is_err()
                {
                    return;
                }

                loop {
                    match conn.read_packet().await {
                        Ok(Some(packet)) => {
                            // The sentinel: empty command, echoed immediately.
                            if packet.payload.is_empty() {
                                if conn
                                    .write_packet(&Packet::response(packet.request_id, ""))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                                continue;
                            }

                            let (body, fragment, hang_up) = {
                                let state = state.lock().unwrap();
                                (
                                    respond(&packet.payload, &state),
                                    state.fragment_responses,
                                    state.drop_on_command,
                                )
                            };
                            if hang_up {
                                return;
                            }
                            let pieces: Vec<String> = if fragment {
                                split_into_fragments(&body)
                            } else {
                                vec![body]
                            };
                            for piece in pieces {
                                if conn
                                    .write_packet(&Packet::response(packet.request_id, &piece))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }
                        _ => return,
                    }
                }
            });
        }
    });

    addr
}

fn respond(command: &str, state: &ServerState) -> String {
    match command {
        "list" => {
            if state.garble_roster {
                "### internal server error ###".to_string()
            } else {
                format!(
                    "There are {} of a max of 20 players online: {}",
                    state.roster.len(),
                    state.roster.join(", ")
                )
            }
        }
        "save-all" => "Saved the game".to_string(),
        other => format!("Unknown command: {other}"),
    }
}

fn split_into_fragments(body: &str) -> Vec<String> {
    // Three uneven pieces exercise out-of-phase reassembly.
    let third = (body.len() / 3).max(1);
    let mut pieces = Vec::new();
    let mut rest = body;
    while rest.len() > third {
        let (head, tail) = rest.split_at(third);
        pieces.push(head.to_string());
        rest = tail;
    }
    pieces.push(rest.to_string());
    pieces
}

fn profile_at(addr: &str) -> Arc<ServerProfile> {
    let (host, port) = addr.rsplit_once(':').unwrap();
    Arc::new(ServerProfile {
        name: "mc-main".into(),
        kind: GameKind::Minecraft,
        host: host.into(),
        port: port.parse().unwrap(),
        password: PASSWORD.into(),
    })
}

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        request_timeout: Duration::from_secs(2),
        health_timeout: Duration::from_secs(2),
        ..SupervisorConfig::default()
    }
}

struct Harness {
    state: SharedState,
    supervisor: Arc<ConnectionSupervisor>,
    tracker: RosterTracker,
    events: mpsc::UnboundedReceiver<MonitorEvent>,
    store: warden_monitor::StoreHandle,
    _dir: tempfile::TempDir,
}

async fn connected_harness() -> Harness {
    let state: SharedState = Arc::new(Mutex::new(ServerState::default()));
    let addr = spawn_game_server(state.clone()).await;
    let profile = profile_at(&addr);

    let dir = tempfile::tempdir().expect("tmp dir");
    let playtime = PlaytimeStore::load(dir.path().join("stats.json"), RecoveryPolicy::default())
        .await
        .unwrap();
    let (store, _join) = playtime.spawn(Duration::from_secs(3600));

    let (events_tx, events) = mpsc::unbounded_channel();
    let supervisor = ConnectionSupervisor::new(profile.clone(), fast_config(), events_tx.clone());
    let tracker = RosterTracker::new(profile, events_tx, store.clone());

    supervisor.connect().await.unwrap();
    assert_eq!(supervisor.state(), ConnectionState::Authenticated);

    Harness {
        state,
        supervisor,
        tracker,
        events,
        store,
        _dir: dir,
    }
}

async fn next_presence_event(
    events: &mut mpsc::UnboundedReceiver<MonitorEvent>,
) -> MonitorEvent {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended");
        match event {
            MonitorEvent::ConnectionStateChanged { .. } => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn join_and_leave_flow_through_to_the_store() {
    let mut harness = connected_harness().await;

    // Empty roster first: no events.
    harness.tracker.poll(&harness.supervisor).await;
    assert!(harness.tracker.online().is_empty());

    harness.state.lock().unwrap().roster = vec!["Alice".into()];
    harness.tracker.poll(&harness.supervisor).await;

    match next_presence_event(&mut harness.events).await {
        MonitorEvent::PlayerJoined { player, .. } => assert_eq!(player, "Alice"),
        other => panic!("expected join, got {other:?}"),
    }
    assert_eq!(
        harness.tracker.online(),
        &BTreeSet::from(["Alice".to_string()])
    );

    harness.state.lock().unwrap().roster.clear();
    harness.tracker.poll(&harness.supervisor).await;

    let seconds = match next_presence_event(&mut harness.events).await {
        MonitorEvent::PlayerLeft {
            player,
            session_seconds,
            ..
        } => {
            assert_eq!(player, "Alice");
            session_seconds
        }
        other => panic!("expected leave, got {other:?}"),
    };
    // Wall-clock session; only its plausibility is assertable here.
    assert!(seconds <= 2);

    let snapshot = harness.store.snapshot().await;
    let record = &snapshot["mc-main:Alice"];
    assert_eq!(record.total_playtime_seconds, seconds);
}

#[tokio::test]
async fn fragmented_responses_reassemble_before_parsing() {
    let mut harness = connected_harness().await;
    {
        let mut state = harness.state.lock().unwrap();
        state.roster = vec!["Alice".into(), "Bob".into(), "Carol".into()];
        state.fragment_responses = true;
    }

    harness.tracker.poll(&harness.supervisor).await;
    assert_eq!(
        harness.tracker.online(),
        &BTreeSet::from([
            "Alice".to_string(),
            "Bob".to_string(),
            "Carol".to_string()
        ])
    );
}

#[tokio::test]
async fn garbled_roster_preserves_previous_snapshot() {
    let mut harness = connected_harness().await;

    harness.state.lock().unwrap().roster = vec!["Alice".into()];
    harness.tracker.poll(&harness.supervisor).await;
    let _join = next_presence_event(&mut harness.events).await;

    // The next poll returns unparseable text: the cycle is skipped, nobody
    // "leaves", and no events are emitted.
    harness.state.lock().unwrap().garble_roster = true;
    harness.tracker.poll(&harness.supervisor).await;

    assert_eq!(
        harness.tracker.online(),
        &BTreeSet::from(["Alice".to_string()])
    );
    assert!(harness.events.try_recv().is_err());
    let snapshot = harness.store.snapshot().await;
    assert_eq!(snapshot["mc-main:Alice"].total_playtime_seconds, 0);

    // Recovery: the next good poll continues from the preserved snapshot.
    harness.state.lock().unwrap().garble_roster = false;
    harness.tracker.poll(&harness.supervisor).await;
    assert_eq!(
        harness.tracker.online(),
        &BTreeSet::from(["Alice".to_string()])
    );
}

#[tokio::test]
async fn execute_forwards_raw_administrative_commands() {
    let harness = connected_harness().await;

    let response = harness.supervisor.execute("save-all").await.unwrap();
    assert_eq!(response, "Saved the game");

    let response = harness.supervisor.execute("kick Alice").await.unwrap();
    assert_eq!(response, "Unknown command: kick Alice");
}

#[tokio::test]
async fn wrong_password_is_auth_error_and_stays_disconnected() {
    let state: SharedState = Arc::new(Mutex::new(ServerState::default()));
    let addr = spawn_game_server(state).await;

    let (host, port) = addr.rsplit_once(':').unwrap();
    let profile = Arc::new(ServerProfile {
        name: "mc-main".into(),
        kind: GameKind::Minecraft,
        host: host.into(),
        port: port.parse().unwrap(),
        password: "wrong".into(),
    });

    let (events_tx, _events) = mpsc::unbounded_channel();
    let supervisor = ConnectionSupervisor::new(profile, fast_config(), events_tx);

    let err = supervisor.connect().await.unwrap_err();
    assert!(matches!(err, WardenError::Auth));
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);

    // A later attempt with the same (still wrong) credential fails the same
    // way rather than crashing anything.
    assert!(matches!(
        supervisor.connect().await.unwrap_err(),
        WardenError::Auth
    ));
}

#[tokio::test]
async fn dropped_connection_disconnects_then_reconnects() {
    let harness = connected_harness().await;
    harness.supervisor.execute("save-all").await.unwrap();

    // The server hangs up mid-request: the failure is surfaced to the
    // caller and the supervisor falls back to Disconnected.
    harness.state.lock().unwrap().drop_on_command = true;
    let err = harness.supervisor.execute("save-all").await.unwrap_err();
    assert!(err.is_connection_fatal(), "got non-fatal error: {err}");
    assert_eq!(harness.supervisor.state(), ConnectionState::Disconnected);

    // Commands now fail fast instead of hanging.
    assert!(matches!(
        harness.supervisor.execute("list").await.unwrap_err(),
        WardenError::NotConnected
    ));

    // The listener keeps accepting, so the next attempt re-establishes.
    harness.state.lock().unwrap().drop_on_command = false;
    harness.supervisor.connect().await.unwrap();
    assert_eq!(harness.supervisor.state(), ConnectionState::Authenticated);
    assert_eq!(
        harness.supervisor.execute("save-all").await.unwrap(),
        "Saved the game"
    );
}
