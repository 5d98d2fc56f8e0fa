//! RCON client — authentication and serialized command exchange.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, trace};

use warden_protocol::{Packet, Result, WardenError, AUTH_FAILED_ID};

use crate::connection::RconConnection;

/// A live, framed RCON session with one game server.
///
/// Exactly one request may be in flight at a time: `send` owns the
/// connection exclusively until the response (or its deadline) resolves.
/// Fragmentation detection relies on response ordering, so the wire cannot
/// multiplex — callers queue upstream.
#[derive(Debug)]
pub struct RconClient {
    connection: RconConnection,
    next_id: i32,
    authenticated: bool,
    closed: bool,
}

impl RconClient {
    /// Dial the server. Refusal and dial timeouts surface as
    /// `Transport` / `Timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| WardenError::Timeout(timeout))??;
        stream.set_nodelay(true)?;

        debug!(addr, "rcon connection established");
        Ok(Self {
            connection: RconConnection::new(stream),
            next_id: 0,
            authenticated: false,
            closed: false,
        })
    }

    /// Allocate a fresh positive request id. Wraps long before i32::MAX in
    /// practice; ids only need to be unique within a single exchange.
    fn allocate_id(&mut self) -> i32 {
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id <= 0 {
            self.next_id = 1;
        }
        self.next_id
    }

    /// Perform the type-3 login exchange. A response carrying request id
    /// `-1` means the credential was rejected; any other id confirms.
    /// Must complete before the first `send`.
    pub async fn authenticate(&mut self, password: &str, timeout: Duration) -> Result<()> {
        let id = self.allocate_id();
        self.connection.write_packet(&Packet::login(id, password)).await?;

        let packet = time::timeout(timeout, self.connection.read_packet())
            .await
            .map_err(|_| WardenError::Timeout(timeout))??
            .ok_or_else(|| WardenError::protocol("connection closed during authentication"))?;

        if packet.request_id == AUTH_FAILED_ID {
            return Err(WardenError::Auth);
        }

        self.authenticated = true;
        debug!("rcon authentication accepted");
        Ok(())
    }

    /// Send a command and collect its full (possibly fragmented) response.
    ///
    /// After the real command a sentinel empty command with the next id goes
    /// out immediately. Servers answer strictly in order, so every response
    /// packet bearing the command id is a fragment; the first packet bearing
    /// the sentinel id marks the end of the logical response.
    ///
    /// On `Timeout` the connection must be discarded: a late response would
    /// otherwise be attributed to the next request.
    pub async fn send(&mut self, command: &str, timeout: Duration) -> Result<String> {
        if !self.authenticated || self.closed {
            return Err(WardenError::NotConnected);
        }

        let id = self.allocate_id();
        let sentinel_id = self.allocate_id();
        self.connection.write_packet(&Packet::command(id, command)).await?;
        self.connection.write_packet(&Packet::command(sentinel_id, "")).await?;
        trace!(id, sentinel_id, command, "rcon request written");

        let connection = &mut self.connection;
        let collect = async move {
            let mut body = String::new();
            loop {
                let packet = connection
                    .read_packet()
                    .await?
                    .ok_or_else(|| WardenError::protocol("connection closed awaiting response"))?;

                if packet.request_id == sentinel_id {
                    return Ok(body);
                }
                if packet.request_id != id {
                    return Err(WardenError::protocol(format!(
                        "unexpected request id {} (awaiting {} or sentinel {})",
                        packet.request_id, id, sentinel_id
                    )));
                }
                body.push_str(&packet.payload);
            }
        };

        time::timeout(timeout, collect)
            .await
            .map_err(|_| WardenError::Timeout(timeout))?
    }

    /// Release the socket. Idempotent.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.authenticated = false;
            self.connection.shutdown().await;
        }
    }
}
