//! Warden Transport Layer
//!
//! Framed request/response exchange over one TCP connection per server.
//! The transport handles:
//! - Connection lifecycle (dial, close)
//! - The RCON authentication exchange
//! - Multi-packet fragmentation reassembly via a sentinel request
//! - Per-request deadlines
//!
//! At most one request is in flight per client; callers are serialized
//! upstream by the connection supervisor's request queue.

pub mod client;
pub mod connection;

pub use client::RconClient;
pub use connection::RconConnection;
