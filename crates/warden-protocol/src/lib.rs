//! Warden — RCON Protocol Types
//!
//! Wire-level types for the RCON remote console protocol.
//! This crate is the single source of truth for the packet format,
//! the error taxonomy, server profiles, and the monitor event types
//! published to the external notifier.

pub mod error;
pub mod event;
pub mod packet;
pub mod profile;

pub use error::{Result, WardenError};
pub use event::{ConnectionState, MaintenanceOutcome, MonitorEvent};
pub use packet::{Packet, PacketKind, AUTH_FAILED_ID, MAX_FRAME_LEN, MIN_FRAME_LEN};
pub use profile::{GameKind, ServerProfile};
