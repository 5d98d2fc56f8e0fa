//! RCON binary packet format.
//!
//! Wire layout, all integers little-endian:
//!
//! ```text
//! int32 length   — counts every byte after itself
//! int32 id       — request identifier, echoed by the server
//! int32 type     — 3 = login, 2 = command, 0 = response
//! payload        — command or response text
//! 0x00           — payload terminator
//! 0x00           — trailing pad byte
//! ```
//!
//! `length` is therefore `payload.len() + 10`. Decoding is incremental:
//! a short buffer yields `Ok(None)` and the caller reads more bytes.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, WardenError};

/// Request id servers echo back when authentication fails.
pub const AUTH_FAILED_ID: i32 = -1;

/// Smallest legal `length` value (empty payload).
pub const MIN_FRAME_LEN: usize = 10;

/// Largest `length` value accepted before the frame is declared malformed.
/// Source-engine servers cap packet bodies at 4096 bytes.
pub const MAX_FRAME_LEN: usize = 4096 + MIN_FRAME_LEN;

/// RCON packet type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Type 3 — authentication request.
    Login,
    /// Type 2 — command request; also used by some servers as the
    /// auth-response marker.
    Command,
    /// Type 0 — command response.
    Response,
}

impl PacketKind {
    pub fn code(&self) -> i32 {
        match self {
            Self::Login => 3,
            Self::Command => 2,
            Self::Response => 0,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            3 => Some(Self::Login),
            2 => Some(Self::Command),
            0 => Some(Self::Response),
            _ => None,
        }
    }
}

/// A single decoded RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: PacketKind,
    pub payload: String,
}

impl Packet {
    /// Build a type-3 authentication request carrying the password.
    pub fn login(request_id: i32, password: &str) -> Self {
        Self {
            request_id,
            kind: PacketKind::Login,
            payload: password.to_string(),
        }
    }

    /// Build a type-2 command request.
    pub fn command(request_id: i32, command: &str) -> Self {
        Self {
            request_id,
            kind: PacketKind::Command,
            payload: command.to_string(),
        }
    }

    /// Build a type-0 response (used by the test harness to fake a server).
    pub fn response(request_id: i32, payload: &str) -> Self {
        Self {
            request_id,
            kind: PacketKind::Response,
            payload: payload.to_string(),
        }
    }

    /// Number of bytes after the length prefix.
    fn frame_len(&self) -> usize {
        self.payload.len() + MIN_FRAME_LEN
    }

    /// Append the encoded packet to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.frame_len() + 4);
        buf.put_i32_le(self.frame_len() as i32);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.kind.code());
        buf.put_slice(self.payload.as_bytes());
        buf.put_u8(0);
        buf.put_u8(0);
    }

    /// Try to decode one packet from the front of `buf`.
    ///
    /// Returns `Ok(None)` if the buffer does not yet hold a complete frame,
    /// consuming nothing. A malformed length or missing terminator is a
    /// `Protocol` error; the connection is unusable afterwards.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let declared = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if declared < MIN_FRAME_LEN as i32 || declared as usize > MAX_FRAME_LEN {
            return Err(WardenError::protocol(format!(
                "invalid packet length {declared}"
            )));
        }
        let frame_len = declared as usize;

        if buf.len() < 4 + frame_len {
            return Ok(None);
        }

        buf.advance(4);
        let request_id = buf.get_i32_le();
        let type_code = buf.get_i32_le();
        let kind = PacketKind::from_code(type_code)
            .ok_or_else(|| WardenError::protocol(format!("unknown packet type {type_code}")))?;

        let payload_len = frame_len - MIN_FRAME_LEN;
        let payload = String::from_utf8_lossy(&buf[..payload_len]).into_owned();
        buf.advance(payload_len);

        let terminator = buf.get_u8();
        let pad = buf.get_u8();
        if terminator != 0 || pad != 0 {
            return Err(WardenError::protocol("missing packet terminator"));
        }

        Ok(Some(Packet {
            request_id,
            kind,
            payload,
        }))
    }
}
