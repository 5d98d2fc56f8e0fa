//! Buffered packet I/O over a TCP stream.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use warden_protocol::{Packet, Result, WardenError};

/// Initial read/write buffer size (4KB).
const CONNECTION_BUFFER_SIZE: usize = 4 * 1024;

/// One framed RCON connection.
///
/// Symmetrical: the same type reads and writes packets, so the test
/// harness reuses it for the server side of a socket pair.
#[derive(Debug)]
pub struct RconConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl RconConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(CONNECTION_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(CONNECTION_BUFFER_SIZE),
        }
    }

    /// Read one packet from the connection.
    ///
    /// Returns `Ok(None)` if the peer closed the connection cleanly between
    /// frames. A close mid-frame, a malformed length, or an unknown packet
    /// type is a `Protocol` error.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = Packet::decode(&mut self.read_buf)? {
                return Ok(Some(packet));
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(WardenError::protocol("connection closed mid-frame"));
            }
        }
    }

    /// Encode and write one packet, flushing immediately.
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        packet.encode(&mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.write_buf.clear();
        Ok(())
    }

    /// Shut down the write half; read errors after this are expected.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
