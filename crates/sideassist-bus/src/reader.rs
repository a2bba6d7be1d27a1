use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_packet, CodecConfig, Packet};
use crate::error::{BusError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete packets from any `Read` stream.
///
/// Partial reads are buffered internally; callers only ever see whole packets.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Read> PacketReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(BusError::Disconnected)` at EOF.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = decode_packet(&mut self.buf, self.config.max_packet_size)? {
                return Ok(packet);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(BusError::Io(err)),
            };

            if read == 0 {
                let reason = if self.buf.is_empty() {
                    "connection closed"
                } else {
                    "connection closed mid-packet"
                };
                return Err(BusError::Disconnected(reason.to_string()));
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum body size for subsequent decoding.
    pub fn set_max_packet_size(&mut self, max_packet_size: usize) {
        self.config.max_packet_size = max_packet_size;
    }
}
