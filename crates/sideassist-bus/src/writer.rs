use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_packet, CodecConfig, Message, Packet};
use crate::error::{BusError, CodecError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete packets to any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Write> PacketWriter<T> {
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

    /// Encode and write one packet, then flush (blocking).
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let size = packet.body_len();
        if size > self.config.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size,
                max: self.config.max_packet_size,
            }
            .into());
        }

        self.buf.clear();
        encode_packet(packet, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(BusError::Disconnected("write returned zero".to_string())),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(BusError::Io(err)),
            }
        }

        self.flush()
    }

    /// Shorthand for writing a publish packet.
    pub fn publish(&mut self, message: &Message) -> Result<()> {
        self.write_packet(&Packet::Publish(message.clone()))
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(BusError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum body size for subsequent encoding.
    pub fn set_max_packet_size(&mut self, max_packet_size: usize) {
        self.config.max_packet_size = max_packet_size;
    }
}
