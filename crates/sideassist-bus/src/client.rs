use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::{debug, info};

use crate::codec::{CodecConfig, Message, Packet};
use crate::error::{BusError, Result};
use crate::handshake::{client_handshake, ConnectRequest, Credentials, HandshakeConfig};
use crate::reader::PacketReader;
use crate::topic::{validate_filter, validate_topic};
use crate::transport::connect;
use crate::writer::PacketWriter;

/// How to open a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub handshake: HandshakeConfig,
    pub codec: CodecConfig,
}

impl ConnectOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            credentials: None,
            handshake: HandshakeConfig::default(),
            codec: CodecConfig::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_handshake_config(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }
}

type SharedWriter = Arc<Mutex<PacketWriter<UnixStream>>>;

/// A connected bus session.
pub struct BusClient {
    client_id: String,
    publisher: BusPublisher,
    receiver: BusReceiver,
}

/// Sending half of a session. Clones share the connection.
#[derive(Clone)]
pub struct BusPublisher {
    writer: SharedWriter,
    stream: Arc<UnixStream>,
}

/// Receiving half of a session.
pub struct BusReceiver {
    reader: PacketReader<UnixStream>,
}

impl BusClient {
    /// Connect to the broker at `path` and complete the handshake.
    pub fn connect(path: impl AsRef<Path>, options: &ConnectOptions) -> Result<Self> {
        let stream = connect(path)?;
        let timeout = Some(options.handshake.timeout);
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;

        let handshake_codec = CodecConfig {
            max_packet_size: options.handshake.max_handshake_payload,
            ..options.codec.clone()
        };
        let mut reader = PacketReader::with_config(stream.try_clone()?, handshake_codec);
        let mut writer = PacketWriter::with_config(stream.try_clone()?, options.codec.clone());

        let request = ConnectRequest {
            protocol: options.handshake.protocol_name.clone(),
            version: options.handshake.protocol_version.clone(),
            client_id: options.client_id.clone(),
            username: options.credentials.as_ref().map(|c| c.username.clone()),
            password: options.credentials.as_ref().map(|c| c.password.clone()),
        };
        client_handshake(&mut reader, &mut writer, &request, &options.handshake)?;

        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        reader.set_max_packet_size(options.codec.max_packet_size);
        info!(client_id = %options.client_id, "connected to broker");

        Ok(Self {
            client_id: options.client_id.clone(),
            publisher: BusPublisher {
                writer: Arc::new(Mutex::new(writer)),
                stream: Arc::new(stream),
            },
            receiver: BusReceiver { reader },
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>, retain: bool) -> Result<()> {
        self.publisher.publish(topic, payload, retain)
    }

    pub fn subscribe(&self, filter: &str) -> Result<()> {
        self.publisher.subscribe(filter)
    }

    pub fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.publisher.unsubscribe(filter)
    }

    /// Block until the next delivered message.
    pub fn recv(&mut self) -> Result<Message> {
        self.receiver.recv()
    }

    /// Say goodbye and close the connection.
    pub fn disconnect(self) -> Result<()> {
        self.publisher.disconnect()
    }

    /// Split into independently usable halves.
    pub fn split(self) -> (BusPublisher, BusReceiver) {
        (self.publisher, self.receiver)
    }
}

impl BusPublisher {
    fn writer(&self) -> MutexGuard<'_, PacketWriter<UnixStream>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `payload` on `topic`. With `retain`, the broker keeps it for
    /// later subscribers; an empty retained payload clears the topic.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>, retain: bool) -> Result<()> {
        validate_topic(topic)?;
        let message = Message::new(topic, payload, retain);
        debug!(%topic, retain, bytes = message.payload.len(), "publish");
        self.writer().write_packet(&Packet::Publish(message))
    }

    pub fn subscribe(&self, filter: &str) -> Result<()> {
        validate_filter(filter)?;
        debug!(%filter, "subscribe");
        self.writer().write_packet(&Packet::Subscribe(filter.to_string()))
    }

    pub fn unsubscribe(&self, filter: &str) -> Result<()> {
        validate_filter(filter)?;
        self.writer()
            .write_packet(&Packet::Unsubscribe(filter.to_string()))
    }

    /// Send a disconnect and shut the connection down for every clone.
    pub fn disconnect(&self) -> Result<()> {
        let sent = self.writer().write_packet(&Packet::Disconnect);
        let _ = self.stream.shutdown(Shutdown::Both);
        sent
    }
}

impl BusReceiver {
    /// Block until the next delivered message.
    pub fn recv(&mut self) -> Result<Message> {
        loop {
            match self.reader.read_packet()? {
                Packet::Publish(message) => return Ok(message),
                Packet::Disconnect => {
                    return Err(BusError::Disconnected("broker closed the session".to_string()))
                }
                other => debug!(packet = other.name(), "ignoring unexpected packet"),
            }
        }
    }
}
