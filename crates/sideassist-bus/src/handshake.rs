use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::Packet;
use crate::error::{BusError, Result};
use crate::reader::PacketReader;
use crate::writer::PacketWriter;

/// Protocol name spoken by broker and clients.
pub const PROTOCOL_NAME: &str = "sideassist";
/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: &str = "1.0";

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_CLIENT_ID_LEN: usize = 128;
const MAX_CREDENTIAL_LEN: usize = 4096;

/// Username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Client request opening a session.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectRequest {
    pub protocol: String,
    pub version: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Plaintext on the local socket; never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Broker answer to a [`ConnectRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnAck {
    pub protocol: String,
    pub version: String,
    pub client_id: String,
    /// Set when the session was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Configuration for the handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Timeout for each blocking handshake operation.
    pub timeout: Duration,
    pub protocol_name: String,
    pub protocol_version: String,
    /// Maximum handshake packet body in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_handshake_payload: 16 * 1024,
        }
    }
}

fn redacted(secret: &Option<String>) -> Option<String> {
    secret
        .as_ref()
        .map(|value| format!("<redacted:{} bytes>", value.len()))
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .finish()
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("protocol", &self.protocol)
            .field("version", &self.version)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .finish()
    }
}

/// Check a client id: 1..=128 bytes, no `/`, `+` or `#`.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.is_empty() || client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(BusError::HandshakeFailed(format!(
            "invalid client_id length: {}",
            client_id.len()
        )));
    }
    if client_id.contains(['/', '+', '#']) {
        return Err(BusError::HandshakeFailed(format!(
            "client_id '{client_id}' contains a reserved character"
        )));
    }
    Ok(())
}

/// Client side: send `request` and wait for the broker's answer.
pub fn client_handshake<R: Read, W: Write>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    request: &ConnectRequest,
    config: &HandshakeConfig,
) -> Result<ConnAck> {
    validate_client_id(&request.client_id)?;
    validate_credential("username", request.username.as_deref())?;
    validate_credential("password", request.password.as_deref())?;

    writer.write_packet(&Packet::Connect(Bytes::from(serde_json::to_vec(request)?)))?;

    let deadline = Instant::now() + config.timeout;
    let body = match recv_handshake_packet(reader, deadline, config)? {
        Packet::ConnAck(body) => body,
        other => {
            return Err(BusError::HandshakeFailed(format!(
                "expected connack, got {}",
                other.name()
            )))
        }
    };
    let ack: ConnAck = serde_json::from_slice(&body)?;

    if let Some(reason) = ack.error {
        return Err(BusError::Rejected(reason));
    }
    check_protocol(&ack.protocol, &ack.version, config)?;
    if !is_version_compatible(&config.protocol_version, &ack.version)? {
        return Err(BusError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            ack.version, config.protocol_version
        )));
    }
    if ack.client_id != request.client_id {
        return Err(BusError::HandshakeFailed(format!(
            "broker acknowledged client_id '{}' (requested '{}')",
            ack.client_id, request.client_id
        )));
    }
    Ok(ack)
}

/// Broker side: read and vet the client's request.
///
/// A `HandshakeFailed` error carries a reason the broker should send back in
/// its [`ConnAck`] before closing the connection.
pub fn read_connect<R: Read>(
    reader: &mut PacketReader<R>,
    config: &HandshakeConfig,
    credentials: Option<&Credentials>,
) -> Result<ConnectRequest> {
    let deadline = Instant::now() + config.timeout;
    let body = match recv_handshake_packet(reader, deadline, config)? {
        Packet::Connect(body) => body,
        other => {
            return Err(BusError::HandshakeFailed(format!(
                "expected connect, got {}",
                other.name()
            )))
        }
    };
    let request: ConnectRequest = serde_json::from_slice(&body)?;

    check_protocol(&request.protocol, &request.version, config)?;
    if !is_version_compatible(&request.version, &config.protocol_version)? {
        return Err(BusError::HandshakeFailed(format!(
            "incompatible version '{}' (broker '{}')",
            request.version, config.protocol_version
        )));
    }
    validate_client_id(&request.client_id)?;
    validate_credential("username", request.username.as_deref())?;
    validate_credential("password", request.password.as_deref())?;

    if let Some(expected) = credentials {
        let matches = request.username.as_deref() == Some(expected.username.as_str())
            && request.password.as_deref() == Some(expected.password.as_str());
        if !matches {
            return Err(BusError::HandshakeFailed(
                "bad username or password".to_string(),
            ));
        }
    }
    Ok(request)
}

/// Broker side: answer the client, with `error` set when refusing.
pub fn send_connack<W: Write>(
    writer: &mut PacketWriter<W>,
    config: &HandshakeConfig,
    client_id: &str,
    error: Option<String>,
) -> Result<()> {
    let ack = ConnAck {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        client_id: client_id.to_string(),
        error,
    };
    writer.write_packet(&Packet::ConnAck(Bytes::from(serde_json::to_vec(&ack)?)))
}

fn recv_handshake_packet<R: Read>(
    reader: &mut PacketReader<R>,
    deadline: Instant,
    config: &HandshakeConfig,
) -> Result<Packet> {
    loop {
        if Instant::now() >= deadline {
            return Err(BusError::Timeout(config.timeout));
        }
        match reader.read_packet() {
            Ok(packet) => {
                if packet.body_len() > config.max_handshake_payload {
                    return Err(BusError::HandshakeFailed(format!(
                        "handshake payload too large: {} (max {})",
                        packet.body_len(),
                        config.max_handshake_payload
                    )));
                }
                return Ok(packet);
            }
            Err(BusError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(BusError::Disconnected(_)) => {
                return Err(BusError::Disconnected(
                    "connection closed during handshake".to_string(),
                ))
            }
            Err(err) => return Err(err),
        }
    }
}

fn check_protocol(protocol: &str, version: &str, config: &HandshakeConfig) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(BusError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(BusError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    if protocol != config.protocol_name {
        return Err(BusError::HandshakeFailed(format!(
            "unknown protocol '{protocol}' (expected '{}')",
            config.protocol_name
        )));
    }
    Ok(())
}

fn validate_credential(field: &str, value: Option<&str>) -> Result<()> {
    if let Some(value) = value {
        if value.len() > MAX_CREDENTIAL_LEN {
            return Err(BusError::HandshakeFailed(format!(
                "invalid {field} length: {}",
                value.len()
            )));
        }
    }
    Ok(())
}

fn is_version_compatible(client_version: &str, broker_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (broker_major, broker_minor) = parse_version(broker_version)?;
    Ok(client_major == broker_major && client_minor >= broker_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |what: &str| BusError::HandshakeFailed(format!("invalid version '{version}': {what}"));

    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| invalid("expected '<major>.<minor>'"))?;
    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}
