use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Packet header: magic (2) + body length (4) + kind (1) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Magic bytes: "SA" (0x53 0x41).
pub const MAGIC: [u8; 2] = [0x53, 0x41];

/// Default maximum body size: 1 MiB.
pub const DEFAULT_MAX_PACKET: usize = 1024 * 1024;

const KIND_CONNECT: u8 = 1;
const KIND_CONNACK: u8 = 2;
const KIND_PUBLISH: u8 = 3;
const KIND_SUBSCRIBE: u8 = 4;
const KIND_UNSUBSCRIBE: u8 = 5;
const KIND_DISCONNECT: u8 = 6;

const FLAG_RETAIN: u8 = 0x01;

type Result<T> = std::result::Result<T, CodecError>;

/// A published message as seen on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    /// On delivery: the message was replayed from the retained store.
    /// On publish: the broker should keep it for future subscribers.
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Handshake request, JSON body.
    Connect(Bytes),
    /// Handshake response, JSON body.
    ConnAck(Bytes),
    Publish(Message),
    Subscribe(String),
    Unsubscribe(String),
    Disconnect,
}

impl Packet {
    fn kind(&self) -> u8 {
        match self {
            Self::Connect(_) => KIND_CONNECT,
            Self::ConnAck(_) => KIND_CONNACK,
            Self::Publish(_) => KIND_PUBLISH,
            Self::Subscribe(_) => KIND_SUBSCRIBE,
            Self::Unsubscribe(_) => KIND_UNSUBSCRIBE,
            Self::Disconnect => KIND_DISCONNECT,
        }
    }

    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        kind_name(self.kind())
    }

    /// Size of the body on the wire.
    pub fn body_len(&self) -> usize {
        match self {
            Self::Connect(body) | Self::ConnAck(body) => body.len(),
            Self::Publish(message) => 1 + 2 + message.topic.len() + message.payload.len(),
            Self::Subscribe(filter) | Self::Unsubscribe(filter) => filter.len(),
            Self::Disconnect => 0,
        }
    }
}

fn kind_name(kind: u8) -> &'static str {
    match kind {
        KIND_CONNECT => "connect",
        KIND_CONNACK => "connack",
        KIND_PUBLISH => "publish",
        KIND_SUBSCRIBE => "subscribe",
        KIND_UNSUBSCRIBE => "unsubscribe",
        KIND_DISCONNECT => "disconnect",
        _ => "unknown",
    }
}

/// Encode a packet into the wire format.
///
/// ```text
/// ┌────────────┬─────────────┬──────────┬──────────────────┐
/// │ Magic (2B) │ Length      │ Kind     │ Body             │
/// │ "SA"       │ (4B LE)     │ (1B)     │ (Length bytes)   │
/// └────────────┴─────────────┴──────────┴──────────────────┘
/// ```
///
/// A publish body is `flags (1B) | topic length (2B LE) | topic | payload`.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    let body_len = packet.body_len();
    if body_len > u32::MAX as usize {
        return Err(CodecError::PacketTooLarge {
            size: body_len,
            max: u32::MAX as usize,
        });
    }

    dst.reserve(HEADER_SIZE + body_len);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body_len as u32);
    dst.put_u8(packet.kind());

    match packet {
        Packet::Connect(body) | Packet::ConnAck(body) => dst.put_slice(body),
        Packet::Publish(message) => {
            let topic_len =
                u16::try_from(message.topic.len()).map_err(|_| CodecError::Malformed {
                    kind: "publish",
                    reason: format!("topic is {} bytes, max {}", message.topic.len(), u16::MAX),
                })?;
            dst.put_u8(if message.retain { FLAG_RETAIN } else { 0 });
            dst.put_u16_le(topic_len);
            dst.put_slice(message.topic.as_bytes());
            dst.put_slice(&message.payload);
        }
        Packet::Subscribe(filter) | Packet::Unsubscribe(filter) => {
            dst.put_slice(filter.as_bytes())
        }
        Packet::Disconnect => {}
    }
    Ok(())
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_packet: usize) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    if src[0..2] != MAGIC {
        return Err(CodecError::InvalidMagic);
    }

    let body_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let kind = src[6];

    if body_len > max_packet {
        return Err(CodecError::PacketTooLarge {
            size: body_len,
            max: max_packet,
        });
    }
    if src.len() < HEADER_SIZE + body_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();
    decode_body(kind, body).map(Some)
}

fn decode_body(kind: u8, mut body: Bytes) -> Result<Packet> {
    let malformed = |reason: String| CodecError::Malformed {
        kind: kind_name(kind),
        reason,
    };

    match kind {
        KIND_CONNECT => Ok(Packet::Connect(body)),
        KIND_CONNACK => Ok(Packet::ConnAck(body)),
        KIND_PUBLISH => {
            if body.len() < 3 {
                return Err(malformed(format!("body is {} bytes, need at least 3", body.len())));
            }
            let flags = body.get_u8();
            if flags & !FLAG_RETAIN != 0 {
                return Err(malformed(format!("unknown flags {flags:#04x}")));
            }
            let topic_len = body.get_u16_le() as usize;
            if body.len() < topic_len {
                return Err(malformed(format!(
                    "topic length {topic_len} exceeds remaining {} bytes",
                    body.len()
                )));
            }
            let topic = body.split_to(topic_len);
            let topic = String::from_utf8(topic.to_vec())
                .map_err(|_| malformed("topic is not UTF-8".to_string()))?;
            Ok(Packet::Publish(Message {
                topic,
                payload: body,
                retain: flags & FLAG_RETAIN != 0,
            }))
        }
        KIND_SUBSCRIBE | KIND_UNSUBSCRIBE => {
            let filter = String::from_utf8(body.to_vec())
                .map_err(|_| malformed("filter is not UTF-8".to_string()))?;
            if kind == KIND_SUBSCRIBE {
                Ok(Packet::Subscribe(filter))
            } else {
                Ok(Packet::Unsubscribe(filter))
            }
        }
        KIND_DISCONNECT if body.is_empty() => Ok(Packet::Disconnect),
        KIND_DISCONNECT => Err(malformed(format!("unexpected {} byte body", body.len()))),
        other => Err(CodecError::UnknownKind(other)),
    }
}

/// Configuration for packet streams.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum body size in bytes. Default: 1 MiB.
    pub max_packet_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) -> Packet {
        let mut buf = BytesMut::new();
        encode_packet(&packet, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + packet.body_len());
        let decoded = decode_packet(&mut buf, DEFAULT_MAX_PACKET).unwrap().unwrap();
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn publish_carries_topic_payload_and_retain() {
        let message = Message::new("side_assist/echo/option/opt", &b"{\"value\":1}"[..], true);
        let decoded = roundtrip(Packet::Publish(message.clone()));
        assert_eq!(decoded, Packet::Publish(message));

        let empty = Message::new("a/b", Bytes::new(), false);
        assert_eq!(roundtrip(Packet::Publish(empty.clone())), Packet::Publish(empty));
    }

    #[test]
    fn control_packets() {
        assert_eq!(roundtrip(Packet::Disconnect), Packet::Disconnect);
        assert_eq!(
            roundtrip(Packet::Subscribe("a/+/#".into())),
            Packet::Subscribe("a/+/#".into())
        );
        assert_eq!(
            roundtrip(Packet::Connect(Bytes::from_static(b"{}"))).name(),
            "connect"
        );
    }

    #[test]
    fn incomplete_input_waits_for_more() {
        let mut buf = BytesMut::from(&MAGIC[..]);
        assert!(decode_packet(&mut buf, DEFAULT_MAX_PACKET).unwrap().is_none());

        let mut buf = BytesMut::new();
        encode_packet(&Packet::Subscribe("topic".into()), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);
        assert!(decode_packet(&mut buf, DEFAULT_MAX_PACKET).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn rejects_bad_headers() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0, 0, 0, 0, 1][..]);
        assert!(matches!(
            decode_packet(&mut buf, DEFAULT_MAX_PACKET),
            Err(CodecError::InvalidMagic)
        ));

        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(64 * 1024 * 1024);
        buf.put_u8(KIND_PUBLISH);
        assert!(matches!(
            decode_packet(&mut buf, DEFAULT_MAX_PACKET),
            Err(CodecError::PacketTooLarge { .. })
        ));

        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(0);
        buf.put_u8(0x7F);
        assert!(matches!(
            decode_packet(&mut buf, DEFAULT_MAX_PACKET),
            Err(CodecError::UnknownKind(0x7F))
        ));
    }

    #[test]
    fn rejects_malformed_publish() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(5);
        buf.put_u8(KIND_PUBLISH);
        buf.put_u8(0);
        buf.put_u16_le(10);
        buf.put_slice(b"ab");
        assert!(matches!(
            decode_packet(&mut buf, DEFAULT_MAX_PACKET),
            Err(CodecError::Malformed { kind: "publish", .. })
        ));

        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(3);
        buf.put_u8(KIND_PUBLISH);
        buf.put_u8(0x80);
        buf.put_u16_le(0);
        assert!(matches!(
            decode_packet(&mut buf, DEFAULT_MAX_PACKET),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn multiple_packets_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_packet(&Packet::Subscribe("one".into()), &mut buf).unwrap();
        encode_packet(&Packet::Disconnect, &mut buf).unwrap();

        assert_eq!(
            decode_packet(&mut buf, DEFAULT_MAX_PACKET).unwrap(),
            Some(Packet::Subscribe("one".into()))
        );
        assert_eq!(
            decode_packet(&mut buf, DEFAULT_MAX_PACKET).unwrap(),
            Some(Packet::Disconnect)
        );
        assert!(buf.is_empty());
    }
}
