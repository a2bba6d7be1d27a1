//! Local publish/subscribe bus over Unix domain sockets.
//!
//! A [`Broker`] routes [`Message`]s between [`BusClient`] sessions by topic
//! filter and keeps the last retained payload per topic for late
//! subscribers. The layers mirror the wire stack: [`transport`] sockets,
//! [`codec`] packets with [`reader`]/[`writer`] loops, the [`handshake`], and
//! on top the [`broker`] and [`client`].
//!
//! Unix only.

pub mod broker;
pub mod client;
pub mod codec;
pub mod error;
pub mod handshake;
pub mod reader;
pub mod topic;
pub mod transport;
pub mod writer;

pub use broker::{Broker, BrokerConfig, BrokerHandle};
pub use client::{BusClient, BusPublisher, BusReceiver, ConnectOptions};
pub use codec::{CodecConfig, Message, Packet, DEFAULT_MAX_PACKET};
pub use error::{BusError, CodecError, Result};
pub use handshake::{ConnAck, ConnectRequest, Credentials, HandshakeConfig};
pub use reader::PacketReader;
pub use topic::{topic_matches, validate_filter, validate_topic};
pub use transport::SocketListener;
pub use writer::PacketWriter;
