use std::collections::{BTreeMap, HashMap};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::codec::{CodecConfig, Message, Packet};
use crate::error::{BusError, Result};
use crate::handshake::{read_connect, send_connack, Credentials, HandshakeConfig};
use crate::reader::PacketReader;
use crate::topic::{topic_matches, validate_filter, validate_topic};
use crate::transport::SocketListener;
use crate::writer::PacketWriter;

/// Broker settings.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    pub handshake: HandshakeConfig,
    pub codec: CodecConfig,
    /// When set, clients must present exactly these credentials.
    pub credentials: Option<Credentials>,
}

impl BrokerConfig {
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Publish/subscribe broker listening on a Unix domain socket.
///
/// Every session is served by its own thread. Retained messages live in
/// memory for the lifetime of the broker.
pub struct Broker {
    listener: SocketListener,
    config: Arc<BrokerConfig>,
    shared: Arc<Shared>,
}

/// Control handle for a broker started with [`Broker::spawn`].
pub struct BrokerHandle {
    path: PathBuf,
    shared: Arc<Shared>,
    thread: JoinHandle<Result<()>>,
}

#[derive(Default)]
struct Shared {
    stopping: AtomicBool,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    retained: Mutex<BTreeMap<String, Bytes>>,
}

struct Session {
    client_id: String,
    filters: Mutex<Vec<String>>,
    writer: Mutex<PacketWriter<UnixStream>>,
    stream: UnixStream,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Broker {
    /// Bind the broker socket.
    pub fn bind(path: impl AsRef<Path>, config: BrokerConfig) -> Result<Self> {
        let listener = SocketListener::bind(path)?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            shared: Arc::new(Shared::default()),
        })
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.listener.path()
    }

    /// Accept and serve sessions until shut down through a [`BrokerHandle`].
    pub fn run(self) -> Result<()> {
        info!(path = ?self.listener.path(), "broker running");
        loop {
            let accepted = self.listener.accept();
            if self.shared.stopping.load(Ordering::SeqCst) {
                break;
            }
            let stream = match accepted {
                Ok(stream) => stream,
                Err(err) => {
                    error!(error = %err, "accept failed");
                    continue;
                }
            };

            let shared = Arc::clone(&self.shared);
            let config = Arc::clone(&self.config);
            std::thread::spawn(move || {
                if let Err(err) = serve(&shared, &config, stream) {
                    debug!(error = %err, "session closed with error");
                }
            });
        }
        info!("broker stopped");
        Ok(())
    }

    /// Run the broker on a background thread.
    pub fn spawn(self) -> Result<BrokerHandle> {
        let path = self.listener.path().to_path_buf();
        let shared = Arc::clone(&self.shared);
        let thread = std::thread::Builder::new()
            .name("sideassist-broker".to_string())
            .spawn(move || self.run())?;
        Ok(BrokerHandle {
            path,
            shared,
            thread,
        })
    }
}

impl BrokerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Client ids of the live sessions.
    pub fn clients(&self) -> Vec<String> {
        let sessions = self
            .shared
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop accepting, close every session and wait for the accept loop.
    pub fn shutdown(self) -> Result<()> {
        self.shared.stopping.store(true, Ordering::SeqCst);
        // Wake the blocking accept.
        let _ = UnixStream::connect(&self.path);

        let sessions: Vec<Arc<Session>> = self
            .shared
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for session in sessions {
            let _ = session.stream.shutdown(Shutdown::Both);
        }

        self.thread
            .join()
            .map_err(|_| BusError::Io(std::io::Error::other("broker thread panicked")))?
    }
}

impl Shared {
    fn publish(&self, message: Message) {
        if let Err(err) = validate_topic(&message.topic) {
            warn!(error = %err, "dropping publish");
            return;
        }

        if message.retain {
            let mut retained = lock(&self.retained);
            if message.payload.is_empty() {
                retained.remove(&message.topic);
            } else {
                retained.insert(message.topic.clone(), message.payload.clone());
            }
        }

        let delivery = Message {
            retain: false,
            ..message
        };
        let targets: Vec<Arc<Session>> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|session| session.wants(&delivery.topic))
            .cloned()
            .collect();
        debug!(topic = %delivery.topic, targets = targets.len(), "routing publish");
        for session in targets {
            session.deliver(&delivery);
        }
    }

    fn subscribe(&self, session: &Session, filter: String) {
        let replay: Vec<Message> = lock(&self.retained)
            .iter()
            .filter(|(topic, _)| topic_matches(&filter, topic))
            .map(|(topic, payload)| Message::new(topic.clone(), payload.clone(), true))
            .collect();

        {
            let mut filters = lock(&session.filters);
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
        for message in &replay {
            session.deliver(message);
        }
    }

    fn unregister(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions
            .get(&session.client_id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(&session.client_id);
        }
    }
}

impl Session {
    fn wants(&self, topic: &str) -> bool {
        lock(&self.filters)
            .iter()
            .any(|filter| topic_matches(filter, topic))
    }

    fn deliver(&self, message: &Message) {
        if let Err(err) = lock(&self.writer).publish(message) {
            warn!(client_id = %self.client_id, topic = %message.topic, error = %err, "delivery failed");
        }
    }
}

fn serve(shared: &Shared, config: &BrokerConfig, stream: UnixStream) -> Result<()> {
    let timeout = Some(config.handshake.timeout);
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    let handshake_codec = CodecConfig {
        max_packet_size: config.handshake.max_handshake_payload,
        ..config.codec.clone()
    };
    let mut reader = PacketReader::with_config(stream.try_clone()?, handshake_codec);
    let mut writer = PacketWriter::with_config(stream.try_clone()?, config.codec.clone());

    let request = match read_connect(&mut reader, &config.handshake, config.credentials.as_ref()) {
        Ok(request) => request,
        Err(err @ (BusError::HandshakeFailed(_) | BusError::Json(_))) => {
            warn!(error = %err, "refusing connection");
            let _ = send_connack(&mut writer, &config.handshake, "", Some(err.to_string()));
            return Err(err);
        }
        Err(err) => return Err(err),
    };
    let client_id = request.client_id;

    let session = Arc::new(Session {
        client_id: client_id.clone(),
        filters: Mutex::new(Vec::new()),
        writer: Mutex::new(writer),
        stream,
    });

    let duplicate = {
        let mut sessions = shared.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(&client_id) {
            true
        } else {
            sessions.insert(client_id.clone(), Arc::clone(&session));
            false
        }
    };
    if duplicate {
        warn!(%client_id, "refusing duplicate client id");
        let reason = format!("client id '{client_id}' is already connected");
        let _ = send_connack(
            &mut *lock(&session.writer),
            &config.handshake,
            &client_id,
            Some(reason.clone()),
        );
        return Err(BusError::Rejected(reason));
    }

    if let Err(err) = send_connack(&mut *lock(&session.writer), &config.handshake, &client_id, None)
    {
        shared.unregister(&session);
        return Err(err);
    }
    session.stream.set_read_timeout(None)?;
    reader.set_max_packet_size(config.codec.max_packet_size);
    info!(%client_id, "session started");

    let outcome = session_loop(shared, &session, &mut reader);
    shared.unregister(&session);
    let _ = session.stream.shutdown(Shutdown::Both);
    info!(%client_id, "session ended");
    outcome
}

fn session_loop(
    shared: &Shared,
    session: &Session,
    reader: &mut PacketReader<UnixStream>,
) -> Result<()> {
    loop {
        let packet = match reader.read_packet() {
            Ok(packet) => packet,
            Err(BusError::Disconnected(_)) => return Ok(()),
            Err(err) => return Err(err),
        };

        match packet {
            Packet::Publish(message) => shared.publish(message),
            Packet::Subscribe(filter) => match validate_filter(&filter) {
                Ok(()) => {
                    debug!(client_id = %session.client_id, %filter, "subscribe");
                    shared.subscribe(session, filter);
                }
                Err(err) => warn!(client_id = %session.client_id, error = %err, "ignoring subscribe"),
            },
            Packet::Unsubscribe(filter) => {
                debug!(client_id = %session.client_id, %filter, "unsubscribe");
                lock(&session.filters).retain(|existing| *existing != filter);
            }
            Packet::Disconnect => return Ok(()),
            other @ (Packet::Connect(_) | Packet::ConnAck(_)) => {
                return Err(BusError::HandshakeFailed(format!(
                    "unexpected {} after handshake",
                    other.name()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::{BusClient, ConnectOptions};

    fn sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/sa-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("broker.sock")
    }

    fn start(tag: &str, config: BrokerConfig) -> BrokerHandle {
        Broker::bind(sock_path(tag), config)
            .expect("broker should bind")
            .spawn()
            .expect("broker should start")
    }

    fn client(handle: &BrokerHandle, id: &str) -> BusClient {
        BusClient::connect(handle.path(), &ConnectOptions::new(id)).expect("client should connect")
    }

    fn finish(handle: BrokerHandle) {
        let dir = handle.path().parent().map(Path::to_path_buf);
        handle.shutdown().expect("broker should stop");
        if let Some(dir) = dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn publish_reaches_matching_subscribers_and_publisher() {
        let handle = start("route", BrokerConfig::default());
        let mut watcher = client(&handle, "watcher");
        let mut other = client(&handle, "other");
        watcher.subscribe("side_assist/+/option/#").unwrap();
        other.subscribe("unrelated/#").unwrap();

        watcher
            .publish("side_assist/echo/option/opt", &b"{\"value\":1}"[..], false)
            .unwrap();
        let message = watcher.recv().unwrap();
        assert_eq!(message.topic, "side_assist/echo/option/opt");
        assert_eq!(message.payload.as_ref(), b"{\"value\":1}");
        assert!(!message.retain);

        other.publish("unrelated/x", &b"1"[..], false).unwrap();
        assert_eq!(other.recv().unwrap().topic, "unrelated/x");

        finish(handle);
    }

    #[test]
    fn retained_messages_replay_on_subscribe() {
        let handle = start("retain", BrokerConfig::default());
        let mut publisher = client(&handle, "publisher");
        publisher
            .publish("side_assist/echo/option/opt", &b"{\"value\":5}"[..], true)
            .unwrap();
        publisher
            .publish("side_assist/echo/option/gone", &b"{\"value\":6}"[..], true)
            .unwrap();
        publisher
            .publish("side_assist/echo/option/gone", Bytes::new(), true)
            .unwrap();
        publisher.subscribe("sync").unwrap();
        publisher.publish("sync", &b""[..], false).unwrap();
        assert_eq!(publisher.recv().unwrap().topic, "sync");

        let mut late = client(&handle, "late");
        late.subscribe("side_assist/echo/option/#").unwrap();
        let replayed = late.recv().unwrap();
        assert_eq!(replayed.topic, "side_assist/echo/option/opt");
        assert_eq!(replayed.payload.as_ref(), b"{\"value\":5}");
        assert!(replayed.retain);

        // Nothing else was retained; the next message is live.
        late.subscribe("sync").unwrap();
        late.publish("sync", &b""[..], false).unwrap();
        let next = late.recv().unwrap();
        assert_eq!(next.topic, "sync");
        assert!(!next.retain);

        finish(handle);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let handle = start("unsub", BrokerConfig::default());
        let mut c = client(&handle, "c");
        c.subscribe("a/#").unwrap();
        c.subscribe("b").unwrap();
        c.unsubscribe("a/#").unwrap();
        c.publish("a/x", &b"1"[..], false).unwrap();
        c.publish("b", &b"2"[..], false).unwrap();
        assert_eq!(c.recv().unwrap().topic, "b");
        finish(handle);
    }

    #[test]
    fn duplicate_client_id_is_rejected() {
        let handle = start("dup", BrokerConfig::default());
        let _first = client(&handle, "echo");
        let second = BusClient::connect(handle.path(), &ConnectOptions::new("echo"));
        assert!(matches!(second, Err(BusError::Rejected(reason)) if reason.contains("already connected")));
        assert_eq!(handle.clients(), vec!["echo".to_string()]);
        finish(handle);
    }

    #[test]
    fn id_is_free_again_after_disconnect() {
        let handle = start("reuse", BrokerConfig::default());
        let first = client(&handle, "echo");
        first.disconnect().unwrap();

        let mut reconnected = None;
        for _ in 0..50 {
            match BusClient::connect(handle.path(), &ConnectOptions::new("echo")) {
                Ok(client) => {
                    reconnected = Some(client);
                    break;
                }
                Err(BusError::Rejected(_)) => std::thread::sleep(Duration::from_millis(10)),
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert!(reconnected.is_some(), "client id should be released");
        finish(handle);
    }

    #[test]
    fn credentials_are_enforced() {
        let config = BrokerConfig::default().with_credentials(Credentials::new("user", "pw"));
        let handle = start("creds", config);

        let anonymous = BusClient::connect(handle.path(), &ConnectOptions::new("anon"));
        assert!(matches!(anonymous, Err(BusError::Rejected(_))));

        let options = ConnectOptions::new("known").with_credentials(Credentials::new("user", "pw"));
        assert!(BusClient::connect(handle.path(), &options).is_ok());
        finish(handle);
    }

    #[test]
    fn shutdown_closes_sessions() {
        let handle = start("shutdown", BrokerConfig::default());
        let mut c = client(&handle, "c");
        c.subscribe("x").unwrap();
        finish(handle);
        assert!(c.recv().is_err());
    }
}
