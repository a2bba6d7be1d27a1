//! Glue between named values and the bus.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};

use serde_json::{json, Value};
use sideassist_bus::{BusClient, BusError, BusPublisher, BusReceiver, ConnectOptions, Message};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::named_value::{NamedValue, ValueEvent};
use crate::registry::{ValueRegistry, ValueRole};
use crate::topics::{Incoming, TopicLayout};

/// A SideAssist client: options set remotely, parameters reported locally.
///
/// Values added to the client upload their changes while connected. Cloning
/// is cheap and clones share everything; the connection is closed when the
/// last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Connection {
    generation: u64,
    publisher: BusPublisher,
}

struct Inner {
    config: ClientConfig,
    layout: TopicLayout,
    options: ValueRegistry,
    parameters: ValueRegistry,
    connection: RwLock<Option<Connection>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let layout = TopicLayout::new(&config.topic_root, &config.client_id);
        Self {
            inner: Arc::new(Inner {
                config,
                layout,
                options: ValueRegistry::new(ValueRole::Option),
                parameters: ValueRegistry::new(ValueRole::Parameter),
                connection: RwLock::new(None),
                receiver: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn topics(&self) -> &TopicLayout {
        &self.inner.layout
    }

    /// Create an option. Fails if the name is taken.
    pub fn add_option(&self, name: &str) -> Result<Arc<NamedValue>> {
        self.add(ValueRole::Option, name)
    }

    /// Create a parameter. Fails if the name is taken.
    pub fn add_parameter(&self, name: &str) -> Result<Arc<NamedValue>> {
        self.add(ValueRole::Parameter, name)
    }

    /// Look up an option, creating it when missing and `create` is set.
    pub fn option(&self, name: &str, create: bool) -> Result<Option<Arc<NamedValue>>> {
        self.lookup(ValueRole::Option, name, create)
    }

    /// Look up a parameter, creating it when missing and `create` is set.
    pub fn parameter(&self, name: &str, create: bool) -> Result<Option<Arc<NamedValue>>> {
        self.lookup(ValueRole::Parameter, name, create)
    }

    pub fn options(&self) -> &ValueRegistry {
        &self.inner.options
    }

    pub fn parameters(&self) -> &ValueRegistry {
        &self.inner.parameters
    }

    fn add(&self, role: ValueRole, name: &str) -> Result<Arc<NamedValue>> {
        let value = self.inner.registry(role).add(name)?;
        let weak = Arc::downgrade(&self.inner);
        value.subscribe(move |value, event| {
            if let Some(inner) = weak.upgrade() {
                inner.upload_change(role, value, event);
            }
        });
        Ok(value)
    }

    fn lookup(
        &self,
        role: ValueRole,
        name: &str,
        create: bool,
    ) -> Result<Option<Arc<NamedValue>>> {
        let registry = self.inner.registry(role);
        if let Some(value) = registry.get(name) {
            return Ok(Some(value));
        }
        if !create {
            return Ok(None);
        }
        match self.add(role, name) {
            Ok(value) => Ok(Some(value)),
            Err(ClientError::AlreadyExists { .. }) => Ok(registry.get(name)),
            Err(err) => Err(err),
        }
    }

    /// Connect to the broker at `path`.
    ///
    /// Uploads every value and validator, subscribes to this client's option
    /// topics and starts the receive thread. An existing connection is closed
    /// first.
    pub fn connect(&self, path: impl AsRef<Path>) -> Result<()> {
        self.disconnect()?;

        let config = &self.inner.config;
        let mut options = ConnectOptions::new(config.client_id.clone())
            .with_handshake_config(config.handshake.clone());
        if let Some(credentials) = &config.credentials {
            options = options.with_credentials(credentials.clone());
        }
        let bus = BusClient::connect(path.as_ref(), &options)?;
        let (publisher, receiver) = bus.split();

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *write(&self.inner.connection) = Some(Connection {
            generation,
            publisher: publisher.clone(),
        });
        info!(
            client_id = %config.client_id,
            path = %path.as_ref().display(),
            "connected"
        );

        self.inner.upload_all(&publisher);
        let filter = self.inner.layout.option_filter();
        if let Err(err) = publisher.subscribe(&filter) {
            self.inner.drop_connection(generation);
            let _ = publisher.disconnect();
            return Err(err.into());
        }
        debug!(%filter, "subscribed to options");

        let weak = Arc::downgrade(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("sideassist-{}", config.client_id))
            .spawn(move || receive_loop(weak, receiver, generation))
            .map_err(BusError::Io)?;
        *self.inner.receiver.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        read(&self.inner.connection).is_some()
    }

    /// Close the connection, if any, and wait for the receive thread.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.disconnect()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.inner.config.client_id)
            .field("connected", &self.is_connected())
            .field("options", &self.inner.options.names())
            .field("parameters", &self.inner.parameters.names())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn receive_loop(inner: Weak<Inner>, mut receiver: BusReceiver, generation: u64) {
    loop {
        let message = match receiver.recv() {
            Ok(message) => message,
            Err(err) => {
                if let Some(inner) = inner.upgrade() {
                    inner.connection_lost(generation, &err);
                }
                return;
            }
        };
        let Some(strong) = inner.upgrade() else {
            return;
        };
        strong.handle_message(&message);
    }
}

/// Payload excerpt for log lines: whitespace runs collapsed, at most `limit`
/// characters.
pub fn excerpt(payload: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut collapsed = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if matches!(c, ' ' | '\t' | '\n') {
            run += 1;
            if run == 2 {
                collapsed.pop();
                collapsed.push(' ');
                continue;
            } else if run > 2 {
                continue;
            }
        } else {
            run = 0;
        }
        collapsed.push(c);
    }
    if collapsed.chars().count() > limit {
        let mut short: String = collapsed.chars().take(limit.saturating_sub(3)).collect();
        short.push_str("...");
        short
    } else {
        collapsed
    }
}

impl Inner {
    fn registry(&self, role: ValueRole) -> &ValueRegistry {
        match role {
            ValueRole::Option => &self.options,
            ValueRole::Parameter => &self.parameters,
        }
    }

    fn publisher(&self) -> Option<BusPublisher> {
        read(&self.connection).as_ref().map(|c| c.publisher.clone())
    }

    fn upload_change(&self, role: ValueRole, value: &NamedValue, event: &ValueEvent) {
        let Some(publisher) = self.publisher() else {
            debug!(%role, name = value.name(), "not connected, change stays local");
            return;
        };
        match event {
            ValueEvent::ValueChanged(_) => self.upload_value(&publisher, role, value),
            ValueEvent::ValidatorChanged(_) => self.upload_validator(&publisher, role, value),
        }
    }

    fn upload_all(&self, publisher: &BusPublisher) {
        for role in [ValueRole::Option, ValueRole::Parameter] {
            for value in self.registry(role).iter() {
                self.upload_validator(publisher, role, &value);
                self.upload_value(publisher, role, &value);
            }
        }
    }

    fn upload_value(&self, publisher: &BusPublisher, role: ValueRole, value: &NamedValue) {
        let Some(current) = value.value() else {
            debug!(%role, name = value.name(), "undefined value not uploaded");
            return;
        };
        let topic = self.layout.value(role, value.name());
        let payload = json!({ "value": current }).to_string();
        info!(%role, name = value.name(), "uploading value");
        if let Err(err) = publisher.publish(&topic, payload.into_bytes(), true) {
            error!(%topic, error = %err, "upload failed");
        }
    }

    fn upload_validator(&self, publisher: &BusPublisher, role: ValueRole, value: &NamedValue) {
        let topic = self.layout.validator(role, value.name());
        let payload = match value.validator() {
            Some(validator) => json!({ "validator": validator.to_json() }).to_string(),
            None => String::new(),
        };
        info!(%role, name = value.name(), cleared = payload.is_empty(), "uploading validator");
        if let Err(err) = publisher.publish(&topic, payload.into_bytes(), true) {
            error!(%topic, error = %err, "upload failed");
        }
    }

    fn handle_message(&self, message: &Message) {
        match self.layout.parse(&message.topic) {
            Incoming::Foreign => {
                warn!(topic = %message.topic, "ignoring message outside client prefix");
            }
            Incoming::Other => {
                warn!(topic = %message.topic, "ignoring unsupported option operation");
            }
            Incoming::Validator(role, name) => {
                debug!(%role, %name, "ignoring validator echo");
            }
            Incoming::OptionValue(name) if !message.retain => {
                debug!(%name, "ignoring value echo");
            }
            Incoming::OptionValue(name) | Incoming::OptionSet(name) => {
                self.apply_remote(name, message);
            }
        }
    }

    /// Apply a `{"value": v}` payload to option `name`. Returns whether the
    /// option now holds the value.
    fn apply_remote(&self, name: &str, message: &Message) -> bool {
        let limit = self.config.log_payload_limit;
        let topic = message.topic.as_str();
        let Some(option) = self.options.get(name) else {
            warn!(%topic, %name, "no such option");
            return false;
        };
        let document: Value = match serde_json::from_slice(&message.payload) {
            Ok(document) => document,
            Err(err) => {
                warn!(
                    %topic,
                    payload = %excerpt(&message.payload, limit),
                    error = %err,
                    "invalid json in payload"
                );
                return false;
            }
        };
        let Some(value) = document.get("value") else {
            warn!(%topic, payload = %excerpt(&message.payload, limit), "payload has no value");
            return false;
        };
        if !option.validate(value) {
            warn!(%topic, payload = %excerpt(&message.payload, limit), "validation failed");
            return false;
        }
        match option.set_value(value.clone()) {
            Ok(changed) => {
                info!(
                    %name,
                    changed,
                    restored = message.retain,
                    payload = %excerpt(&message.payload, limit),
                    "remote changed option"
                );
                true
            }
            Err(err) => {
                warn!(%topic, error = %err, "remote value refused");
                false
            }
        }
    }

    fn drop_connection(&self, generation: u64) -> Option<BusPublisher> {
        let mut slot = write(&self.connection);
        match slot.as_ref() {
            Some(conn) if conn.generation == generation => slot.take().map(|c| c.publisher),
            _ => None,
        }
    }

    fn connection_lost(&self, generation: u64, err: &BusError) {
        if self.drop_connection(generation).is_some() {
            error!(client_id = %self.config.client_id, error = %err, "disconnected from broker");
        } else {
            debug!(error = %err, "receive loop finished");
        }
    }

    fn disconnect(&self) -> Result<()> {
        let connection = write(&self.connection).take();
        let sent = match connection {
            Some(conn) => {
                info!(client_id = %self.config.client_id, "disconnecting");
                conn.publisher.disconnect()
            }
            None => Ok(()),
        };
        let handle = self.receiver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        match sent {
            Err(BusError::Io(_)) | Err(BusError::Disconnected(_)) | Ok(()) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            debug!(error = %err, "disconnect on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::time::Duration;

    use sideassist_bus::{Broker, BrokerConfig, BrokerHandle};
    use sideassist_validator::{ValueKind, ValueValidator};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn start(tag: &str) -> (BrokerHandle, PathBuf) {
        let dir = PathBuf::from(format!(
            "/tmp/sa-glue-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let handle = Broker::bind(dir.join("bus.sock"), BrokerConfig::default())
            .expect("broker should bind")
            .spawn()
            .expect("broker should start");
        (handle, dir)
    }

    fn observer(handle: &BrokerHandle, id: &str, filter: &str) -> BusClient {
        let bus = BusClient::connect(handle.path(), &ConnectOptions::new(id))
            .expect("observer should connect");
        bus.subscribe(filter).expect("observer should subscribe");
        bus
    }

    fn changes(value: &NamedValue) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel();
        value.subscribe(move |_, event| {
            if let ValueEvent::ValueChanged(v) = event {
                let _ = tx.send(v.clone());
            }
        });
        rx
    }

    fn message(topic: &str, payload: &str, retain: bool) -> Message {
        Message::new(topic, payload.as_bytes().to_vec(), retain)
    }

    /// Reconnect with the same id; the broker may still be tearing down the
    /// previous session.
    fn connect_retrying(client: &Client, path: &Path) {
        for _ in 0..100 {
            match client.connect(path) {
                Ok(()) => return,
                Err(ClientError::Bus(BusError::Rejected(_))) => {
                    thread::sleep(Duration::from_millis(20))
                }
                Err(err) => panic!("connect failed: {err}"),
            }
        }
        panic!("client id never became free");
    }

    #[test]
    fn excerpt_collapses_and_truncates() {
        assert_eq!(excerpt(b"{ \"value\":\n\t  1 }", 256), "{ \"value\": 1 }");
        assert_eq!(excerpt(b"a \tb", 256), "a b");
        let long = "x".repeat(300);
        let short = excerpt(long.as_bytes(), 256);
        assert_eq!(short.len(), 256);
        assert!(short.ends_with("xx..."));
        assert_eq!(excerpt(&[b'y'; 256], 256), "y".repeat(256));
    }

    #[test]
    fn registries_and_lookup() {
        let client = Client::new(ClientConfig::new("lookup"));
        let opt = client.add_option("opt").unwrap();
        assert!(matches!(
            client.add_option("opt"),
            Err(ClientError::AlreadyExists { role: ValueRole::Option, .. })
        ));
        // Options and parameters are separate namespaces.
        client.add_parameter("opt").unwrap();

        let found = client.option("opt", false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&opt, &found));
        assert!(client.option("missing", false).unwrap().is_none());
        assert!(client.parameter("made", true).unwrap().is_some());
        assert_eq!(client.parameters().names(), vec!["made", "opt"]);
        assert!(!client.is_connected());
    }

    #[test]
    fn changes_while_disconnected_stay_local() {
        let client = Client::new(ClientConfig::new("offline"));
        let param = client.add_parameter("param").unwrap();
        assert!(param.set_value(json!(5)).unwrap());
        assert_eq!(param.value(), Some(json!(5)));
        client.disconnect().unwrap();
    }

    #[test]
    fn set_requests_are_validated() {
        let client = Client::new(ClientConfig::new("c1"));
        let int = client.add_option("int").unwrap();
        int.set_validator(Some(ValueValidator::single_type(ValueKind::INTEGER)));
        let inner = &client.inner;

        let set = "side_assist/c1/option/int/set";
        assert!(inner.apply_remote("int", &message(set, r#"{"value": 4}"#, false)));
        assert_eq!(int.value(), Some(json!(4)));

        assert!(!inner.apply_remote("int", &message(set, r#"{"value": "4"}"#, false)));
        assert!(!inner.apply_remote("int", &message(set, r#"{"val": 5}"#, false)));
        assert!(!inner.apply_remote("int", &message(set, "not json", false)));
        assert!(!inner.apply_remote("nope", &message(set, r#"{"value": 5}"#, false)));
        assert_eq!(int.value(), Some(json!(4)));
    }

    #[test]
    fn only_retained_values_and_set_requests_apply() {
        let client = Client::new(ClientConfig::new("c2"));
        let opt = client.add_option("opt").unwrap();
        let inner = &client.inner;

        inner.handle_message(&message("side_assist/c2/option/opt", r#"{"value": 1}"#, false));
        assert_eq!(opt.value(), None);

        inner.handle_message(&message("side_assist/c2/option/opt", r#"{"value": 2}"#, true));
        assert_eq!(opt.value(), Some(json!(2)));

        inner.handle_message(&message("side_assist/c2/option/opt/set", r#"{"value": 3}"#, false));
        assert_eq!(opt.value(), Some(json!(3)));

        inner.handle_message(&message("side_assist/other/option/opt/set", r#"{"value": 4}"#, false));
        inner.handle_message(&message(
            "side_assist/c2/option/opt/validator",
            r#"{"validator": {"types": ["String"]}}"#,
            true,
        ));
        assert_eq!(opt.value(), Some(json!(3)));
        assert!(opt.validator().is_none());
    }

    #[test]
    fn connect_uploads_values_and_validators() {
        let (handle, dir) = start("upload");
        let client = Client::new(ClientConfig::new("uploader"));
        let opt = client.add_option("opt").unwrap();
        opt.set_value(json!(123)).unwrap();
        opt.set_validator(Some(ValueValidator::types(ValueKind::INTEGER | ValueKind::DOUBLE)));
        client.add_parameter("undefined").unwrap();

        client.connect(handle.path()).expect("client should connect");
        assert!(client.is_connected());

        let mut watch = observer(&handle, "watch-upload", "side_assist/uploader/#");
        // The cleared validator of `undefined` is not retained. Uploads may
        // also arrive live if they race the observer's subscription.
        let mut seen = std::collections::BTreeSet::new();
        while seen.len() < 2 {
            let msg = watch.recv().unwrap();
            seen.insert((msg.topic, String::from_utf8(msg.payload.to_vec()).unwrap()));
        }
        assert_eq!(
            seen.into_iter().collect::<Vec<_>>(),
            vec![
                ("side_assist/uploader/option/opt".to_string(), r#"{"value":123}"#.to_string()),
                (
                    "side_assist/uploader/option/opt/validator".to_string(),
                    r#"{"validator":{"types":["Integer","Double"]}}"#.to_string()
                ),
            ]
        );

        // Live changes follow.
        opt.set_value(json!(7)).unwrap();
        loop {
            let msg = watch.recv().unwrap();
            if &msg.payload[..] == br#"{"value":7}"# {
                assert_eq!(msg.topic, "side_assist/uploader/option/opt");
                assert!(!msg.retain);
                break;
            }
        }

        client.disconnect().unwrap();
        assert!(!client.is_connected());
        handle.shutdown().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn remote_set_updates_option_and_mirror() {
        let (handle, dir) = start("remote");
        let client = Client::new(ClientConfig::new("echo"));
        let opt = client.add_option("opt").unwrap();
        opt.set_validator(Some(ValueValidator::single_type(ValueKind::INTEGER)));
        let param = client.add_parameter("param").unwrap();
        {
            let param = Arc::clone(&param);
            opt.subscribe(move |_, event| {
                if let ValueEvent::ValueChanged(v) = event {
                    let _ = param.set_value(v.clone());
                }
            });
        }
        let seen = changes(&param);
        client.connect(handle.path()).expect("client should connect");

        let remote = observer(&handle, "remote", "side_assist/echo/parameter/#");
        let set = client.topics().set_request("opt");
        remote.publish(&set, &br#"{"value":"nope"}"#[..], false).unwrap();
        // Retry until the client's subscription is in place.
        let deadline = std::time::Instant::now() + WAIT;
        let mirrored = loop {
            assert!(std::time::Instant::now() < deadline, "set request never applied");
            remote.publish(&set, &br#"{"value":42}"#[..], false).unwrap();
            if let Ok(value) = seen.recv_timeout(Duration::from_millis(200)) {
                break value;
            }
        };
        assert_eq!(mirrored, json!(42));
        assert_eq!(opt.value(), Some(json!(42)));

        client.disconnect().unwrap();
        handle.shutdown().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn retained_values_restore_on_reconnect() {
        let (handle, dir) = start("restore");
        {
            let first = Client::new(ClientConfig::new("keeper"));
            first.add_option("kept").unwrap().set_value(json!("saved")).unwrap();
            first.add_option("local").unwrap().set_value(json!(1)).unwrap();
            first.connect(handle.path()).expect("first session should connect");
        }

        let second = Client::new(ClientConfig::new("keeper"));
        let kept = second.add_option("kept").unwrap();
        let local = second.add_option("local").unwrap();
        local.set_value(json!(2)).unwrap();
        let restored = changes(&kept);
        connect_retrying(&second, handle.path());

        assert_eq!(restored.recv_timeout(WAIT).unwrap(), json!("saved"));
        // The local value was uploaded before the subscription replayed it.
        assert_eq!(local.value(), Some(json!(2)));

        drop(second);
        handle.shutdown().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }
}
