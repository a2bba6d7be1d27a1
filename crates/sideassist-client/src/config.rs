use sideassist_bus::{Credentials, HandshakeConfig};

/// Default first topic level.
pub const DEFAULT_TOPIC_ROOT: &str = "side_assist";

/// Default length of payload excerpts in log lines.
pub const DEFAULT_LOG_PAYLOAD_LIMIT: usize = 256;

/// Client identity and connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Second topic level; also the bus session id.
    pub client_id: String,
    /// First topic level.
    pub topic_root: String,
    pub credentials: Option<Credentials>,
    pub handshake: HandshakeConfig,
    /// Maximum characters of a payload quoted in log lines.
    pub log_payload_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            topic_root: DEFAULT_TOPIC_ROOT.to_string(),
            credentials: None,
            handshake: HandshakeConfig::default(),
            log_payload_limit: DEFAULT_LOG_PAYLOAD_LIMIT,
        }
    }
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_topic_root(mut self, root: impl Into<String>) -> Self {
        self.topic_root = root.into();
        self
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
