use crate::registry::ValueRole;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A value with this name already exists in the registry.
    #[error("{role} '{name}' already exists")]
    AlreadyExists { role: ValueRole, name: String },

    /// The name cannot be used as a topic level.
    #[error("invalid value name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The validator refused the value.
    #[error("value {value} rejected by validator of '{name}'")]
    Rejected { name: String, value: String },

    /// The operation needs a live bus connection.
    #[error("not connected to a broker")]
    NotConnected,

    /// Bus-level error.
    #[error("bus error: {0}")]
    Bus(#[from] sideassist_bus::BusError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
