/// Reasons a wire rule fails to decode.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The rule is not a JSON object.
    #[error("rule must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// No known kind key with the expected shape.
    #[error("no known rule kind in object with keys [{0}]")]
    UnknownKind(String),

    /// A set or list kind decoded to nothing.
    #[error("`{kind}` rule has no valid entries")]
    Empty { kind: &'static str },

    /// An entry of a set kind is malformed.
    #[error("`{kind}` rule has invalid entry {item}")]
    InvalidItem { kind: &'static str, item: String },

    /// A `path` range is malformed or out of bounds.
    #[error("path `{field}` range is invalid: {reason}")]
    InvalidRange { field: &'static str, reason: String },

    /// A `path` field has the wrong JSON type.
    #[error("path `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    /// A child rule of a composite kind failed to decode.
    #[error("`{kind}` rule has invalid child: {source}")]
    InvalidChild {
        kind: &'static str,
        #[source]
        source: Box<DecodeError>,
    },

    /// The rule nests deeper than the configured limit.
    #[error("rule nesting exceeds {max} levels")]
    TooDeep { max: usize },

    /// The text is not valid JSON.
    #[error("rule is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
